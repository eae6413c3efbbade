//! Legend mapping: raw land-cover codes → simplified modeling classes.
//!
//! The built-in table follows the CORINE Land Cover level-3 nomenclature.
//! Classes 0 (null) and 999 (nodata) are sentinels: they may appear as prior
//! or posterior values but are never modeled as transition targets.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Raw code as stored in the input class rasters.
pub type RawCode = i32;
/// Simplified class id (0–15, 999).
pub type ClassId = u16;

pub const NULL_CLASS: ClassId = 0;
pub const NODATA_CLASS: ClassId = 999;
pub const CROPLAND_CLASS: ClassId = 3;

/// CORINE codes that make up cropland (arable and heterogeneous agriculture).
pub const CROPLAND_CORINE_CODES: [RawCode; 6] = [211, 212, 213, 241, 242, 243];

const CORINE_TO_CLASS: [(RawCode, ClassId); 45] = [
    (111, 1),   // continuous urban fabric
    (112, 1),   // discontinuous urban fabric
    (121, 2),   // industrial or commercial units
    (122, 0),
    (123, 0),
    (124, 0),
    (131, 0),
    (132, 0),
    (133, 0),
    (141, 0),
    (142, 0),
    (211, 3),   // non-irrigated arable land
    (212, 3),
    (213, 3),
    (221, 4),   // vineyards
    (222, 4),
    (223, 4),
    (231, 5),   // pastures
    (241, 3),
    (242, 3),
    (243, 3),
    (244, 5),   // agro-forestry
    (311, 6),   // broad-leaved forest
    (312, 6),
    (313, 6),
    (321, 7),   // natural grasslands
    (322, 7),
    (323, 7),
    (324, 15),  // transitional woodland-shrub
    (331, 14),  // beaches, dunes, sands
    (332, 14),
    (333, 14),
    (334, 7),   // burnt areas
    (335, 0),
    (411, 0),
    (412, 0),
    (421, 0),
    (422, 0),
    (423, 0),
    (511, 0),
    (512, 0),
    (521, 0),
    (522, 0),
    (523, 0),
    (999, NODATA_CLASS),
];

/// True for the reserved null/nodata classes.
#[inline]
pub fn is_sentinel(class: ClassId) -> bool {
    class == NULL_CLASS || class == NODATA_CLASS
}

/// Human-readable class name for reports.
pub fn class_name(class: ClassId) -> Option<&'static str> {
    Some(match class {
        0 => "null",
        1 => "Urban",
        2 => "Industrial",
        3 => "Arable",
        4 => "PermanentCrops",
        5 => "Pastures",
        6 => "ForestsMature",
        7 => "TransWoodlandShrub",
        14 => "SHVA",
        15 => "ForestYoung",
        999 => "nodata",
        _ => return None,
    })
}

/// One declared mapping row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub raw_code: RawCode,
    #[serde(alias = "simplified_class")]
    pub class: ClassId,
}

impl LegendEntry {
    pub fn new(raw_code: RawCode, class: ClassId) -> Self {
        Self { raw_code, class }
    }
}

/// A validated mapping table: each raw code maps to exactly one class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendTable {
    map: BTreeMap<RawCode, ClassId>,
}

impl LegendTable {
    /// Build a table from declared entries. Repeating a code with the same
    /// class is accepted; repeating it with another class is ambiguous.
    pub fn from_entries(entries: &[LegendEntry]) -> Result<Self> {
        let mut map = BTreeMap::new();
        for entry in entries {
            match map.insert(entry.raw_code, entry.class) {
                Some(prev) if prev != entry.class => {
                    return Err(PipelineError::AmbiguousMapping {
                        code: entry.raw_code,
                        first: prev,
                        second: entry.class,
                    });
                }
                _ => {}
            }
        }
        Ok(Self { map })
    }

    /// The CORINE Land Cover table.
    pub fn corine() -> Self {
        Self {
            map: CORINE_TO_CLASS.iter().copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, code: RawCode) -> Option<ClassId> {
        self.map.get(&code).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = LegendEntry> + '_ {
        self.map.iter().map(|(&raw_code, &class)| LegendEntry { raw_code, class })
    }

    /// Check completeness against the codes observed in the rasters and
    /// return the raw → simplified translation.
    ///
    /// Every missing code is reported at once, in ascending order.
    pub fn translator<I>(&self, observed: I) -> Result<Translator>
    where
        I: IntoIterator<Item = RawCode>,
    {
        let observed: BTreeSet<RawCode> = observed.into_iter().collect();
        let missing: Vec<RawCode> = observed
            .iter()
            .copied()
            .filter(|code| !self.map.contains_key(code))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::UnmappedCode { codes: missing });
        }
        let map = observed
            .into_iter()
            .filter_map(|code| self.get(code).map(|class| (code, class)))
            .collect();
        Ok(Translator { map })
    }
}

/// Raw → simplified lookup restricted to codes known to be present.
#[derive(Debug, Clone)]
pub struct Translator {
    map: HashMap<RawCode, ClassId>,
}

impl Translator {
    #[inline]
    pub fn translate(&self, code: RawCode) -> Option<ClassId> {
        self.map.get(&code).copied()
    }
}
