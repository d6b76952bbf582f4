//! Static classification tables for the remote namespace.
//!
//! The instrument's command set is large, partially open-ended, and
//! versioned by firmware, so the driver does not hand-write a binding per
//! command. Instead, member names are classified against four disjoint
//! sets — callable *functions*, read/write *properties*, read-only
//! *constants*, and *command groups* (pure sub-namespaces) — plus one
//! extra set marking which property names are element-addressable lists.
//!
//! A built-in default vocabulary covers the dual-channel SMU surface used
//! by the sweep machinery and the common instrument commands. Firmware
//! revisions that add names can extend the tables from a TOML file:
//!
//! ```toml
//! functions = ["savebuffer"]
//! properties = ["cachemode"]
//! constants = ["SENSE_CALA"]
//! classes = ["lan"]
//! indexed = []
//! ```

use crate::error::{SmuError, SmuResult};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// What kind of remote member a name is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// Callable; results are retrieved with the store-then-query idiom.
    Function,
    /// Read/write scalar mapped to query/assignment commands.
    Property,
    /// Read-only scalar; writes are rejected locally.
    Constant,
    /// Pure sub-namespace with no leaf value of its own.
    Class,
}

/// The four name sets plus the indexed-property marker set.
///
/// Consumed read-only by the namespace proxy. A name belongs to at most
/// one of the four kind sets; [`ClassificationTables::validate`] enforces
/// this at load time.
#[derive(Debug, Clone)]
pub struct ClassificationTables {
    functions: HashSet<String>,
    properties: HashSet<String>,
    constants: HashSet<String>,
    classes: HashSet<String>,
    indexed: HashSet<String>,
}

/// On-disk shape of a table extension file.
#[derive(Debug, Default, Deserialize)]
struct TableExtension {
    #[serde(default)]
    functions: Vec<String>,
    #[serde(default)]
    properties: Vec<String>,
    #[serde(default)]
    constants: Vec<String>,
    #[serde(default)]
    classes: Vec<String>,
    #[serde(default)]
    indexed: Vec<String>,
}

static DEFAULTS: Lazy<ClassificationTables> = Lazy::new(|| {
    let set = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<HashSet<_>>();

    ClassificationTables {
        functions: set(&[
            "reset",
            "beep",
            "linearv",
            "lineari",
            "listv",
            "listi",
            "initiate",
            "abort",
            "clear",
            "clearcache",
            "v",
            "i",
            "iv",
            "r",
            "p",
        ]),
        properties: set(&[
            "levelv",
            "leveli",
            "output",
            "func",
            "nplc",
            "delay",
            "autorangei",
            "autorangev",
            "autozero",
            "rangei",
            "rangev",
            "limiti",
            "limitv",
            "count",
            "action",
            "stimulus",
            "orenable",
            "condition",
            "enable",
            "n",
            "linefreq",
            "sense",
        ]),
        constants: set(&[
            "ENABLE",
            "DISABLE",
            "OUTPUT_ON",
            "OUTPUT_OFF",
            "OUTPUT_DCVOLTS",
            "OUTPUT_DCAMPS",
            "AUTORANGE_ON",
            "AUTORANGE_OFF",
            "MEASURE_DCVOLTS",
            "MEASURE_DCAMPS",
            "SENSE_LOCAL",
            "SENSE_REMOTE",
            "SOURCE_HOLD",
            "SOURCE_IDLE",
            "EVENT_ID",
            "ARMED_EVENT_ID",
            "SOURCE_COMPLETE_EVENT_ID",
            "MEASURE_COMPLETE_EVENT_ID",
            "PULSE_COMPLETE_EVENT_ID",
            "SWEEP_COMPLETE_EVENT_ID",
        ]),
        classes: set(&[
            "smua",
            "smub",
            "beeper",
            "display",
            "localnode",
            "status",
            "operation",
            "sweeping",
            "trigger",
            "source",
            "measure",
            "arm",
            "endpulse",
            "endsweep",
            "blender",
            "nvbuffer1",
            "nvbuffer2",
        ]),
        indexed: set(&["stimulus"]),
    }
});

impl ClassificationTables {
    /// The built-in vocabulary for the dual-channel SMU family.
    pub fn defaults() -> Self {
        DEFAULTS.clone()
    }

    /// Classify one member name, or `None` if it is unknown.
    pub fn classify(&self, name: &str) -> Option<NameKind> {
        if self.functions.contains(name) {
            Some(NameKind::Function)
        } else if self.properties.contains(name) {
            Some(NameKind::Property)
        } else if self.constants.contains(name) {
            Some(NameKind::Constant)
        } else if self.classes.contains(name) {
            Some(NameKind::Class)
        } else {
            None
        }
    }

    /// True if a property name is element-addressable (`name[i]`).
    pub fn is_indexed(&self, name: &str) -> bool {
        self.indexed.contains(name)
    }

    /// All known property names.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(String::as_str)
    }

    /// All known constant names.
    pub fn constant_names(&self) -> impl Iterator<Item = &str> {
        self.constants.iter().map(String::as_str)
    }

    /// Merge names from a TOML extension file into these tables.
    pub fn extend_from_toml<P: AsRef<Path>>(&mut self, path: P) -> SmuResult<()> {
        let raw = std::fs::read_to_string(path)?;
        let ext: TableExtension = toml::from_str(&raw)?;
        self.functions.extend(ext.functions);
        self.properties.extend(ext.properties);
        self.constants.extend(ext.constants);
        self.classes.extend(ext.classes);
        self.indexed.extend(ext.indexed);
        self.validate()
    }

    /// Check the disjointness invariant: a name may belong to at most one
    /// of the four kind sets.
    pub fn validate(&self) -> SmuResult<()> {
        let sets = [
            &self.functions,
            &self.properties,
            &self.constants,
            &self.classes,
        ];
        for (i, a) in sets.iter().enumerate() {
            for b in sets.iter().skip(i + 1) {
                if let Some(name) = a.intersection(b).next() {
                    return Err(SmuError::TableOverlap { name: name.clone() });
                }
            }
        }
        Ok(())
    }
}

impl Default for ClassificationTables {
    fn default() -> Self {
        Self::defaults()
    }
}
