// elementmap.rs — Stage-type trait database
//
// Maps a stage type name to its flow code and capability flags. Entries come
// from JSON files (the versioned external source) layered over a built-in
// table. Flag `A` marks a stage type as alignment-tolerant: it can adapt to
// whatever alignment it is handed, within limits its aligner describes.
//
// Preconditions: none.
// Postconditions: every stored entry carries a parsed `FlowCode`.
// Failure modes: unreadable or malformed JSON → `ElementMapError`; a bad flow
//                code inside an entry → warning diagnostic, entry uses `x/x`.
// Side effects: `load_file` reads from disk.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diag::{codes, Diagnostic};
use crate::flow_code::{self, FlowCode};

/// Flag character marking alignment-tolerant stage types.
pub const ALIGNMENT_TOLERANT: char = 'A';

/// Types assumed tolerant when the database has no classifier information.
const FALLBACK_TOLERANT: &[&str] = &[
    "Classifier",
    "IPClassifier",
    "IPFilter",
    "CheckIPHeader",
    "CheckIPHeader2",
    "UDPIPEncap",
    "IPInputCombo",
];

// ── Data types ──────────────────────────────────────────────────────────────

/// One entry as it appears in a database file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitEntry {
    pub name: String,
    #[serde(default = "default_flow_code")]
    pub flow_code: String,
    #[serde(default)]
    pub flags: String,
}

fn default_flow_code() -> String {
    "x/x".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ElementMapFile {
    #[serde(default)]
    entries: Vec<TraitEntry>,
}

/// Resolved traits for one stage type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementTraits {
    pub flow: FlowCode,
    pub flags: String,
}

impl Default for ElementTraits {
    fn default() -> Self {
        ElementTraits {
            flow: FlowCode::default(),
            flags: String::new(),
        }
    }
}

impl ElementTraits {
    pub fn has_flag(&self, flag: char) -> bool {
        self.flags.contains(flag)
    }

    pub fn alignment_tolerant(&self) -> bool {
        self.has_flag(ALIGNMENT_TOLERANT)
    }
}

#[derive(Debug)]
pub enum ElementMapError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    JsonError {
        path: PathBuf,
        source: serde_json::Error,
    },
    DuplicateEntry {
        name: String,
        path: PathBuf,
    },
}

impl fmt::Display for ElementMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementMapError::IoError { path, source } => write!(f, "{}: {}", path.display(), source),
            ElementMapError::JsonError { path, source } => {
                write!(f, "{}: {}", path.display(), source)
            }
            ElementMapError::DuplicateEntry { name, path } => {
                write!(f, "{}: duplicate entry for '{}'", path.display(), name)
            }
        }
    }
}

impl std::error::Error for ElementMapError {}

// ── ElementMap ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ElementMap {
    entries: BTreeMap<String, (TraitEntry, ElementTraits)>,
}

impl ElementMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Traits for the stage types the built-in aligner table knows about.
    pub fn builtin() -> Self {
        let mut map = ElementMap::new();
        let table: &[(&str, &str, &str)] = &[
            ("Align", "x/x", ""),
            ("AlignmentInfo", "x/x", ""),
            ("ARPQuerier", "xy/x", ""),
            ("ARPResponder", "x/x", ""),
            ("CheckIPHeader", "x/x", "A"),
            ("CheckIPHeader2", "x/x", "A"),
            ("Classifier", "x/x", "A"),
            ("Counter", "x/x", ""),
            ("Discard", "x/x", ""),
            ("EtherEncap", "x/x", ""),
            ("FromDevice", "x/x", ""),
            ("FromHost", "x/x", ""),
            ("GridEncap", "x/x", ""),
            ("ICMPError", "x/y", ""),
            ("ICMPPingEncap", "x/x", ""),
            ("Idle", "x/x", ""),
            ("InfiniteSource", "x/x", ""),
            ("IPClassifier", "x/x", "A"),
            ("IPEncap", "x/x", ""),
            ("IPFilter", "x/x", "A"),
            ("IPInputCombo", "x/x", "A"),
            ("MarkIPHeader", "x/x", "A"),
            ("PollDevice", "x/x", ""),
            ("Queue", "x/x", ""),
            ("RatedSource", "x/x", ""),
            ("Strip", "x/x", ""),
            ("Tee", "x/x", ""),
            ("ToDevice", "x/x", ""),
            ("ToHost", "x/x", ""),
            ("UDPIPEncap", "x/x", "A"),
        ];
        for (name, flow_code, flags) in table {
            let entry = TraitEntry {
                name: name.to_string(),
                flow_code: flow_code.to_string(),
                flags: flags.to_string(),
            };
            // Built-in codes are known to parse.
            map.insert(entry, &mut Vec::new());
        }
        map
    }

    /// Parse database JSON. Later entries for a name already present replace it.
    pub fn load_str(
        &mut self,
        json: &str,
        path: &Path,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<usize, ElementMapError> {
        let file: ElementMapFile =
            serde_json::from_str(json).map_err(|e| ElementMapError::JsonError {
                path: path.to_path_buf(),
                source: e,
            })?;

        let mut seen = HashSet::new();
        for entry in &file.entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(ElementMapError::DuplicateEntry {
                    name: entry.name.clone(),
                    path: path.to_path_buf(),
                });
            }
        }

        let count = file.entries.len();
        for entry in file.entries {
            self.insert(entry, diagnostics);
        }
        Ok(count)
    }

    /// Load a database file. Returns the number of entries read.
    pub fn load_file(
        &mut self,
        path: &Path,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<usize, ElementMapError> {
        let json = std::fs::read_to_string(path).map_err(|e| ElementMapError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.load_str(&json, path, diagnostics)
    }

    /// Add or replace one entry, downgrading an unparsable flow code to `x/x`.
    pub fn insert(&mut self, entry: TraitEntry, diagnostics: &mut Vec<Diagnostic>) {
        let flow = match flow_code::parse(&entry.flow_code) {
            Ok(flow) => flow,
            Err(e) => {
                diagnostics.push(
                    Diagnostic::warning(e.to_string())
                        .with_code(codes::W0104)
                        .with_element(&entry.name)
                        .with_hint("assuming 'x/x'"),
                );
                FlowCode::default()
            }
        };
        let traits = ElementTraits {
            flow,
            flags: entry.flags.clone(),
        };
        self.entries.insert(entry.name.clone(), (entry, traits));
    }

    pub fn has_traits(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    /// Traits for `type_name`, or the `x/x`, no-flag default.
    pub fn traits(&self, type_name: &str) -> ElementTraits {
        self.lookup(type_name).cloned().unwrap_or_default()
    }

    pub fn lookup(&self, type_name: &str) -> Option<&ElementTraits> {
        self.entries.get(type_name).map(|(_, traits)| traits)
    }

    /// If nothing is known about `Classifier`, mark the classifier family tolerant.
    pub fn ensure_classifier_traits(&mut self, diagnostics: &mut Vec<Diagnostic>) {
        if self.has_traits("Classifier") {
            return;
        }
        diagnostics.push(
            Diagnostic::warning("element map has no information for Classifier, muddling along")
                .with_code(codes::W0103)
                .with_hint("this is usually a missing element map; the result may not run"),
        );
        for name in FALLBACK_TOLERANT {
            let mut entry = self
                .entries
                .get(*name)
                .map(|(entry, _)| entry.clone())
                .unwrap_or_else(|| TraitEntry {
                    name: name.to_string(),
                    flow_code: default_flow_code(),
                    flags: String::new(),
                });
            if !entry.flags.contains(ALIGNMENT_TOLERANT) {
                entry.flags.push(ALIGNMENT_TOLERANT);
            }
            self.insert(entry, diagnostics);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compact JSON of all entries in name order.
    pub fn canonical_json(&self) -> String {
        let file = ElementMapFile {
            entries: self.entries.values().map(|(entry, _)| entry.clone()).collect(),
        };
        serde_json::to_string(&file).unwrap_or_default()
    }

    /// SHA-256 of `canonical_json()`, as 64 hex characters.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        use std::fmt::Write;

        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        let digest = hasher.finalize();
        let mut s = String::with_capacity(64);
        for b in digest.iter() {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
