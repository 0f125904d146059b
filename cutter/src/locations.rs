//! Upload location registry.
//!
//! A JSON file maps symbolic location names to a typed backend config
//! plus the cut type that location receives, e.g.:
//!
//! ```json
//! {
//!   "archive": {"backend": "filesystem", "path": "/mnt/published", "cut_type": "smart"},
//!   "previews": {"backend": "filesystem", "path": "/mnt/previews", "cut_type": "webm"}
//! }
//! ```

use cutting::CutType;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use uploads::{BackendConfig, UploadBackend};

#[derive(Debug, Deserialize)]
struct LocationEntry {
    #[serde(flatten)]
    backend: BackendConfig,
    #[serde(default = "default_cut_type")]
    cut_type: CutType,
}

fn default_cut_type() -> CutType {
    CutType::Smart
}

#[derive(Clone)]
pub struct Location {
    pub name: String,
    pub cut_type: CutType,
    pub backend: Arc<dyn UploadBackend>,
}

#[derive(Clone)]
pub struct Locations {
    by_name: HashMap<String, Location>,
}

impl Locations {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let entries: HashMap<String, LocationEntry> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
        if entries.is_empty() {
            anyhow::bail!("{} defines no upload locations", path.display());
        }

        let by_name = entries
            .into_iter()
            .map(|(name, entry)| {
                let location = Location {
                    name: name.clone(),
                    cut_type: entry.cut_type,
                    backend: entry.backend.build(),
                };
                (name, location)
            })
            .collect();
        Ok(Self { by_name })
    }

    pub fn get(&self, name: &str) -> Option<&Location> {
        self.by_name.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }
}
