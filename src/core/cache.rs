use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// On-disk store of resolved tuning assignments, keyed by kernel signature.
///
/// Persistence is opt-in: the dispatch path never touches the filesystem.
/// Callers load a store up front, hand its assignments to the engine, and
/// save after tuning has settled.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TuningStore {
    entries: HashMap<String, BTreeMap<String, i64>>,
}

impl TuningStore {
    /// Read a store from `path`. A missing or unreadable file yields an
    /// empty store rather than an error.
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }

    pub fn get(&self, signature: &str) -> Option<&BTreeMap<String, i64>> {
        self.entries.get(signature)
    }

    pub fn set(&mut self, signature: String, assignment: BTreeMap<String, i64>) {
        self.entries.insert(signature, assignment);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, i64>)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let store = TuningStore::load(Path::new("/nonexistent/tessella/tuning.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join("tessella_store_test");
        let path = dir.join("tuning.json");
        let mut store = TuningStore::default();
        let mut assignment = BTreeMap::new();
        assignment.insert("TSK".to_string(), 16);
        store.set(
            "gemm_NTA_NTB_M64_N64_K64_iq_passive_oq_passive".into(),
            assignment,
        );
        store.save(&path).unwrap();

        let reloaded = TuningStore::load(&path);
        let entry = reloaded
            .get("gemm_NTA_NTB_M64_N64_K64_iq_passive_oq_passive")
            .unwrap();
        assert_eq!(entry.get("TSK"), Some(&16));
        let _ = fs::remove_dir_all(dir);
    }
}
