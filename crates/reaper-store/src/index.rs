use reaper_core::GroupVersionKind;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Index function over stored JSON
pub type RawIndexFn = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// Secondary index for one kind, kept current on every write
pub(crate) struct Index {
    gvk: GroupVersionKind,
    func: RawIndexFn,
    /// index value -> storage keys
    entries: HashMap<String, BTreeSet<String>>,
    /// storage key -> index values it is filed under
    values_by_key: HashMap<String, Vec<String>>,
}

impl Index {
    pub(crate) fn new(gvk: GroupVersionKind, func: RawIndexFn) -> Self {
        Self {
            gvk,
            func,
            entries: HashMap::new(),
            values_by_key: HashMap::new(),
        }
    }

    /// Re-file an object after a write; `None` drops it from the index
    pub(crate) fn update(&mut self, gvk: &GroupVersionKind, storage_key: &str, value: Option<&Value>) {
        if *gvk != self.gvk {
            return;
        }

        if let Some(old) = self.values_by_key.remove(storage_key) {
            for v in old {
                if let Some(keys) = self.entries.get_mut(&v) {
                    keys.remove(storage_key);
                    if keys.is_empty() {
                        self.entries.remove(&v);
                    }
                }
            }
        }

        let Some(value) = value else {
            return;
        };

        let values = (self.func)(value);
        for v in &values {
            self.entries
                .entry(v.clone())
                .or_default()
                .insert(storage_key.to_string());
        }
        if !values.is_empty() {
            self.values_by_key.insert(storage_key.to_string(), values);
        }
    }

    /// Storage keys filed under `value`, in key order
    pub(crate) fn lookup(&self, value: &str) -> Vec<String> {
        self.entries
            .get(value)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn by_owner() -> Index {
        let gvk = GroupVersionKind::new("example.dev", "v1", "Thing");
        Index::new(
            gvk,
            Arc::new(|v: &Value| {
                v["owner"]
                    .as_str()
                    .map(|s| vec![s.to_string()])
                    .unwrap_or_default()
            }),
        )
    }

    #[test]
    fn test_refile_on_change() {
        let gvk = GroupVersionKind::new("example.dev", "v1", "Thing");
        let mut index = by_owner();

        index.update(&gvk, "k1", Some(&json!({"owner": "a"})));
        index.update(&gvk, "k2", Some(&json!({"owner": "a"})));
        assert_eq!(index.lookup("a"), vec!["k1", "k2"]);

        index.update(&gvk, "k1", Some(&json!({"owner": "b"})));
        assert_eq!(index.lookup("a"), vec!["k2"]);
        assert_eq!(index.lookup("b"), vec!["k1"]);

        index.update(&gvk, "k2", None);
        assert!(index.lookup("a").is_empty());
    }

    #[test]
    fn test_ignores_other_kinds() {
        let other = GroupVersionKind::new("example.dev", "v1", "Other");
        let mut index = by_owner();

        index.update(&other, "k1", Some(&json!({"owner": "a"})));
        assert!(index.lookup("a").is_empty());
    }

    #[test]
    fn test_unindexed_objects_are_skipped() {
        let gvk = GroupVersionKind::new("example.dev", "v1", "Thing");
        let mut index = by_owner();

        index.update(&gvk, "k1", Some(&json!({})));
        assert!(index.entries.is_empty());
        assert!(index.values_by_key.is_empty());
    }
}
