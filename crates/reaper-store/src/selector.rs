use std::collections::BTreeMap;
use std::fmt;

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// A selector that matches everything
    pub fn everything() -> Self {
        Self::default()
    }

    /// Require `key=value`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }

    /// Check a label set against every requirement
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSelector {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            match_labels: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.match_labels {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selector_matches_all() {
        let selector = LabelSelector::everything();
        assert!(selector.matches(None));
        assert!(selector.matches(Some(&BTreeMap::new())));
    }

    #[test]
    fn test_requires_every_label() {
        let selector = LabelSelector::everything()
            .with("cluster.x-k8s.io/cluster-name", "foo")
            .with("pool", "workers");

        let mut labels = BTreeMap::new();
        labels.insert("cluster.x-k8s.io/cluster-name".to_string(), "foo".to_string());
        assert!(!selector.matches(Some(&labels)));

        labels.insert("pool".to_string(), "workers".to_string());
        assert!(selector.matches(Some(&labels)));

        labels.insert("pool".to_string(), "cp".to_string());
        assert!(!selector.matches(Some(&labels)));
        assert!(!selector.matches(None));
    }

    #[test]
    fn test_display() {
        let selector: LabelSelector = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(selector.to_string(), "a=1,b=2");
    }
}
