//! Label selectors used to find the dependents of a managed resource
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Selects objects carrying every one of a set of `key=value` labels.
///
/// The default selector requires nothing and selects every object. Only equality requirements
/// exist, which is all the dependents of a managed resource are ever looked up by.
///
/// ```
/// use lifecycle_core::Selector;
///
/// let selector = Selector::default()
///     .with_label("app.kubernetes.io/part-of", "splunk-idx-indexer")
///     .with_label("app.kubernetes.io/component", "indexer");
/// assert_eq!(
///     selector.to_string(),
///     "app.kubernetes.io/component=indexer,app.kubernetes.io/part-of=splunk-idx-indexer"
/// );
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Selector {
    required: BTreeMap<String, String>,
}

impl Selector {
    /// Also require `key` to be set to `value`, replacing an earlier requirement on `key`
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.required.insert(key.into(), value.into());
        self
    }

    /// Whether `labels` carry every required label
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.required.iter().all(|(key, value)| labels.get(key) == Some(value))
    }

    /// Render in the `key=value,...` form the apiserver takes as `labelSelector`
    pub fn to_selector_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.required.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PART_OF: &str = "app.kubernetes.io/part-of";

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn requires_every_label() {
        let idx = Selector::default().with_label(PART_OF, "splunk-idx-indexer");
        for (selector, labels, matches, msg) in [
            (Selector::default(), labels(&[]), true, "empty selects everything"),
            (idx.clone(), labels(&[(PART_OF, "splunk-idx-indexer")]), true, "exact"),
            (
                idx.clone(),
                labels(&[(PART_OF, "splunk-idx-indexer"), ("app.kubernetes.io/component", "indexer")]),
                true,
                "extra labels are fine",
            ),
            (idx.clone(), labels(&[(PART_OF, "splunk-idx-search-head")]), false, "other component"),
            (idx.clone(), labels(&[]), false, "unlabeled"),
            (
                idx.with_label("app.kubernetes.io/component", "indexer"),
                labels(&[(PART_OF, "splunk-idx-indexer")]),
                false,
                "second requirement missing",
            ),
        ] {
            assert_eq!(selector.matches(&labels), matches, "{msg}");
        }
    }

    #[test]
    fn later_requirement_on_a_key_wins() {
        let selector = Selector::default()
            .with_label(PART_OF, "splunk-a-indexer")
            .with_label(PART_OF, "splunk-b-indexer");
        assert_eq!(selector.to_selector_string(), "app.kubernetes.io/part-of=splunk-b-indexer");
        assert_eq!(Selector::default().to_selector_string(), "");
    }
}
