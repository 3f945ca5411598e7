//! Cell class vocabulary and the label to category table.

use std::collections::BTreeMap;

use crate::error::{PipelineError, PipelineResult};

pub const SMALL_EATERS: &str = "Small Eaters";
pub const BIG_EATERS: &str = "Big Eaters";

/// Default vocabulary in model class-index order, with its category.
const DEFAULT_TABLE: [(&str, &str); 8] = [
    ("basophil", SMALL_EATERS),
    ("eosinophil", BIG_EATERS),
    ("erythroblast", SMALL_EATERS),
    ("ig", BIG_EATERS),
    ("lymphocyte", SMALL_EATERS),
    ("monocyte", BIG_EATERS),
    ("neutrophil", BIG_EATERS),
    ("platelet", SMALL_EATERS),
];

/// Ordered class vocabulary plus a category for (some of) its labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Taxonomy {
    labels: Vec<String>,
    categories: BTreeMap<String, String>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            labels: DEFAULT_TABLE.iter().map(|(l, _)| l.to_string()).collect(),
            categories: DEFAULT_TABLE
                .iter()
                .map(|(l, c)| (l.to_string(), c.to_string()))
                .collect(),
        }
    }
}

impl Taxonomy {
    /// Build and validate a taxonomy.
    ///
    /// Labels must be non-empty and unique; categories may only name labels that
    /// are in the vocabulary.
    pub fn new(labels: Vec<String>, categories: BTreeMap<String, String>) -> PipelineResult<Self> {
        if labels.is_empty() {
            return Err(PipelineError::config("class vocabulary is empty"));
        }
        for (i, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(PipelineError::config(format!("class label {} is blank", i)));
            }
            if labels[..i].contains(label) {
                return Err(PipelineError::config(format!(
                    "class label '{}' appears twice",
                    label
                )));
            }
        }
        if let Some(stray) = categories.keys().find(|l| !labels.contains(l)) {
            return Err(PipelineError::config(format!(
                "category given for '{}', which is not in the vocabulary",
                stray
            )));
        }
        Ok(Self { labels, categories })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn category_for(&self, label: &str) -> Option<&str> {
        self.categories.get(label).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_vocabulary() {
        let taxonomy = Taxonomy::default();
        assert_eq!(taxonomy.labels().len(), 8);
        assert_eq!(taxonomy.labels()[0], "basophil");
        assert_eq!(taxonomy.labels()[7], "platelet");
        for label in taxonomy.labels() {
            assert!(taxonomy.category_for(label).is_some(), "{}", label);
        }
        assert_eq!(taxonomy.category_for("ig"), Some(BIG_EATERS));
        assert_eq!(taxonomy.category_for("basophil"), Some(SMALL_EATERS));
        assert_eq!(taxonomy.category_for("neutrophil"), Some(BIG_EATERS));
        assert_eq!(taxonomy.category_for("macrophage"), None);
    }

    #[test]
    fn rejects_invalid_tables() {
        assert!(Taxonomy::new(Vec::new(), BTreeMap::new()).is_err());
        let dup = vec!["a".to_string(), "a".to_string()];
        assert!(Taxonomy::new(dup, BTreeMap::new()).is_err());
        let mut stray = BTreeMap::new();
        stray.insert("b".to_string(), BIG_EATERS.to_string());
        assert!(Taxonomy::new(vec!["a".to_string()], stray).is_err());
    }

    #[test]
    fn categories_may_be_partial() -> PipelineResult<()> {
        let mut categories = BTreeMap::new();
        categories.insert("a".to_string(), SMALL_EATERS.to_string());
        let taxonomy = Taxonomy::new(vec!["a".to_string(), "b".to_string()], categories)?;
        assert_eq!(taxonomy.category_for("b"), None);
        assert!(taxonomy.contains("b"));
        Ok(())
    }
}
