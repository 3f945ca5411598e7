//! Per-class counting of one frame's detections.

use serde::Serialize;

use crate::detect::DetectionSet;
use crate::taxonomy::Taxonomy;

/// Counts per vocabulary label for one frame, in vocabulary order.
///
/// Only labels that occur at least once are present. Rebuilt per frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassTally {
    counts: Vec<(String, usize)>,
}

/// One summary row: a label, its count and its category when known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TallyLine {
    pub label: String,
    pub count: usize,
    pub category: Option<String>,
}

pub fn aggregate(set: &DetectionSet, taxonomy: &Taxonomy) -> ClassTally {
    for detection in set.detections() {
        if !taxonomy.contains(&detection.label) {
            log::debug!(
                "frame {}: ignoring label '{}' outside the vocabulary",
                set.frame().index,
                detection.label
            );
        }
    }

    let counts = taxonomy
        .labels()
        .iter()
        .filter_map(|label| {
            let n = set
                .detections()
                .iter()
                .filter(|d| &d.label == label)
                .count();
            (n > 0).then(|| (label.clone(), n))
        })
        .collect();
    ClassTally { counts }
}

impl ClassTally {
    pub fn entries(&self) -> &[(String, usize)] {
        &self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    pub fn count(&self, label: &str) -> usize {
        self.counts
            .iter()
            .find(|(l, _)| l == label)
            .map_or(0, |(_, n)| *n)
    }

    pub fn lines(&self, taxonomy: &Taxonomy) -> Vec<TallyLine> {
        self.counts
            .iter()
            .map(|(label, count)| TallyLine {
                label: label.clone(),
                count: *count,
                category: taxonomy.category_for(label).map(str::to_string),
            })
            .collect()
    }
}
