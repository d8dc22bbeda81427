use bincode::{Decode, Encode};

use crate::errors::{Result, SintassiError};
use crate::utils::Indexer;

/// Dense identifier of a label inside a [`LabelSet`].
pub type LabelId = usize;

/// Closed set of labels fixed at training time.
///
/// Labels keep the order in which they were first seen. Decoding breaks ties in favor of
/// the label that comes first in this order.
#[derive(Clone, Debug, Default, Decode, Encode)]
pub struct LabelSet {
    labels: Indexer<String>,
}

impl LabelSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, label: &str) -> LabelId {
        self.labels.get_id(label)
    }

    /// Gets the id of a label, or `None` if the label is unknown to the model.
    pub fn id(&self, label: &str) -> Option<LabelId> {
        self.labels.get(label)
    }

    /// Gets the id of a label, rejecting labels outside the set.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidArgument`] is returned for an unknown label.
    pub fn require(&self, label: &str) -> Result<LabelId> {
        self.id(label).ok_or_else(|| {
            SintassiError::invalid_argument("labels", format!("unknown label `{label}`"))
        })
    }

    /// Gets the label string of an id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    pub fn name(&self, id: LabelId) -> &str {
        &self.labels.keys()[id]
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterates over labels in id order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_set_require_unknown() {
        let mut labels = LabelSet::new();
        labels.insert("O");

        assert_eq!(0, labels.require("O").unwrap());
        assert_eq!(
            "InvalidArgumentError: labels: unknown label `B-LOC`",
            &labels.require("B-LOC").err().unwrap().to_string()
        );
    }
}
