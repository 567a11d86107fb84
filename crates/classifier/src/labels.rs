//! Diagnosis label table

use serde::{Deserialize, Serialize};

/// Label reported for an index outside the table
pub const UNKNOWN_LABEL: &str = "unknown";

/// Class labels in network output order
pub const LABELS: [&str; 3] = ["bacterial", "normal", "viral"];

/// Diagnosis predicted by the classifier
///
/// The discriminants match the network's output indices, which follow the
/// training-time label encoding and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    /// Bacterial pneumonia
    Bacterial = 0,
    /// No pneumonia
    Normal = 1,
    /// Viral pneumonia
    Viral = 2,
}

impl Diagnosis {
    /// Look up the diagnosis for an output index
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Diagnosis::Bacterial),
            1 => Some(Diagnosis::Normal),
            2 => Some(Diagnosis::Viral),
            _ => None,
        }
    }

    /// Output index of this diagnosis
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        LABELS[self.index()]
    }
}

/// Label for an output index, or `"unknown"` when out of range
pub fn label_for(index: usize) -> &'static str {
    Diagnosis::from_index(index)
        .map(|d| d.as_str())
        .unwrap_or(UNKNOWN_LABEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_order_is_fixed() {
        assert_eq!(label_for(0), "bacterial");
        assert_eq!(label_for(1), "normal");
        assert_eq!(label_for(2), "viral");
    }

    #[test]
    fn test_out_of_range_is_unknown() {
        assert_eq!(label_for(3), UNKNOWN_LABEL);
        assert_eq!(label_for(usize::MAX), UNKNOWN_LABEL);
    }

    #[test]
    fn test_index_round_trip() {
        for index in 0..LABELS.len() {
            assert_eq!(Diagnosis::from_index(index).unwrap().index(), index);
        }
    }
}
