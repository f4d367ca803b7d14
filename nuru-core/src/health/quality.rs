//! Throughput to quality label mapping.

use std::fmt;

use serde::Serialize;

use super::MIB;

/// Stream quality a player should aim for at the current throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityLabel {
    High,
    Medium,
    Low,
    VeryLow,
}

impl QualityLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityLabel::High => "high",
            QualityLabel::Medium => "medium",
            QualityLabel::Low => "low",
            QualityLabel::VeryLow => "very-low",
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a download rate in bytes per second.
///
/// Stateless; consecutive samples may flip between labels.
pub fn classify_throughput(bytes_per_second: u64) -> QualityLabel {
    let mib_per_second = bytes_per_second as f64 / MIB;

    if mib_per_second > 10.0 {
        QualityLabel::High
    } else if mib_per_second > 5.0 {
        QualityLabel::Medium
    } else if mib_per_second > 1.0 {
        QualityLabel::Low
    } else {
        QualityLabel::VeryLow
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_reference_rates() {
        assert_eq!(classify_throughput(12_000_000), QualityLabel::High);
        assert_eq!(classify_throughput(6_000_000), QualityLabel::Medium);
        assert_eq!(classify_throughput(1_500_000), QualityLabel::Low);
        assert_eq!(classify_throughput(50_000), QualityLabel::VeryLow);
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        assert_eq!(classify_throughput(1_048_576), QualityLabel::VeryLow);
        assert_eq!(classify_throughput(1_048_577), QualityLabel::Low);
        assert_eq!(classify_throughput(10 * 1_048_576), QualityLabel::Medium);
    }

    #[test]
    fn test_label_serialization() {
        assert_eq!(
            serde_json::to_string(&QualityLabel::VeryLow).unwrap(),
            "\"very-low\""
        );
        assert_eq!(QualityLabel::High.to_string(), "high");
    }

    proptest! {
        #[test]
        fn prop_classification_is_monotonic(a in 0u64..100_000_000, b in 0u64..100_000_000) {
            let rank = |label: QualityLabel| match label {
                QualityLabel::VeryLow => 0,
                QualityLabel::Low => 1,
                QualityLabel::Medium => 2,
                QualityLabel::High => 3,
            };
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(rank(classify_throughput(low)) <= rank(classify_throughput(high)));
        }
    }
}
