//! Activity classification
//!
//! Maps raw platform samples onto the canonical activity type / confidence
//! pair that is relayed to the foreground consumer.

pub mod session;
pub mod worker;

pub use session::{
    ActivityRecognitionHost, ActivitySessionManager, AckCallback, SessionCallbacks, SessionState,
};
pub use worker::ActivityRecognitionWorker;

use serde::{Deserialize, Serialize};

/// Mailbox namespace used to relay results from the background worker
pub const ACTIVITY_NAMESPACE: &str = "ACTIVITY_RECOGNITION_RESULT";
pub const ACTIVITY_DATA_KEY: &str = "ACTIVITY_DATA";
pub const ACTIVITY_ERROR_KEY: &str = "ACTIVITY_ERROR";

/// Platform classification constants
pub mod raw {
    pub const IN_VEHICLE: i32 = 0;
    pub const ON_BICYCLE: i32 = 1;
    pub const ON_FOOT: i32 = 2;
    pub const STILL: i32 = 3;
    pub const UNKNOWN: i32 = 4;
    pub const TILTING: i32 = 5;
    pub const WALKING: i32 = 7;
    pub const RUNNING: i32 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    InVehicle,
    OnBicycle,
    OnFoot,
    Running,
    Still,
    Tilting,
    Walking,
    Unknown,
}

impl ActivityType {
    pub fn from_raw(code: i32) -> Self {
        match code {
            raw::IN_VEHICLE => ActivityType::InVehicle,
            raw::ON_BICYCLE => ActivityType::OnBicycle,
            raw::ON_FOOT => ActivityType::OnFoot,
            raw::RUNNING => ActivityType::Running,
            raw::STILL => ActivityType::Still,
            raw::TILTING => ActivityType::Tilting,
            raw::WALKING => ActivityType::Walking,
            _ => ActivityType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::InVehicle => "IN_VEHICLE",
            ActivityType::OnBicycle => "ON_BICYCLE",
            ActivityType::OnFoot => "ON_FOOT",
            ActivityType::Running => "RUNNING",
            ActivityType::Still => "STILL",
            ActivityType::Tilting => "TILTING",
            ActivityType::Walking => "WALKING",
            ActivityType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityConfidence {
    High,
    Medium,
    Low,
}

impl ActivityConfidence {
    /// Bucket a 0-100 confidence: [75,100] HIGH, [50,75) MEDIUM, else LOW
    pub fn from_percent(confidence: i32) -> Self {
        match confidence {
            75..=100 => ActivityConfidence::High,
            50..=74 => ActivityConfidence::Medium,
            _ => ActivityConfidence::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityConfidence::High => "HIGH",
            ActivityConfidence::Medium => "MEDIUM",
            ActivityConfidence::Low => "LOW",
        }
    }
}

impl std::fmt::Display for ActivityConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One probable activity as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawActivitySample {
    pub activity_type: i32,
    pub confidence: i32,
}

impl RawActivitySample {
    pub fn new(activity_type: i32, confidence: i32) -> Self {
        Self {
            activity_type,
            confidence,
        }
    }
}

/// Point-in-time classification event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityData {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub confidence: ActivityConfidence,
}

impl ActivityData {
    pub fn from_sample(sample: &RawActivitySample) -> Self {
        Self {
            activity_type: ActivityType::from_raw(sample.activity_type),
            confidence: ActivityConfidence::from_percent(sample.confidence),
        }
    }

    /// The sample with the highest confidence; the earliest wins a tie.
    pub fn most_probable(samples: &[RawActivitySample]) -> Option<Self> {
        // max_by_key keeps the last maximum, so walk the samples backwards
        samples
            .iter()
            .rev()
            .max_by_key(|s| s.confidence)
            .map(Self::from_sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_raw_type_mapping() {
        assert_eq!(ActivityType::from_raw(raw::IN_VEHICLE), ActivityType::InVehicle);
        assert_eq!(ActivityType::from_raw(raw::ON_BICYCLE), ActivityType::OnBicycle);
        assert_eq!(ActivityType::from_raw(raw::ON_FOOT), ActivityType::OnFoot);
        assert_eq!(ActivityType::from_raw(raw::STILL), ActivityType::Still);
        assert_eq!(ActivityType::from_raw(raw::TILTING), ActivityType::Tilting);
        assert_eq!(ActivityType::from_raw(raw::WALKING), ActivityType::Walking);
        assert_eq!(ActivityType::from_raw(raw::RUNNING), ActivityType::Running);
        assert_eq!(ActivityType::from_raw(raw::UNKNOWN), ActivityType::Unknown);
        assert_eq!(ActivityType::from_raw(6), ActivityType::Unknown);
        assert_eq!(ActivityType::from_raw(-1), ActivityType::Unknown);
    }

    #[test]
    fn test_confidence_boundaries() {
        assert_eq!(ActivityConfidence::from_percent(100), ActivityConfidence::High);
        assert_eq!(ActivityConfidence::from_percent(75), ActivityConfidence::High);
        assert_eq!(ActivityConfidence::from_percent(74), ActivityConfidence::Medium);
        assert_eq!(ActivityConfidence::from_percent(50), ActivityConfidence::Medium);
        assert_eq!(ActivityConfidence::from_percent(49), ActivityConfidence::Low);
        assert_eq!(ActivityConfidence::from_percent(101), ActivityConfidence::Low);
    }

    #[test]
    fn test_running_sample_serializes() {
        let data = ActivityData::from_sample(&RawActivitySample::new(raw::RUNNING, 80));
        let json = serde_json::to_value(data).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "RUNNING", "confidence": "HIGH"})
        );
    }

    #[test]
    fn test_most_probable_prefers_first_on_tie() {
        let samples = [
            RawActivitySample::new(raw::WALKING, 40),
            RawActivitySample::new(raw::STILL, 60),
            RawActivitySample::new(raw::TILTING, 60),
        ];
        let data = ActivityData::most_probable(&samples).unwrap();
        assert_eq!(data.activity_type, ActivityType::Still);
        assert_eq!(data.confidence, ActivityConfidence::Medium);
        assert!(ActivityData::most_probable(&[]).is_none());
    }

    proptest! {
        #[test]
        fn prop_confidence_bucket(c in -50i32..200) {
            let expected = if (75..=100).contains(&c) {
                ActivityConfidence::High
            } else if (50..75).contains(&c) {
                ActivityConfidence::Medium
            } else {
                ActivityConfidence::Low
            };
            prop_assert_eq!(ActivityConfidence::from_percent(c), expected);
        }
    }
}
