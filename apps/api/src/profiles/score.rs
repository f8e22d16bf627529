//! Score normalisation shared by the comparator and the timeline.
//!
//! Every score read from a profile is clamped to [0, 100]. Missing,
//! non-numeric, or non-finite input reads as 0 and is flagged so callers can
//! surface it instead of propagating NaN.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// A score after normalisation, with a flag recording whether the raw input was usable.
///
/// Deserializes from any JSON value through `read_json_score`, so a bad score
/// inside a profile payload never fails the payload. Serializes as the bare value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreReading {
    pub value: f64,
    pub valid: bool,
}

impl Default for ScoreReading {
    fn default() -> Self {
        Self {
            value: 0.0,
            valid: true,
        }
    }
}

impl<'de> Deserialize<'de> for ScoreReading {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(read_json_score(&raw))
    }
}

impl Serialize for ScoreReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value)
    }
}

/// Clamps a raw numeric score. Non-finite input reads as 0 and is flagged.
pub fn read_score(raw: f64) -> ScoreReading {
    if raw.is_finite() {
        ScoreReading {
            value: raw.clamp(MIN_SCORE, MAX_SCORE),
            valid: true,
        }
    } else {
        warn!("Non-finite score {raw} treated as 0");
        ScoreReading {
            value: 0.0,
            valid: false,
        }
    }
}

/// Reads a nullable stored score. A missing score is 0 but not flagged as invalid.
pub fn read_optional_score(raw: Option<f64>) -> ScoreReading {
    match raw {
        Some(v) => read_score(v),
        None => ScoreReading::default(),
    }
}

/// Reads a score out of loosely-typed JSON (LLM output): numbers and numeric strings.
pub fn read_json_score(raw: &Value) -> ScoreReading {
    match raw {
        Value::Number(n) => n.as_f64().map(read_score).unwrap_or(ScoreReading {
            value: 0.0,
            valid: false,
        }),
        Value::String(s) => match s.trim().trim_end_matches('%').parse::<f64>() {
            Ok(v) => read_score(v),
            Err(_) => {
                warn!("Unparseable score '{s}' treated as 0");
                ScoreReading {
                    value: 0.0,
                    valid: false,
                }
            }
        },
        Value::Null => ScoreReading::default(),
        other => {
            warn!("Score of unexpected type {other} treated as 0");
            ScoreReading {
                value: 0.0,
                valid: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clamps_above_range() {
        assert_eq!(read_score(140.0).value, 100.0);
    }

    #[test]
    fn test_clamps_below_range() {
        assert_eq!(read_score(-3.0).value, 0.0);
    }

    #[test]
    fn test_nan_is_zero_and_flagged() {
        let r = read_score(f64::NAN);
        assert_eq!(r.value, 0.0);
        assert!(!r.valid);
    }

    #[test]
    fn test_missing_score_is_zero() {
        let r = read_optional_score(None);
        assert_eq!(r.value, 0.0);
        assert!(r.valid);
    }

    #[test]
    fn test_json_numeric_string() {
        assert_eq!(read_json_score(&json!("72.5")).value, 72.5);
        assert_eq!(read_json_score(&json!("85%")).value, 85.0);
    }

    #[test]
    fn test_json_garbage_flagged() {
        let r = read_json_score(&json!("excellent"));
        assert_eq!(r.value, 0.0);
        assert!(!r.valid);
        assert!(!read_json_score(&json!([1, 2])).valid);
    }

    #[test]
    fn test_deserialize_reads_leniently() {
        let readings: Vec<ScoreReading> =
            serde_json::from_value(json!([null, "80", "high", 250])).unwrap();
        assert_eq!(readings[0], ScoreReading::default());
        assert_eq!(readings[1].value, 80.0);
        assert!(readings[1].valid);
        assert_eq!(readings[2].value, 0.0);
        assert!(!readings[2].valid);
        assert_eq!(readings[3].value, 100.0);
    }

    #[test]
    fn test_serializes_as_value() {
        let reading = read_score(140.0);
        assert_eq!(serde_json::to_value(reading).unwrap(), json!(100.0));
    }
}
