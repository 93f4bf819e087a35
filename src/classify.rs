//! Outcome classifier
//!
//! Pure function over the before/after observation. There are no status
//! codes: the only progress metric is whether the rendered hours counter
//! moved, plus whatever the error toast said.

use crate::config::Thresholds;
use crate::markers;

/// Before/after measurement captured around the renewal action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub before_hours: u32,
    pub after_hours: u32,
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The counter moved up; the renewal took.
    Success,
    /// At or effectively at the backend's accumulation cap.
    AlreadyAtCap,
    /// Unchanged below the near-cap band; possibly propagation delay.
    Inconclusive,
    /// The counter moved down or the readings are otherwise inconsistent.
    /// Never auto-retried; flagged for manual review.
    Anomaly,
}

/// Rules are ordered: an increase always wins, then the cap evidence, then
/// the unchanged band, and anything left is an anomaly.
pub fn classify(observation: &Observation, thresholds: &Thresholds) -> Outcome {
    let Observation {
        before_hours: before,
        after_hours: after,
        error_text,
    } = observation;

    if after > before {
        return Outcome::Success;
    }

    let cap_reported = error_text
        .as_deref()
        .is_some_and(|text| text.contains(markers::CAP_MARKER));
    let unchanged = after == before;

    if cap_reported
        || *before >= thresholds.cap_hours
        || (unchanged && *after >= thresholds.near_cap_hours)
    {
        return Outcome::AlreadyAtCap;
    }

    if unchanged {
        return Outcome::Inconclusive;
    }

    Outcome::Anomaly
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(before: u32, after: u32, error_text: Option<&str>) -> Observation {
        Observation {
            before_hours: before,
            after_hours: after,
            error_text: error_text.map(|s| s.to_string()),
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds::default()
    }

    #[test]
    fn test_increase_is_success_regardless_of_error_text() {
        let t = thresholds();
        for (before, after) in [(0, 1), (45, 46), (80, 100), (119, 140)] {
            assert_eq!(classify(&obs(before, after, None), &t), Outcome::Success);
            assert_eq!(
                classify(&obs(before, after, Some("no puedes renovar: 5 días")), &t),
                Outcome::Success
            );
        }
    }

    #[test]
    fn test_at_or_over_hard_cap_is_already_at_cap() {
        let t = thresholds();
        for before in [120, 121, 125, 200] {
            assert_eq!(
                classify(&obs(before, before, None), &t),
                Outcome::AlreadyAtCap
            );
        }
    }

    #[test]
    fn test_unchanged_in_near_cap_band_is_already_at_cap() {
        let t = thresholds();
        for hours in 108..120 {
            assert_eq!(
                classify(&obs(hours, hours, None), &t),
                Outcome::AlreadyAtCap
            );
        }
    }

    #[test]
    fn test_cap_marker_in_error_text_is_already_at_cap() {
        let t = thresholds();
        assert_eq!(
            classify(&obs(115, 115, Some("No puedes acumular más de 5 días")), &t),
            Outcome::AlreadyAtCap
        );
    }

    #[test]
    fn test_unchanged_below_near_cap_is_inconclusive() {
        let t = thresholds();
        for hours in [0, 1, 45, 80, 107] {
            assert_eq!(
                classify(&obs(hours, hours, None), &t),
                Outcome::Inconclusive
            );
        }
    }

    #[test]
    fn test_decrease_is_anomaly() {
        let t = thresholds();
        for (before, after) in [(46, 45), (80, 0), (100, 99)] {
            assert_eq!(classify(&obs(before, after, None), &t), Outcome::Anomaly);
        }
    }

    #[test]
    fn test_thresholds_are_configuration_not_literals() {
        let t = Thresholds {
            cap_hours: 50,
            near_cap_hours: 40,
            ..Thresholds::default()
        };
        assert_eq!(classify(&obs(50, 50, None), &t), Outcome::AlreadyAtCap);
        assert_eq!(classify(&obs(45, 45, None), &t), Outcome::AlreadyAtCap);
        assert_eq!(classify(&obs(39, 39, None), &t), Outcome::Inconclusive);
    }
}
