//! Rendered-text markers and parsers
//!
//! The remote UI gives no structured feedback; every signal is inferred from
//! rendered text. This module is the only place that knows the exact wording,
//! so a wording change on the panel is a one-place fix.

use regex::Regex;
use std::sync::OnceLock;

/// Status words that mean the server is not running (case-insensitive;
/// includes the localized form the panel renders for some accounts).
pub const OFFLINE_MARKERS: [&str; 3] = ["offline", "stopped", "离线"];

/// Canonical status words the panel renders across its revisions.
pub const STATUS_VOCABULARY: [&str; 5] =
    ["running", "starting", "stopped", "offline", "suspended"];

/// Substring of the renewal control's content while the cooldown is active,
/// e.g. `Wait 23 min`.
pub const COOLDOWN_MARKER: &str = "Wait";

/// Substring of the panel's error toast when the accumulated-hours cap is
/// reached ("no more than 5 days").
pub const CAP_MARKER: &str = "5 días";

/// The quota readout's placeholder before the asynchronous data loads.
pub const HOURS_PLACEHOLDER: &str = "0 hours";

static INT_RE: OnceLock<Regex> = OnceLock::new();

/// Whether a status indicator matches the offline/stopped vocabulary.
pub fn is_offline(status: &str) -> bool {
    let lower = status.trim().to_lowercase();
    OFFLINE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Map a rendered status indicator onto the canonical vocabulary, if any
/// word of it is recognized.
pub fn normalize_status(status: &str) -> Option<&'static str> {
    let lower = status.trim().to_lowercase();
    if lower.contains("离线") {
        return Some("offline");
    }
    STATUS_VOCABULARY.iter().find(|w| lower.contains(*w)).copied()
}

/// Digit-extraction parser for the quota readout: strip everything that is
/// not an ASCII digit and parse the rest. Empty or non-numeric text reads as
/// zero, matching the panel's own placeholder.
pub fn extract_hours(text: &str) -> u32 {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return 0;
    }
    digits
        .parse::<u64>()
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

/// First integer in the text, e.g. the `23` in `Wait 23 min`.
pub fn first_integer(text: &str) -> Option<u32> {
    let re = INT_RE.get_or_init(|| Regex::new(r"\d+").expect("hardcoded pattern"));
    re.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Whether the quota readout has left its placeholder state: it shows at
/// least one digit and is not the literal `0 hours` placeholder.
pub fn readout_settled(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed != HOURS_PLACEHOLDER && trimmed.chars().any(|c| c.is_ascii_digit())
}

/// Whether the text carries any digits at all (the weaker post-reload check,
/// where a genuine zero is acceptable).
pub fn has_digits(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}
