//! Outcome report
//!
//! The terminal artifact of a run: one classification tag plus the context a
//! human needs, rendered once into Telegram HTML.

use chrono::{DateTime, Utc};

use crate::classify::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Success,
    AlreadyAtCap,
    Cooldown,
    Inconclusive,
    Anomaly,
    UntrustedEgress,
    Crash,
}

impl From<Outcome> for ReportKind {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => ReportKind::Success,
            Outcome::AlreadyAtCap => ReportKind::AlreadyAtCap,
            Outcome::Inconclusive => ReportKind::Inconclusive,
            Outcome::Anomaly => ReportKind::Anomaly,
        }
    }
}

impl ReportKind {
    fn title(&self) -> &'static str {
        match self {
            ReportKind::Success => "🎉 <b>GreatHost renewal succeeded</b>",
            ReportKind::AlreadyAtCap => "🈵 <b>GreatHost already at the cap</b>",
            ReportKind::Cooldown => "⏳ <b>GreatHost still cooling down</b>",
            ReportKind::Inconclusive => "⚠️ <b>GreatHost renewal not confirmed</b>",
            ReportKind::Anomaly => "🚨 <b>GreatHost anomalous readout</b>",
            ReportKind::UntrustedEgress => "🚨 <b>GreatHost egress check failed</b>",
            ReportKind::Crash => "🚨 <b>GreatHost run crashed</b>",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub kind: ReportKind,
    pub entity_id: String,
    pub server_started: bool,
    pub egress_ip: Option<String>,
    pub before_hours: Option<u32>,
    pub after_hours: Option<u32>,
    pub remaining_minutes: Option<u32>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeReport {
    pub fn new(kind: ReportKind, entity_id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            server_started: false,
            egress_ip: None,
            before_hours: None,
            after_hours: None,
            remaining_minutes: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    /// Render the single notification body. User-controlled text is escaped;
    /// the rest of the markup is ours.
    pub fn render_html(&self) -> String {
        let mut lines = vec![self.kind.title().to_string(), String::new()];

        lines.push(format!(
            "🆔 <b>Server ID:</b> <code>{}</code>",
            escape_html(&self.entity_id)
        ));

        if let Some(minutes) = self.remaining_minutes {
            lines.push(format!("⏳ <b>Remaining:</b> {} min", minutes));
        }

        match (self.before_hours, self.after_hours) {
            (Some(before), Some(after)) => {
                lines.push(format!("⏰ <b>Hours:</b> {} ➔ {}h", before, after));
            }
            (Some(before), None) => {
                lines.push(format!("⏰ <b>Hours:</b> {}h", before));
            }
            _ => {}
        }

        if let Some(detail) = &self.detail {
            lines.push(format!("💬 <b>Detail:</b> {}", escape_html(detail)));
        }

        lines.push(format!(
            "🚀 <b>Server:</b> {}",
            if self.server_started {
                "✅ start triggered"
            } else {
                "running"
            }
        ));

        if let Some(ip) = &self.egress_ip {
            lines.push(format!("🌐 <b>Egress IP:</b> <code>{}</code>", escape_html(ip)));
        }

        lines.push(format!(
            "📅 <b>Time:</b> {}",
            self.timestamp.format("%Y/%m/%d %H:%M:%S UTC")
        ));

        lines.join("\n")
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_report_carries_both_values() {
        let mut report = OutcomeReport::new(ReportKind::Success, "srv-9f2");
        report.before_hours = Some(80);
        report.after_hours = Some(100);
        let html = report.render_html();
        assert!(html.contains("renewal succeeded"));
        assert!(html.contains("80 ➔ 100h"));
        assert!(html.contains("<code>srv-9f2</code>"));
    }

    #[test]
    fn test_cooldown_report_shows_remaining_minutes() {
        let mut report = OutcomeReport::new(ReportKind::Cooldown, "srv-9f2");
        report.remaining_minutes = Some(23);
        report.before_hours = Some(45);
        let html = report.render_html();
        assert!(html.contains("cooling down"));
        assert!(html.contains("23 min"));
        assert!(html.contains("45h"));
    }

    #[test]
    fn test_start_trigger_flag_is_rendered() {
        let mut report = OutcomeReport::new(ReportKind::Inconclusive, "srv-9f2");
        report.server_started = true;
        assert!(report.render_html().contains("start triggered"));
    }

    #[test]
    fn test_detail_is_escaped() {
        let mut report = OutcomeReport::new(ReportKind::Crash, "unknown");
        report.detail = Some("element '<button>' not found".to_string());
        let html = report.render_html();
        assert!(html.contains("&lt;button&gt;"));
        assert!(!html.contains("'<button>'"));
    }
}
