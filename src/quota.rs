//! Quota locator
//!
//! Deterministic multi-hop navigation from the dashboard to the entity
//! detail surface, then extraction of the entity identifier and the
//! accumulated-hours readout. Hop failures propagate (there is nothing to
//! renew without the detail page); readout waits degrade softly because a
//! stale report still outranks silence.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::Thresholds;
use crate::driver::{DriverError, Page};
use crate::error::RunError;
use crate::markers;

const BILLING_BUTTON: &str = ".btn-billing-compact";
pub const ACCUMULATED_TIME: &str = "#accumulated-time";

/// Identifier fallback when the detail URL carries no usable path segment.
pub const UNKNOWN_ENTITY: &str = "unknown";

const READOUT_POLL: Duration = Duration::from_millis(500);

/// CSS cannot match on text, so the detail link is resolved by script.
const DETAIL_HREF_SCRIPT: &str = r#"(() => {
    const links = Array.from(document.querySelectorAll('a'));
    const link = links.find(a => (a.textContent || '').includes('View Details'));
    return link ? link.href : null;
})()"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaEntity {
    pub id: String,
    pub accumulated_hours: u32,
}

/// Navigate dashboard → billing → entity detail and read the quota state.
pub async fn locate<P: Page>(page: &P, thresholds: &Thresholds) -> Result<QuotaEntity, RunError> {
    info!("opening billing");
    page.click(BILLING_BUTTON).await?;
    sleep(thresholds.hop_settle).await;

    let href = detail_href(page).await?;
    info!(href = %href, "opening entity detail");
    page.goto(&href).await?;
    sleep(thresholds.hop_settle).await;

    let url = page.current_url().await.unwrap_or_default();
    let id = entity_id(&url);
    info!(id = %id, "entity locked");

    let accumulated_hours = wait_hours(page, thresholds.readout_wait, false).await;
    info!(hours = accumulated_hours, "quota readout");

    Ok(QuotaEntity {
        id,
        accumulated_hours,
    })
}

async fn detail_href<P: Page>(page: &P) -> Result<String, RunError> {
    let value = page.eval(DETAIL_HREF_SCRIPT).await?;
    match value.as_str() {
        Some(href) if !href.is_empty() => Ok(href.to_string()),
        _ => Err(RunError::Driver(DriverError::Internal(
            "'View Details' link not found on the billing page".to_string(),
        ))),
    }
}

/// Last path segment of the detail URL, or the sentinel when absent.
pub fn entity_id(url: &str) -> String {
    let trimmed = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(segment) if !segment.is_empty() && !segment.contains('.') && !segment.contains(':') => {
            segment.to_string()
        }
        _ => UNKNOWN_ENTITY.to_string(),
    }
}

/// Wait for the readout to carry a real value, degrading to the best-known
/// parse on timeout. With `accept_zero` the weaker post-reload rule applies:
/// any digits count, so a genuine zero is accepted.
pub async fn wait_hours<P: Page>(page: &P, within: Duration, accept_zero: bool) -> u32 {
    let deadline = Instant::now() + within;
    let mut last_seen = String::new();
    loop {
        if let Ok(Some(text)) = page.text(ACCUMULATED_TIME).await {
            let settled = if accept_zero {
                markers::has_digits(&text)
            } else {
                markers::readout_settled(&text)
            };
            if settled {
                return markers::extract_hours(&text);
            }
            last_seen = text;
        }
        if Instant::now() >= deadline {
            warn!(last = %last_seen.trim(), "quota readout never settled, using best-known value");
            return markers::extract_hours(&last_seen);
        }
        sleep(READOUT_POLL).await;
    }
}
