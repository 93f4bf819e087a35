//! Power state reconciler
//!
//! Best-effort side action: if the dashboard shows the server offline, press
//! the start control once. Nothing here may block the renewal flow, so every
//! failure is logged and swallowed and the stage reports an explicit result
//! instead of raising.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::driver::Page;
use crate::markers;

const STATUS_SELECTOR: &str = ".status-text, .server-status";
const START_BUTTON: &str = "button.btn-start[title=\"Start Server\"]";

/// Returns whether a start was triggered. Single attempt, no retry.
pub async fn reconcile<P: Page>(page: &P) -> bool {
    let status = match page.text(STATUS_SELECTOR).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            info!("no status indicator found, skipping power check");
            return false;
        }
        Err(err) => {
            warn!(%err, "status read failed, skipping power check");
            return false;
        }
    };

    let normalized = markers::normalize_status(&status).unwrap_or("unrecognized");
    if !markers::is_offline(&status) {
        info!(status = normalized, "server not offline, no start needed");
        return false;
    }

    info!(status = normalized, "server looks offline, trying to start it");

    let visible = page.is_visible(START_BUTTON).await.unwrap_or(false);
    // An unreadable attribute counts as unavailable; never click blind.
    let disabled = match page.attribute(START_BUTTON, "disabled").await {
        Ok(attr) => attr.is_some(),
        Err(err) => {
            warn!(%err, "disabled check failed");
            true
        }
    };
    if !visible || disabled {
        warn!("start button unavailable, skipping start");
        return false;
    }

    match page.click(START_BUTTON).await {
        Ok(()) => {
            info!("start triggered");
            // Give the request a moment to leave; nothing waits on the result.
            sleep(Duration::from_secs(1)).await;
            true
        }
        Err(err) => {
            warn!(%err, "start click failed, continuing without it");
            false
        }
    }
}
