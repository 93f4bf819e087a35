//! Renewal actuator
//!
//! Inspects the renewal control for a cooldown, and when the renewal is due
//! drives it through a redundant cascade of interaction strategies with
//! human-like pacing. No strategy's return is trusted as proof of renewal;
//! the postcondition (the counter moved) is what the classifier judges.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::classify::Observation;
use crate::config::Thresholds;
use crate::driver::{DriverError, Page};
use crate::error::RunError;
use crate::markers;
use crate::quota;

const RENEW_BUTTON: &str = "#renew-free-server-btn";
const ERROR_TOAST: &str = ".toast-error, .alert-danger";

/// State of the renewal control as rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Available,
    Cooling { remaining_minutes: u32 },
}

/// Trigger mechanisms, tried in order, each best-effort. Detectors keyed on
/// a single interaction style are why there are three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Pointer press at the control's center with a randomized hold.
    ForcedPress,
    /// Synthetic pointer/mouse event sequence dispatched at the control.
    SyntheticEvents,
    /// Direct invocation of the page's renewal handler, if reachable.
    InvokeHandler,
}

pub const CASCADE: [Strategy; 3] = [
    Strategy::ForcedPress,
    Strategy::SyntheticEvents,
    Strategy::InvokeHandler,
];

const SYNTHETIC_EVENTS_SCRIPT: &str = r#"(() => {
    const el = document.querySelector('#renew-free-server-btn');
    if (!el) return false;
    for (const type of ['pointerdown', 'mousedown', 'pointerup', 'mouseup', 'click']) {
        el.dispatchEvent(new MouseEvent(type, { bubbles: true, cancelable: true, view: window }));
    }
    return true;
})()"#;

const INVOKE_HANDLER_SCRIPT: &str = r#"(() => {
    if (typeof window.renewFreeServer === 'function') {
        window.renewFreeServer();
        return true;
    }
    return false;
})()"#;

/// Inspect the control's rendered content for the cooldown marker. When the
/// cooldown is active no interaction is attempted at all.
pub async fn check_cooldown<P: Page>(page: &P) -> Result<ControlState, RunError> {
    let content = page.inner_html(RENEW_BUTTON).await?.ok_or_else(|| {
        DriverError::Internal("renewal control not found on the detail page".to_string())
    })?;

    if content.contains(markers::COOLDOWN_MARKER) {
        let remaining_minutes = markers::first_integer(&content).unwrap_or(0);
        info!(remaining_minutes, "renewal is cooling down");
        return Ok(ControlState::Cooling { remaining_minutes });
    }
    Ok(ControlState::Available)
}

/// Trigger the renewal and re-observe. Everything in here is best-effort:
/// the result is always an [`Observation`] for the classifier, never an error.
pub async fn renew<P: Page>(page: &P, before_hours: u32, thresholds: &Thresholds) -> Observation {
    humanize(page).await;

    // Every applicable strategy fires; a dispatch that went through proves
    // nothing about the renewal, so none of them preempts the others.
    for strategy in CASCADE {
        match apply(page, strategy).await {
            Ok(true) => info!(?strategy, "renewal trigger dispatched"),
            Ok(false) => debug!(?strategy, "strategy not applicable"),
            Err(err) => warn!(?strategy, %err, "strategy failed"),
        }
    }

    // Backend propagation lags the rendered DOM by seconds.
    sleep(thresholds.settle).await;

    let error_text = page
        .text(ERROR_TOAST)
        .await
        .ok()
        .flatten()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Err(err) = page.reload().await {
        warn!(%err, "reload failed, re-reading in place");
    }

    let mut after_hours = quota::wait_hours(page, thresholds.readout_wait, true).await;
    if after_hours == 0 && before_hours > 0 {
        // Known flaky-render race: the readout briefly shows zero right
        // after a reload.
        warn!("readout dropped to zero against a non-zero baseline, re-reading once");
        sleep(Duration::from_secs(2)).await;
        after_hours = quota::wait_hours(page, thresholds.readout_wait, true).await;
    }

    Observation {
        before_hours,
        after_hours,
        error_text,
    }
}

/// Randomized scroll, think-delay, and a multi-step pointer path toward the
/// control. Defeats detectors keyed on instantaneous interaction. All random
/// draws happen up front so no generator is held across an await.
async fn humanize<P: Page>(page: &P) {
    let (scroll_offset, think_ms) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(120.0..600.0), rng.gen_range(400..1200))
    };

    if let Err(err) = page.scroll_by(scroll_offset).await {
        debug!(%err, "humanization scroll skipped");
    }
    sleep(Duration::from_millis(think_ms)).await;

    let bounds = match page.bounds(RENEW_BUTTON).await {
        Ok(Some(b)) => b,
        _ => return,
    };
    let (cx, cy) = bounds.center();

    let path: Vec<(f64, f64, u64)> = {
        let mut rng = rand::thread_rng();
        let steps = rng.gen_range(4..8);
        let mut x = cx - rng.gen_range(180.0..420.0);
        let mut y = cy - rng.gen_range(90.0..260.0);
        (0..steps)
            .map(|step| {
                let t = (step + 1) as f64 / steps as f64;
                x += (cx - x) * t + rng.gen_range(-6.0..6.0);
                y += (cy - y) * t + rng.gen_range(-4.0..4.0);
                (x, y, rng.gen_range(30..120))
            })
            .collect()
    };

    for (x, y, pause_ms) in path {
        if page.mouse_move(x, y).await.is_err() {
            return;
        }
        sleep(Duration::from_millis(pause_ms)).await;
    }
    let _ = page.mouse_move(cx, cy).await;
}

async fn apply<P: Page>(page: &P, strategy: Strategy) -> Result<bool, DriverError> {
    match strategy {
        Strategy::ForcedPress => {
            let Some(bounds) = page.bounds(RENEW_BUTTON).await? else {
                return Ok(false);
            };
            let (x, y) = bounds.center();
            let hold = Duration::from_millis(rand::thread_rng().gen_range(60..220));
            page.mouse_press(x, y, hold).await?;
            Ok(true)
        }
        Strategy::SyntheticEvents => {
            let value = page.eval(SYNTHETIC_EVENTS_SCRIPT).await?;
            Ok(value.as_bool().unwrap_or(false))
        }
        Strategy::InvokeHandler => {
            let value = page.eval(INVOKE_HANDLER_SCRIPT).await?;
            Ok(value.as_bool().unwrap_or(false))
        }
    }
}
