//! Run orchestrator
//!
//! Owns the single failure boundary of a run: the workflow future is caught
//! on both the error and the panic path, the session is closed exactly once
//! afterward, and exactly one outcome report goes out regardless of how the
//! run ended.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{info, warn};

use crate::actuator::{self, ControlState};
use crate::auth;
use crate::classify::{self, Observation, Outcome};
use crate::config::Config;
use crate::driver::{Page, Session};
use crate::error::RunError;
use crate::guard;
use crate::notify::Notify;
use crate::power;
use crate::quota::{self, UNKNOWN_ENTITY};
use crate::report::{OutcomeReport, ReportKind};

/// State the workflow fills in as it progresses, available to the report
/// builder even when the workflow dies partway through.
#[derive(Debug)]
pub struct RunContext {
    pub server_started: bool,
    pub egress_ip: Option<String>,
    pub entity_id: String,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            server_started: false,
            egress_ip: None,
            entity_id: UNKNOWN_ENTITY.to_string(),
        }
    }
}

/// How a completed workflow ended.
#[derive(Debug)]
pub enum Verdict {
    Cooldown { remaining_minutes: u32, hours: u32 },
    Classified { observation: Observation, outcome: Outcome },
}

/// What `execute` hands back to the binary.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub kind: ReportKind,
    pub delivered: bool,
}

/// The renewal workflow proper: guard, login, power, locate, then either the
/// cooldown short-circuit or the renew-and-classify branch.
async fn workflow<P: Page>(
    page: &P,
    cfg: &Config,
    ctx: &mut RunContext,
) -> Result<Verdict, RunError> {
    if let Some(proxy) = &cfg.proxy {
        let ip = guard::verify_egress(page, proxy).await?;
        info!(ip = %ip, "egress verified");
        ctx.egress_ip = Some(ip);
    }

    auth::login(page, &cfg.credentials, cfg.thresholds.login_verify).await?;

    ctx.server_started = power::reconcile(page).await;

    let entity = quota::locate(page, &cfg.thresholds).await?;
    ctx.entity_id = entity.id.clone();

    match actuator::check_cooldown(page).await? {
        ControlState::Cooling { remaining_minutes } => Ok(Verdict::Cooldown {
            remaining_minutes,
            hours: entity.accumulated_hours,
        }),
        ControlState::Available => {
            let observation =
                actuator::renew(page, entity.accumulated_hours, &cfg.thresholds).await;
            let outcome = classify::classify(&observation, &cfg.thresholds);
            info!(?outcome, before = observation.before_hours, after = observation.after_hours, "run classified");
            Ok(Verdict::Classified {
                observation,
                outcome,
            })
        }
    }
}

/// Run the workflow inside the failure boundary, close the session, and send
/// the single outcome report.
pub async fn execute<S: Session, N: Notify>(session: S, cfg: &Config, notifier: &N) -> RunSummary {
    let mut ctx = RunContext::default();

    let result = AssertUnwindSafe(workflow(session.page(), cfg, &mut ctx))
        .catch_unwind()
        .await;

    // Teardown happens exactly once, before any reporting, so a dangling
    // browser never outlives the run.
    if let Err(err) = session.close().await {
        warn!(%err, "session teardown failed");
    }

    let mut report = match result {
        Ok(Ok(Verdict::Cooldown {
            remaining_minutes,
            hours,
        })) => {
            let mut r = OutcomeReport::new(ReportKind::Cooldown, &ctx.entity_id);
            r.remaining_minutes = Some(remaining_minutes);
            r.before_hours = Some(hours);
            r
        }
        Ok(Ok(Verdict::Classified {
            observation,
            outcome,
        })) => {
            let mut r = OutcomeReport::new(ReportKind::from(outcome), &ctx.entity_id);
            r.before_hours = Some(observation.before_hours);
            r.after_hours = Some(observation.after_hours);
            r.detail = observation.error_text;
            r
        }
        Ok(Err(RunError::UntrustedEgress(detail))) => {
            warn!(detail = %detail, "egress untrusted, no credential was submitted");
            let mut r = OutcomeReport::new(ReportKind::UntrustedEgress, &ctx.entity_id);
            r.detail = Some(detail);
            r
        }
        Ok(Err(err)) => {
            warn!(%err, "workflow failed");
            let mut r = OutcomeReport::new(ReportKind::Crash, &ctx.entity_id);
            r.detail = Some(err.to_string());
            r
        }
        Err(panic) => {
            let detail = panic_message(panic);
            warn!(detail = %detail, "workflow panicked");
            let mut r = OutcomeReport::new(ReportKind::Crash, &ctx.entity_id);
            r.detail = Some(detail);
            r
        }
    };
    report.server_started = ctx.server_started;
    report.egress_ip = ctx.egress_ip;

    let delivered = notifier.send(&report.render_html()).await;
    if !delivered {
        warn!("outcome report was not delivered");
    }

    RunSummary {
        kind: report.kind,
        delivered,
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
