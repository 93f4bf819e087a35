//! hostkeeper: unattended GreatHost free-tier renewal.
//!
//! One process invocation is one run. Exit code 0 covers every run that
//! produced (or tried to produce) an outcome report, including handled
//! failures; only an unusable configuration exits nonzero, so a scheduler
//! retries configuration mistakes and nothing else.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hostkeeper::config::Config;
use hostkeeper::driver::ChromeSession;
use hostkeeper::notify::{Notify, TelegramNotifier};
use hostkeeper::quota::UNKNOWN_ENTITY;
use hostkeeper::report::{OutcomeReport, ReportKind};
use hostkeeper::run;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "configuration is unusable");
            return ExitCode::from(1);
        }
    };

    let notifier = TelegramNotifier::new(cfg.telegram.clone());

    let session = match ChromeSession::launch(cfg.proxy.as_ref(), cfg.no_sandbox).await {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "browser launch failed");
            let mut report = OutcomeReport::new(ReportKind::Crash, UNKNOWN_ENTITY);
            report.detail = Some(format!("browser launch failed: {}", err));
            if !notifier.send(&report.render_html()).await {
                return ExitCode::from(1);
            }
            return ExitCode::SUCCESS;
        }
    };

    let summary = run::execute(session, &cfg, &notifier).await;
    info!(kind = ?summary.kind, delivered = summary.delivered, "run finished");
    if summary.kind == ReportKind::Crash && !summary.delivered {
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
