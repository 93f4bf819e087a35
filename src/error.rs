//! Run-level error taxonomy
//!
//! Only `UntrustedEgress` and `AuthenticationFailure` halt the workflow
//! before a quota read is obtained; everything later degrades into the
//! classifier. Per-strategy interaction failures and unparseable readouts
//! never surface here: strategies are swallowed inside the actuator and a
//! readout that parses to nothing becomes a zero that the classifier sees.

use crate::driver::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    /// The egress-identity probe failed. Fatal, pre-credential; gets its own
    /// report kind instead of the generic crash report.
    #[error("untrusted egress: {0}")]
    UntrustedEgress(String),

    /// Login did not land off the login page. Fatal.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// A navigation that is hard-fatal (login, probe) timed out.
    #[error("navigation timed out during {stage}")]
    NavigationTimeout { stage: &'static str },

    /// A driver failure on a step with no soft degradation path.
    #[error(transparent)]
    Driver(#[from] DriverError),
}
