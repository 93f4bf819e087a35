//! Authenticator
//!
//! Submits the login form and verifies success by the post-submit URL no
//! longer containing the login path, which is stronger than a fixed timer.
//! Every failure here is fatal.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::info;

use crate::config::Credentials;
use crate::driver::{DriverError, Page};
use crate::error::RunError;

pub const LOGIN_URL: &str = "https://greathost.es/login";
pub const LOGIN_PATH: &str = "/login";

const EMAIL_INPUT: &str = "input[name=\"email\"]";
const PASSWORD_INPUT: &str = "input[name=\"password\"]";
const SUBMIT_BUTTON: &str = "button[type=\"submit\"]";

const VERIFY_POLL: Duration = Duration::from_millis(500);

fn auth_failure(err: DriverError) -> RunError {
    match err {
        DriverError::Timeout(_) => RunError::NavigationTimeout { stage: "login" },
        other => RunError::AuthenticationFailure(other.to_string()),
    }
}

/// Establish the authenticated session. `verify_within` bounds the wait for
/// the post-submit URL to leave the login path.
pub async fn login<P: Page>(
    page: &P,
    credentials: &Credentials,
    verify_within: Duration,
) -> Result<(), RunError> {
    info!(url = LOGIN_URL, "opening login page");
    page.goto(LOGIN_URL).await.map_err(auth_failure)?;
    page.fill(EMAIL_INPUT, &credentials.email)
        .await
        .map_err(auth_failure)?;
    page.fill(PASSWORD_INPUT, &credentials.password)
        .await
        .map_err(auth_failure)?;
    page.click(SUBMIT_BUTTON).await.map_err(auth_failure)?;

    let deadline = Instant::now() + verify_within;
    loop {
        let url = page.current_url().await.unwrap_or_default();
        if !url.is_empty() && !url.contains(LOGIN_PATH) {
            info!("login confirmed");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(RunError::AuthenticationFailure(format!(
                "still on the login page after {:.0?}",
                verify_within
            )));
        }
        sleep(VERIFY_POLL).await;
    }
}
