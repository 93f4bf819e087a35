//! Session/proxy guard
//!
//! Before any credentialed action, confirm which IP address the session is
//! visible as. The probe navigates the browser itself (not a side-channel
//! HTTP client) so the identity check exercises the exact egress path the
//! credentialed traffic will use. Fail-closed: a failed probe aborts the run;
//! there is no fallback to a direct connection.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::ProxyDescriptor;
use crate::driver::Page;
use crate::error::RunError;

const IP_ECHO_URL: &str = "https://api.ipify.org?format=json";
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct IpEcho {
    ip: String,
}

/// Resolve the egress identity through the session. Returns the observed IP
/// on success; any failure is a fatal [`RunError::UntrustedEgress`].
pub async fn verify_egress<P: Page>(
    page: &P,
    proxy: &ProxyDescriptor,
) -> Result<String, RunError> {
    let probe = async {
        page.goto(IP_ECHO_URL)
            .await
            .map_err(|e| format!("probe navigation failed: {}", e))?;
        let body = page
            .body_text()
            .await
            .map_err(|e| format!("probe body unreadable: {}", e))?;
        let echo: IpEcho = serde_json::from_str(body.trim())
            .map_err(|e| format!("probe returned no identity: {}", e))?;
        Ok::<String, String>(echo.ip)
    };

    let ip = timeout(PROBE_TIMEOUT, probe)
        .await
        .map_err(|_| RunError::UntrustedEgress("egress probe timed out".to_string()))?
        .map_err(RunError::UntrustedEgress)?;

    // Soft check only: the probe having succeeded at all is what matters.
    if let Some(prefix) = octet_prefix(&proxy.host) {
        if !ip.starts_with(&prefix) {
            warn!(observed = %ip, proxy = %proxy.host, "egress IP does not share the proxy's prefix");
        }
    }

    info!(ip = %ip, "egress identity confirmed");
    Ok(ip)
}

/// First two octets of the proxy host when it is an IPv4 literal; hostnames
/// yield nothing to compare against.
fn octet_prefix(host: &str) -> Option<String> {
    let addr: Ipv4Addr = host.parse().ok()?;
    let octets = addr.octets();
    Some(format!("{}.{}.", octets[0], octets[1]))
}
