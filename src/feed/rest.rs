//! One-shot REST depth snapshot fetch

use tracing::info;

use crate::config::Config;
use crate::parser::DepthSnapshot;

/// Fetch the full depth snapshot for the configured symbol.
///
/// Errors come back as strings; the caller treats any failure the same way
/// (log, back off, reconnect).
pub async fn fetch_depth_snapshot(
    client: &reqwest::Client,
    config: &Config,
) -> Result<DepthSnapshot, String> {
    let url = config.rest_depth_url();
    info!(url = %url, "Fetching depth snapshot");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| format!("snapshot request failed: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("snapshot request returned HTTP {status}"));
    }

    let body = response
        .text()
        .await
        .map_err(|e| format!("snapshot body read failed: {e}"))?;

    DepthSnapshot::parse(&body).map_err(|e| format!("snapshot parse failed: {e}"))
}
