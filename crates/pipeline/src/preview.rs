use std::time::Duration;

use {
    anyhow::{Result, bail},
    tracing::debug,
};

/// Browser-like client signature; some icon CDNs reject unknown agents.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Fetch the preview image for the caption message.
///
/// Callers treat any error as "no preview" and fall back to plain text.
pub async fn fetch_preview(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "image/*")
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        bail!("preview fetch returned HTTP {status}");
    }

    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        bail!("preview fetch returned an empty body");
    }
    debug!(url, len = bytes.len(), "fetched preview image");
    Ok(bytes.to_vec())
}
