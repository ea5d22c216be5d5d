//! Flist URL checks.

use std::time::Duration;

use tracing::debug;

use crate::error::{WorkloadError, WorkloadsResult};

const CHECKSUM_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the md5 of an flist is published.
pub fn flist_checksum_url(url: &str) -> String {
    format!("{url}.md5")
}

/// Flists must end in `.fl` or `.flist`.
pub fn validate_flist_extension(url: &str) -> WorkloadsResult<()> {
    let file = url.rsplit('/').next().unwrap_or(url);
    let ext = file.rsplit_once('.').map(|(_, ext)| ext);
    match ext {
        Some("fl") | Some("flist") => Ok(()),
        _ => Err(WorkloadError::invalid(format!(
            "flist: '{url}' is invalid, should have a valid flist extension"
        ))),
    }
}

/// Fetch the published md5 of an flist.
pub async fn fetch_flist_checksum(url: &str) -> WorkloadsResult<String> {
    let client = reqwest::Client::builder().timeout(CHECKSUM_TIMEOUT).build()?;
    let body = client
        .get(flist_checksum_url(url))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(body.trim().to_string())
}

/// Extension check plus, when a checksum is given, compare it against the
/// published one.
pub async fn validate_flist(url: &str, checksum: &str) -> WorkloadsResult<()> {
    validate_flist_extension(url)?;
    if checksum.is_empty() {
        return Ok(());
    }
    let actual = fetch_flist_checksum(url).await?;
    debug!(flist = url, %actual, "fetched flist checksum");
    if actual != checksum {
        return Err(WorkloadError::ChecksumMismatch {
            given: checksum.to_string(),
            actual,
            url: flist_checksum_url(url),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert!(validate_flist_extension("https://hub.grid.tf/tf-official-apps/base:latest.flist").is_ok());
        assert!(validate_flist_extension("https://hub.grid.tf/a/b.fl").is_ok());
        let err = validate_flist_extension("https://hub.grid.tf/a/b.tar").unwrap_err();
        assert_eq!(
            err.to_string(),
            "flist: 'https://hub.grid.tf/a/b.tar' is invalid, should have a valid flist extension"
        );
        assert!(validate_flist_extension("https://hub.grid.tf/a/flist").is_err());
    }

    #[tokio::test]
    async fn test_no_checksum_skips_fetch() {
        validate_flist("http://127.0.0.1:1/x.flist", "").await.unwrap();
    }
}
