//! Download conflict policy: the newer local copy wins.

use chrono::{DateTime, Utc};

/// What to do with one cloud file during a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadDecision {
    /// Overwrite local with the cloud content.
    Download,
    /// Local copy is strictly newer; leave it alone.
    KeepLocal,
}

/// Compare modification times. Without both timestamps there is nothing to
/// protect, so the cloud copy is fetched.
pub fn resolve_download(
    local_modified: Option<DateTime<Utc>>,
    cloud_modified: Option<DateTime<Utc>>,
) -> DownloadDecision {
    match (local_modified, cloud_modified) {
        (Some(local), Some(cloud)) if local > cloud => DownloadDecision::KeepLocal,
        _ => DownloadDecision::Download,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_strictly_newer_local_wins() {
        let now = Utc::now();
        assert_eq!(
            resolve_download(Some(now), Some(now - Duration::seconds(1))),
            DownloadDecision::KeepLocal
        );
        assert_eq!(resolve_download(Some(now), Some(now)), DownloadDecision::Download);
        assert_eq!(
            resolve_download(Some(now - Duration::seconds(1)), Some(now)),
            DownloadDecision::Download
        );
    }

    #[test]
    fn test_missing_timestamps_download() {
        let now = Utc::now();
        assert_eq!(resolve_download(None, Some(now)), DownloadDecision::Download);
        assert_eq!(resolve_download(Some(now), None), DownloadDecision::Download);
        assert_eq!(resolve_download(None, None), DownloadDecision::Download);
    }
}
