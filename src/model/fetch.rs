//! Placeholder detection and artifact download
//!
//! Large-file storage systems leave a small text pointer in place of the real
//! artifact when the repository is checked out without them. Such a pointer is
//! detected here and replaced by the real file, streamed over HTTP.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::utils::error::{DermaError, Result};
use crate::utils::logging::DownloadProgress;

/// Files at least this large are never treated as pointers
pub const POINTER_MAX_BYTES: u64 = 1024;

/// First-line markers of a pointer file
const POINTER_MARKERS: [&str; 2] = ["git-lfs", "version https"];

/// Whether the file at `path` is a pointer rather than a real artifact
pub fn is_pointer_file(path: &Path) -> Result<bool> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() >= POINTER_MAX_BYTES {
        return Ok(false);
    }

    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let first_line = text.lines().next().unwrap_or("");
    Ok(POINTER_MARKERS
        .iter()
        .any(|marker| first_line.contains(marker)))
}

/// Downloads an artifact to a destination path
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch `url` into `dest`, returning the number of bytes written
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>>;
}

/// Streams artifacts over HTTP with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Fetcher whose whole transfer is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dermavision/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DermaError::Download(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        info!("Downloading model from {}", url);

        let mut response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DermaError::Download(format!("timed out after {:?}", self.timeout))
            } else {
                DermaError::Download(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DermaError::Download(format!("server returned {}", status)));
        }

        let tmp_path = partial_path(dest);
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let mut progress = DownloadProgress::new("model", response.content_length());

        loop {
            let chunk = response.chunk().await.map_err(|e| {
                if e.is_timeout() {
                    DermaError::Download(format!("timed out after {:?}", self.timeout))
                } else {
                    DermaError::Download(format!("failed reading body: {}", e))
                }
            })?;
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            progress.advance(chunk.len());
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, dest).await?;
        progress.finish();
        Ok(progress.downloaded())
    }
}

impl ArtifactFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let result = self.download(url, dest).await;
            if result.is_err() {
                let tmp_path = partial_path(dest);
                if tmp_path.exists() {
                    if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
                        warn!("Failed to remove {}: {}", tmp_path.display(), e);
                    }
                }
            }
            result
        })
    }
}

/// Sibling file the download is streamed into before the final rename
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use axum::{routing::get, Router};

    use super::*;

    const LFS_POINTER: &str = "version https://git-lfs.github.com/spec/v1\noid sha256:4d7a\nsize 132735488\n";

    #[test]
    fn test_detects_lfs_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.dvg");
        std::fs::write(&path, LFS_POINTER).unwrap();
        assert!(is_pointer_file(&path).unwrap());

        std::fs::write(&path, "see git-lfs for the real file\n").unwrap();
        assert!(is_pointer_file(&path).unwrap());
    }

    #[test]
    fn test_small_non_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.dvg");
        std::fs::write(&path, b"\x10\x00\x00\x00\x00\x00\x00\x00{}").unwrap();
        assert!(!is_pointer_file(&path).unwrap());
    }

    #[test]
    fn test_large_file_is_never_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.dvg");
        let mut content = LFS_POINTER.as_bytes().to_vec();
        content.resize(POINTER_MAX_BYTES as usize, b' ');
        std::fs::write(&path, content).unwrap();
        assert!(!is_pointer_file(&path).unwrap());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_pointer_file(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_partial_path_is_sibling() {
        let p = partial_path(Path::new("/srv/models/skin_cancer_cnn.dvg"));
        assert_eq!(p, PathBuf::from("/srv/models/skin_cancer_cnn.dvg.part"));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_replaces_destination() {
        let base = serve(Router::new().route("/model", get(|| async { vec![7u8; 4096] }))).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.dvg");
        std::fs::write(&dest, LFS_POINTER).unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(10)).unwrap();
        let written = fetcher
            .fetch(&format!("{}/model", base), &dest)
            .await
            .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(std::fs::read(&dest).unwrap(), vec![7u8; 4096]);
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let base = serve(Router::new()).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.dvg");
        std::fs::write(&dest, LFS_POINTER).unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(10)).unwrap();
        let err = fetcher
            .fetch(&format!("{}/missing", base), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, DermaError::Download(_)));
        // The pointer is left in place.
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), LFS_POINTER);
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let result = fetcher
            .fetch("http://127.0.0.1:9/model", &dir.path().join("model.dvg"))
            .await;
        assert!(matches!(result, Err(DermaError::Download(_))));
    }
}
