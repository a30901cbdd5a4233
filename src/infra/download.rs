//! HTTP download functionality
//!
//! Handles downloading files with progress reporting, streamed checksum
//! verification, mirror fallback, and retry with exponential backoff.

use futures::StreamExt;
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::defaults;
use crate::core::recipe::{Checksum, HashAlgorithm};
use crate::error::DownloadError;
use crate::infra::retry::RetryPolicy;

/// Progress callback type for download progress reporting
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Download result containing file path and metadata
#[derive(Debug)]
pub struct DownloadResult {
    /// Path to the downloaded file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Hex digest of the downloaded content
    pub checksum: String,
}

/// Verified download obtained from one of several URLs
#[derive(Debug)]
pub struct MirrorDownload {
    /// The download itself
    pub result: DownloadResult,
    /// URL that served the artifact
    pub url: String,
    /// Number of URLs abandoned before this one
    pub fallbacks: usize,
}

/// Incremental digest over one of the supported algorithms
pub enum ContentHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl ContentHasher {
    /// Start a digest
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    /// Feed bytes
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

fn build_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Download manager for fetching files with retry and mirror fallback
#[derive(Debug, Clone)]
pub struct DownloadManager {
    /// HTTP client
    client: reqwest::Client,
    /// Retry policy applied to every URL
    policy: RetryPolicy,
}

impl DownloadManager {
    /// Create a new download manager
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default(), defaults::DOWNLOAD_TIMEOUT_SECS)
    }

    /// Create a download manager with custom settings
    pub fn with_policy(policy: RetryPolicy, timeout_secs: u64) -> Self {
        Self {
            client: build_client(timeout_secs),
            policy,
        }
    }

    /// Download a file with retry logic
    ///
    /// Connection errors, 5xx and 429 are retried; other statuses are not.
    /// A partial file is removed when every attempt fails.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        algorithm: HashAlgorithm,
        progress: Option<&ProgressCallback>,
    ) -> Result<DownloadResult, DownloadError> {
        let result = self
            .policy
            .run(url, DownloadError::is_retryable, || {
                self.download_once(url, dest, algorithm, progress)
            })
            .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    /// Single download attempt without retry
    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        algorithm: HashAlgorithm,
        progress: Option<&ProgressCallback>,
    ) -> Result<DownloadResult, DownloadError> {
        tracing::debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::NetworkError {
                url: url.to_string(),
                error: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total_size = response.content_length().unwrap_or(0);

        // Create parent directories if needed
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::IoError {
                    path: parent.to_path_buf(),
                    error: e.to_string(),
                })?;
        }

        let mut file = File::create(dest)
            .await
            .map_err(|e| DownloadError::IoError {
                path: dest.to_path_buf(),
                error: e.to_string(),
            })?;

        let mut hasher = ContentHasher::new(algorithm);
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| DownloadError::NetworkError {
                url: url.to_string(),
                error: e.to_string(),
            })?;

            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::IoError {
                    path: dest.to_path_buf(),
                    error: e.to_string(),
                })?;

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(cb) = progress {
                cb(downloaded, total_size);
            }
        }

        file.flush().await.map_err(|e| DownloadError::IoError {
            path: dest.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(DownloadResult {
            path: dest.to_path_buf(),
            size: downloaded,
            checksum: hasher.finalize_hex(),
        })
    }

    /// Download a file and verify its checksum
    ///
    /// A mismatching download is deleted.
    pub async fn download_verified(
        &self,
        url: &str,
        dest: &Path,
        expected: &Checksum,
        progress: Option<&ProgressCallback>,
    ) -> Result<DownloadResult, DownloadError> {
        let result = self.download(url, dest, expected.algorithm, progress).await?;

        if !expected.matches(&result.checksum) {
            // Delete corrupted download
            let _ = tokio::fs::remove_file(dest).await;

            return Err(DownloadError::ChecksumMismatch {
                file: dest.display().to_string(),
                expected: expected.digest.clone(),
                actual: result.checksum,
            });
        }

        Ok(result)
    }

    /// Download from the first URL that works, in order
    ///
    /// Each URL gets the full retry policy. A checksum mismatch stops the
    /// search immediately.
    pub async fn download_from_mirrors(
        &self,
        urls: &[&str],
        dest: &Path,
        expected: &Checksum,
        progress: Option<&ProgressCallback>,
    ) -> Result<MirrorDownload, DownloadError> {
        let mut attempts = Vec::new();

        for (index, url) in urls.iter().enumerate() {
            if index > 0 {
                tracing::warn!("Falling back to mirror {url}");
            }

            match self.download_verified(url, dest, expected, progress).await {
                Ok(result) => {
                    return Ok(MirrorDownload {
                        result,
                        url: (*url).to_string(),
                        fallbacks: index,
                    });
                }
                Err(e @ DownloadError::ChecksumMismatch { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!("Download from {url} failed: {e}");
                    attempts.push(format!("{url}: {e}"));
                }
            }
        }

        Err(DownloadError::MirrorsExhausted { attempts })
    }

    /// Fetch a small text resource with retry
    pub async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        self.policy
            .run(url, DownloadError::is_retryable, || async move {
                let response =
                    self.client
                        .get(url)
                        .send()
                        .await
                        .map_err(|e| DownloadError::NetworkError {
                            url: url.to_string(),
                            error: e.to_string(),
                        })?;

                if !response.status().is_success() {
                    return Err(DownloadError::HttpStatus {
                        url: url.to_string(),
                        status: response.status().as_u16(),
                    });
                }

                response.text().await.map_err(|e| DownloadError::NetworkError {
                    url: url.to_string(),
                    error: e.to_string(),
                })
            })
            .await
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the hex digest of a file
pub fn file_checksum(path: &Path, algorithm: HashAlgorithm) -> Result<String, DownloadError> {
    let io_err = |e: std::io::Error| DownloadError::IoError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut hasher = ContentHasher::new(algorithm);
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(io_err)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize_hex())
}

/// Verify the checksum of a file
pub fn verify_checksum(path: &Path, expected: &Checksum) -> Result<bool, DownloadError> {
    Ok(expected.matches(&file_checksum(path, expected.algorithm)?))
}

/// Compute the hex digest of data
pub fn compute_checksum(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = ContentHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sha256(data: &[u8]) -> Checksum {
        Checksum::parse(&format!("sha256:{}", compute_checksum(data, HashAlgorithm::Sha256))).unwrap()
    }

    fn fast_manager(retries: u32) -> DownloadManager {
        DownloadManager::with_policy(RetryPolicy::new(retries, 1, 5), 10)
    }

    // ============================================
    // Unit Tests - Checksum verification
    // ============================================

    #[test]
    fn test_compute_checksum() {
        // Known SHA256 of "hello world"
        assert_eq!(
            compute_checksum(b"hello world", HashAlgorithm::Sha256),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_compute_checksum_sha512() {
        let checksum = compute_checksum(b"", HashAlgorithm::Sha512);
        assert_eq!(checksum.len(), 128);
        assert!(checksum.starts_with("cf83e1357eefb8bd"));
    }

    #[test]
    fn test_verify_checksum_case_insensitive() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");
        std::fs::write(&file_path, b"hello world").unwrap();

        let upper = Checksum::parse(
            "sha256:B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9",
        )
        .unwrap();
        assert!(verify_checksum(&file_path, &upper).unwrap());

        let wrong = Checksum::parse(&format!("sha256:{}", "0".repeat(64))).unwrap();
        assert!(!verify_checksum(&file_path, &wrong).unwrap());
    }

    #[test]
    fn test_verify_checksum_file_not_found() {
        let sum = Checksum::parse(&"0".repeat(64)).unwrap();
        assert!(verify_checksum(Path::new("/nonexistent/file.txt"), &sum).is_err());
    }

    // ============================================
    // Async Tests - Download functionality
    // ============================================

    #[tokio::test]
    async fn test_download_verified_success() {
        let mock_server = MockServer::start().await;
        let content = b"verified content";

        Mock::given(method("GET"))
            .and(path("/verified.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("verified.tar.gz");

        let result = fast_manager(0)
            .download_verified(
                &format!("{}/verified.tar.gz", mock_server.uri()),
                &dest,
                &sha256(content),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.size, content.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), content);
    }

    #[tokio::test]
    async fn test_download_verified_checksum_mismatch() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/wrong.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("wrong.tar.gz");

        let result = fast_manager(0)
            .download_verified(
                &format!("{}/wrong.tar.gz", mock_server.uri()),
                &dest,
                &sha256(b"original"),
                None,
            )
            .await;

        match result {
            Err(DownloadError::ChecksumMismatch { .. }) => {}
            other => panic!("Expected ChecksumMismatch error, got: {other:?}"),
        }

        // File should be deleted after checksum failure
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_retry_on_server_error() {
        let mock_server = MockServer::start().await;
        let content = b"retry content";

        // First two requests fail, third succeeds
        Mock::given(method("GET"))
            .and(path("/retry.txt"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/retry.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("retry.txt");

        let result = fast_manager(2)
            .download_verified(
                &format!("{}/retry.txt", mock_server.uri()),
                &dest,
                &sha256(content),
                None,
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing.txt"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("missing.txt");

        let result = fast_manager(3)
            .download(
                &format!("{}/missing.txt", mock_server.uri()),
                &dest,
                HashAlgorithm::Sha256,
                None,
            )
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_mirror_fallback_counts_fallbacks() {
        let mock_server = MockServer::start().await;
        let content = b"mirror content";

        Mock::given(method("GET"))
            .and(path("/primary.tar.gz"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/mirror.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("artifact.tar.gz");
        let primary = format!("{}/primary.tar.gz", mock_server.uri());
        let mirror = format!("{}/mirror.tar.gz", mock_server.uri());

        let outcome = fast_manager(1)
            .download_from_mirrors(&[&primary, &mirror], &dest, &sha256(content), None)
            .await
            .unwrap();

        assert_eq!(outcome.fallbacks, 1);
        assert_eq!(outcome.url, mirror);
    }

    #[tokio::test]
    async fn test_mirrors_exhausted_lists_every_url() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("artifact.tar.gz");
        let a = format!("{}/a.tar.gz", mock_server.uri());
        let b = format!("{}/b.tar.gz", mock_server.uri());

        let result = fast_manager(0)
            .download_from_mirrors(&[&a, &b], &dest, &sha256(b"x"), None)
            .await;

        match result {
            Err(DownloadError::MirrorsExhausted { attempts }) => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].starts_with(&a));
                assert!(attempts[1].starts_with(&b));
            }
            other => panic!("Expected MirrorsExhausted, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_text() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/fix.patch"))
            .respond_with(ResponseTemplate::new(200).set_body_string("--- a/x\n+++ b/x\n"))
            .mount(&mock_server)
            .await;

        let text = fast_manager(0)
            .fetch_text(&format!("{}/fix.patch", mock_server.uri()))
            .await
            .unwrap();
        assert!(text.starts_with("--- a/x"));
    }

    // ============================================
    // Property-Based Tests
    // ============================================

    /// Strategy for generating random byte data
    fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), 0..1000)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// File verification agrees with in-memory digests
        #[test]
        fn prop_checksum_verification(data in data_strategy()) {
            let temp = TempDir::new().unwrap();
            let file_path = temp.path().join("test.bin");
            std::fs::write(&file_path, &data).unwrap();

            prop_assert!(verify_checksum(&file_path, &sha256(&data)).unwrap());

            let wrong = Checksum::parse(&"0".repeat(64)).unwrap();
            if !wrong.matches(&compute_checksum(&data, HashAlgorithm::Sha256)) {
                prop_assert!(!verify_checksum(&file_path, &wrong).unwrap());
            }
        }

        /// Digests are lowercase hex of the algorithm's length
        #[test]
        fn prop_checksum_format(data in data_strategy()) {
            for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
                let checksum = compute_checksum(&data, algorithm);
                prop_assert_eq!(checksum.len(), algorithm.hex_len());
                prop_assert!(checksum.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
            }
        }
    }
}
