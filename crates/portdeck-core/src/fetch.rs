use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use portdeck_domain::EngineError;
use reqwest::blocking::Client;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};

use crate::callback::{Callback, ProgressHint};

const USER_AGENT: &str = concat!("portdeck/", env!("CARGO_PKG_VERSION"));
pub(crate) const DOWNLOAD_ATTEMPTS: usize = 3;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub(crate) struct FetchedFile {
    pub(crate) size: u64,
    pub(crate) sha256: String,
}

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")
}

/// Fetches a small textual resource (a source index) in one shot.
pub(crate) fn fetch_text(url: &str) -> Result<String> {
    let client = http_client()?;
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("unexpected response for {url}"))?;
    response.text().with_context(|| format!("stream error for {url}"))
}

/// Streams `url` to `dest`, hashing while writing and reporting progress.
///
/// Partial transfers are kept in a sibling `.part` file between the bounded
/// retry attempts and resumed with a Range request when the server answers
/// 206; otherwise the transfer restarts from zero. The destination only
/// appears once the transfer is complete.
///
/// # Errors
/// Returns [`EngineError::DownloadFailed`] once every attempt is exhausted.
pub(crate) fn download_file(
    url: &str,
    dest: &Path,
    label: &str,
    expected_total: Option<u64>,
    callback: &dyn Callback,
) -> Result<FetchedFile> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| EngineError::Filesystem(err.to_string()))?;
    }
    let part = part_path(dest);
    let client = http_client()?;

    let mut last_err = None;
    for _ in 0..DOWNLOAD_ATTEMPTS {
        match download_attempt(&client, url, &part, label, expected_total, callback) {
            Ok(fetched) => {
                fs::rename(&part, dest)
                    .map_err(|err| EngineError::Filesystem(err.to_string()))?;
                return Ok(fetched);
            }
            Err(err) => last_err = Some(err),
        }
    }

    let _ = fs::remove_file(&part);
    Err(EngineError::DownloadFailed {
        url: url.to_string(),
        reason: last_err.map_or_else(|| "no attempts left".to_string(), |err| format!("{err:#}")),
    }
    .into())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map_or_else(
        || std::ffi::OsString::from("download"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".part");
    dest.with_file_name(name)
}

fn download_attempt(
    client: &Client,
    url: &str,
    part: &Path,
    label: &str,
    expected_total: Option<u64>,
    callback: &dyn Callback,
) -> Result<FetchedFile> {
    let existing = fs::metadata(part).map(|meta| meta.len()).unwrap_or(0);
    let mut request = client.get(url);
    if existing > 0 {
        request = request.header(RANGE, format!("bytes={existing}-"));
    }
    let mut response = request
        .send()
        .with_context(|| format!("failed to fetch {url}"))?;
    let resuming = existing > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
    if !response.status().is_success() {
        anyhow::bail!("unexpected response {} for {url}", response.status());
    }

    let mut hasher = Sha256::new();
    let mut written: u64;
    let mut file = if resuming {
        hash_existing(part, &mut hasher)?;
        written = existing;
        OpenOptions::new().append(true).open(part)?
    } else {
        written = 0;
        File::create(part)?
    };

    let total = expected_total
        .filter(|size| *size > 0)
        .or_else(|| response.content_length().map(|len| len + written));

    callback.progress(None, written, total, ProgressHint::Data);
    let mut last_emit = Instant::now();
    let mut buffer = vec![0_u8; 64 * 1024];
    loop {
        let read = response
            .read(&mut buffer)
            .with_context(|| format!("stream error for {url}"))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        file.write_all(&buffer[..read])?;
        written += read as u64;
        if last_emit.elapsed() >= PROGRESS_INTERVAL {
            callback.progress(Some(label), written, total, ProgressHint::Data);
            last_emit = Instant::now();
        }
    }
    file.flush()?;
    callback.progress(Some(label), written, total, ProgressHint::Data);

    Ok(FetchedFile {
        size: written,
        sha256: hex::encode(hasher.finalize()),
    })
}

fn hash_existing(part: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut file = File::open(part)?;
    let mut buffer = vec![0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            return Ok(());
        }
        hasher.update(&buffer[..read]);
    }
}

pub(crate) fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::testing::RecordingCallback;
    use crate::testserver::TestServer;

    #[test]
    fn downloads_and_hashes_a_file() -> Result<()> {
        let body = b"portdeck fixture body".to_vec();
        let server = TestServer::serve(body.clone(), 1);
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("fixture.bin");
        let callback = RecordingCallback::default();

        let fetched = download_file(server.url(), &dest, "fixture", None, &callback)?;

        assert_eq!(fetched.size, body.len() as u64);
        assert_eq!(fs::read(&dest)?, body);
        assert_eq!(fetched.sha256, compute_sha256(&dest)?);
        assert!(!dest.with_file_name("fixture.bin.part").exists());
        let progress = callback.progress.lock().unwrap();
        assert!(
            progress.iter().any(|(_, amount, _)| *amount == body.len() as u64),
            "final progress call should report the full size"
        );
        Ok(())
    }

    #[test]
    fn retries_after_dropped_connections() -> Result<()> {
        let body = b"retry fixture".to_vec();
        let server = TestServer::flaky(body.clone(), 1, 2);
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("fixture.bin");

        let fetched = download_file(server.url(), &dest, "fixture", None, &crate::NullCallback)?;
        assert_eq!(fetched.size, body.len() as u64);
        assert_eq!(fs::read(&dest)?, body);
        Ok(())
    }

    #[test]
    fn exhausted_retries_surface_download_failed() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("fixture.bin");
        let err = download_file(
            "http://127.0.0.1:1/unreachable.bin",
            &dest,
            "fixture",
            None,
            &crate::NullCallback,
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::DownloadFailed { .. })
        ));
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn resumes_from_existing_part_file() -> Result<()> {
        let body = b"0123456789abcdef".to_vec();
        let server = TestServer::serve(body.clone(), 1);
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("fixture.bin");
        let part = dest.with_file_name("fixture.bin.part");
        fs::write(&part, &body[..6])?;

        let fetched = download_file(server.url(), &dest, "fixture", None, &crate::NullCallback)?;

        assert_eq!(fetched.size, body.len() as u64);
        assert_eq!(fs::read(&dest)?, body);
        assert_eq!(fetched.sha256, compute_sha256(&dest)?);
        Ok(())
    }
}
