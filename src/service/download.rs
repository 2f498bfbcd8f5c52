use crate::error::UpdateError;
use base64::Engine as _;
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha512};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Without a known size progress is estimated per this many bytes and held below 100.
const INDETERMINATE_STEP_BYTES: u64 = 100 * 1024;

/// Percentage of `total` covered by `downloaded`.
pub(crate) fn percent_of(downloaded: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => ((downloaded.saturating_mul(100)) / total).min(100) as u8,
        _ => 99u64.min(downloaded / INDETERMINATE_STEP_BYTES) as u8,
    }
}

/// Compare a computed digest with the feed's base64 `sha512`.
pub(crate) fn verify_sha512(expected_b64: &str, digest: &[u8]) -> Result<(), UpdateError> {
    let actual = base64::engine::general_purpose::STANDARD.encode(digest);
    if actual == expected_b64.trim() {
        Ok(())
    } else {
        Err(UpdateError::Integrity {
            expected: expected_b64.trim().to_string(),
            actual,
        })
    }
}

/// Stream `url` into `dest`, reporting integer progress whenever it changes.
///
/// The partial file is removed on any failure, including a checksum mismatch.
pub(crate) async fn download_to_file<F>(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
    size_hint: Option<u64>,
    expected_sha512: &str,
    mut on_progress: F,
) -> Result<(), UpdateError>
where
    F: FnMut(u8),
{
    let res = stream_to_file(http, url, dest, size_hint, expected_sha512, &mut on_progress).await;
    if res.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }
    res
}

async fn stream_to_file<F>(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
    size_hint: Option<u64>,
    expected_sha512: &str,
    on_progress: &mut F,
) -> Result<(), UpdateError>
where
    F: FnMut(u8),
{
    let resp = http.get(url).send().await?.error_for_status()?;
    let total = resp.content_length().or(size_hint);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha512::new();
    let mut downloaded: u64 = 0;
    let mut last_pct: u8 = 0;

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk: Bytes = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;

        let pct = percent_of(downloaded, total);
        if pct != last_pct {
            last_pct = pct;
            on_progress(pct);
        }
    }
    file.flush().await?;
    drop(file);

    if expected_sha512.trim().is_empty() {
        tracing::warn!(url, "release feed has no sha512, skipping verification");
    } else {
        verify_sha512(expected_sha512, &hasher.finalize())?;
    }
    if last_pct != 100 {
        on_progress(100);
    }
    Ok(())
}
