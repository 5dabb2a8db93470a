//! HTTP fetch plumbing
//! ===================
//!
//! One blocking and one suspendable flavour of "GET this URL into this
//! file". Both are single-attempt on purpose: callers decide the retry
//! schedule through [`crate::retry::RetryPolicy`], which keeps the backoff
//! behaviour in one place.

use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{PgEmbedError, PgEmbedResult};

/// Blocking single-attempt download of `url` into `dest` (created or
/// overwritten). Any non-200 status is a [`PgEmbedError::DownloadFailed`].
pub fn fetch_blocking(url: &str, dest: &Path) -> PgEmbedResult<()> {
    crate::trace!("downloading {url} to {}", dest.display());

    match ureq::get(url).call() {
        Ok(resp) if resp.status() == 200 => {
            let mut reader = resp.into_body().into_reader();
            let mut file = std::fs::File::create(dest).map_err(|e| {
                PgEmbedError::file_system("create destination file", dest.to_path_buf(), e)
            })?;
            // A truncated file at `dest` would be taken for a cache hit on
            // the next run, so a failed copy must not leave one behind.
            match std::io::copy(&mut reader, &mut file) {
                Ok(received) => {
                    crate::debug!("downloaded {received} bytes from {url}");
                    Ok(())
                }
                Err(e) => {
                    drop(file);
                    let _ = std::fs::remove_file(dest);
                    Err(PgEmbedError::file_system(
                        "copy contents to destination file",
                        dest.to_path_buf(),
                        e,
                    ))
                }
            }
        }
        Ok(resp) => Err(PgEmbedError::DownloadFailed(format!(
            "HTTP {} fetching {url}",
            resp.status()
        ))),
        Err(e) => Err(PgEmbedError::DownloadFailed(format!(
            "request error fetching {url}: {e}"
        ))),
    }
}

/// Suspendable single-attempt download of `url` into `dest`, streamed chunk
/// by chunk so a large artifact never sits in memory whole.
///
/// Cancelling `cancel` aborts the transfer between chunks, removes the
/// partial file, and returns [`PgEmbedError::Cancelled`].
pub async fn fetch(url: &str, dest: &Path, cancel: &CancellationToken) -> PgEmbedResult<()> {
    if cancel.is_cancelled() {
        return Err(PgEmbedError::Cancelled);
    }

    crate::trace!("downloading {url} to {}", dest.display());

    let response = reqwest::get(url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| PgEmbedError::DownloadFailed(format!("request error fetching {url}: {e}")))?;

    let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
        PgEmbedError::file_system("create destination file", dest.to_path_buf(), e)
    })?;

    let stream = response.bytes_stream();
    tokio::pin!(stream);

    // Progress is reported once per crossed 8 MiB boundary.
    const PROGRESS_CHUNK: u64 = 8 * 1024 * 1024;
    let mut received: u64 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                crate::warn!("download of {url} cancelled; partial file removed");
                return Err(PgEmbedError::Cancelled);
            }
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await.map_err(|e| {
                        PgEmbedError::file_system(
                            "copy contents to destination file",
                            dest.to_path_buf(),
                            e,
                        )
                    })?;
                    let before = received;
                    received += bytes.len() as u64;
                    if received / PROGRESS_CHUNK > before / PROGRESS_CHUNK {
                        crate::debug!("downloaded {received} bytes from {url}");
                    }
                }
                Some(Err(e)) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(PgEmbedError::DownloadFailed(format!(
                        "stream error fetching {url}: {e}"
                    )));
                }
                None => break,
            },
        }
    }

    file.flush()
        .await
        .map_err(|e| PgEmbedError::file_system("flush destination file", dest.to_path_buf(), e))?;
    crate::debug!("downloaded {received} bytes from {url}");
    Ok(())
}
