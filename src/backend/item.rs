use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::ItemError;
use super::fetcher::Fetcher;
use super::signals::ControlSignals;
use super::threshold::{ThresholdGate, ThresholdKind};

static PART_COUNTER: AtomicU64 = AtomicU64::new(0);

pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Write through a uniquely named sibling and rename into place, so a
/// half-written file is never taken for a finished item.
pub async fn save_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = part_path(path);
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let n = PART_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}.{}.part", std::process::id(), n));
    PathBuf::from(name)
}

/// Fetch one item, check it against the download threshold and store it.
pub async fn download_item(
    fetcher: &Fetcher,
    gate: ThresholdGate,
    signals: Option<&ControlSignals>,
    url: &str,
    path: &Path,
) -> Result<(), ItemError> {
    let bytes = match signals {
        Some(signals) => fetcher.fetch_cancellable(url, signals).await?,
        None => fetcher.fetch(url).await?,
    };

    if !gate.accepts(bytes.len(), ThresholdKind::Download) {
        return Err(ItemError::SizeRejected {
            len: bytes.len(),
            threshold: gate.threshold(ThresholdKind::Download),
        });
    }

    save_bytes(path, &bytes).await.map_err(|source| ItemError::Io {
        path: path.to_path_buf(),
        source,
    })
}
