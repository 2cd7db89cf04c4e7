use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// Atomically replace `path` with `bytes`.
///
/// The content is written to a `.tmp` sibling, `fsync`'d, then renamed over
/// the target.  A crash before the rename leaves the previous file untouched;
/// readers never observe a half-written document.  The `.tmp` file is removed
/// on any error path.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let tmp_path = tmp_sibling(path);

    let write_result: Result<()> = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;

    if let Err(err) = write_result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err.context(format!("writing {}", tmp_path.display())));
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(anyhow::Error::from(err).context(format!("replacing {}", path.display())));
    }

    Ok(())
}

/// Serialise `value` as pretty UTF-8 JSON (non-ASCII kept verbatim) and
/// write it atomically.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut rendered = serde_json::to_vec_pretty(value)?;
    rendered.push(b'\n');
    write_atomic(path, &rendered).await
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.json".to_string());
    path.with_file_name(format!("{filename}.tmp"))
}
