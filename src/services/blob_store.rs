//! BlobStore — uploaded PDF bytes on local disk.
//!
//! Uploads are streamed into a hidden temporary file inside the store
//! directory, then renamed to a random `<uuid>.<ext>` name once the request
//! has been validated. Nothing here touches the database.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    fmt::Display,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("failed to read upload body: {0}")]
    Source(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Clone, Debug)]
pub struct BlobStore {
    base_path: PathBuf,
}

/// A fully received upload that has not been given its final name yet.
///
/// The temporary file is removed when the value is dropped without
/// [`BlobStore::commit`] having been called.
#[derive(Debug)]
pub struct StagedBlob {
    tmp_path: PathBuf,
    size: u64,
    committed: bool,
}

impl StagedBlob {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.tmp_path
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.tmp_path) {
            Ok(_) => debug!("discarded staged blob {}", self.tmp_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "failed to discard staged blob {}: {}",
                self.tmp_path.display(),
                err
            ),
        }
    }
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.base_path).await
    }

    /// Stream `stream` into a temporary file, failing as soon as more than
    /// `limit` bytes have arrived.
    pub async fn stage<S, E>(&self, stream: S, limit: u64) -> BlobResult<StagedBlob>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        self.ensure_dir().await?;
        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        // From here on the guard owns cleanup
        let mut staged = StagedBlob {
            tmp_path,
            size: 0,
            committed: false,
        };

        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = chunk_res.map_err(|err| BlobError::Source(err.to_string()))?;
            staged.size += chunk.len() as u64;
            if staged.size > limit {
                return Err(BlobError::TooLarge { limit });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(staged)
    }

    /// Move a staged upload to its final, collision-resistant name, keeping
    /// the extension of `original_filename`.
    pub async fn commit(&self, mut staged: StagedBlob, original_filename: &str) -> io::Result<PathBuf> {
        let final_path = self.base_path.join(blob_name(original_filename));
        fs::rename(&staged.tmp_path, &final_path).await?;
        staged.committed = true;
        debug!("stored blob {}", final_path.display());
        Ok(final_path)
    }

    pub async fn open(&self, path: impl AsRef<Path>) -> io::Result<File> {
        File::open(path.as_ref()).await
    }

    /// Remove a stored blob. A blob that is already gone counts as removed.
    pub async fn remove(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        match fs::remove_file(path).await {
            Ok(_) => {
                debug!("removed blob {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Random file name that keeps a sanitized copy of the original extension.
fn blob_name(original_filename: &str) -> String {
    let ext = Path::new(original_filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 16 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
pub(crate) fn test_dir() -> PathBuf {
    std::env::temp_dir().join(format!("doc-library-test-{}", Uuid::new_v4()))
}
