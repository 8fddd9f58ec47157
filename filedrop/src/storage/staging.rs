//! Local staging of uploads while they stream in.
//!
//! A [`StagingFile`] is a uniquely named temp file inside a backend's staging directory. It is
//! deleted when dropped, so an upload that fails or whose client disconnects never leaves a
//! partial file behind, and never appears under its final name. Only
//! [`StagedFile::publish`] moves the bytes to a real name, with a single rename.

use std::io;
use std::path::Path;

use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// A temp file being written chunk by chunk.
pub struct StagingFile {
    file: fs::File,
    path: TempPath,
    written: u64,
}

impl StagingFile {
    /// Create a new staging file in `dir`, creating the directory if needed.
    pub async fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir).await?;
        let named = tempfile::Builder::new().prefix(".upload-").suffix(".partial").tempfile_in(dir)?;
        let (file, path) = named.into_parts();
        Ok(Self {
            file: fs::File::from_std(file),
            path,
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and fsync; the returned file holds the complete upload.
    pub async fn finish(mut self) -> io::Result<StagedFile> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(StagedFile {
            path: self.path,
            size: self.written,
        })
    }
}

/// A fully written staging file, not yet published.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    size: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Atomically rename the staged bytes to `dest`, replacing any file already there.
    ///
    /// `dest` must be on the same filesystem as the staging directory.
    pub fn publish(self, dest: &Path) -> io::Result<()> {
        self.path.persist(dest).map_err(|e| e.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_staging_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = StagingFile::create(dir.path()).await.unwrap();
        staging.write_chunk(b"partial").await.unwrap();
        let path = staging.path.to_path_buf();
        assert!(path.exists());

        drop(staging);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unpublished_staged_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = StagingFile::create(dir.path()).await.unwrap();
        staging.write_chunk(b"complete").await.unwrap();
        let staged = staging.finish().await.unwrap();
        let path = staged.path().to_path_buf();

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_publish_moves_bytes_to_final_name() {
        let dir = tempfile::tempdir().unwrap();
        let staging_dir = dir.path().join(".staging");
        let mut staging = StagingFile::create(&staging_dir).await.unwrap();
        staging.write_chunk(b"hello ").await.unwrap();
        staging.write_chunk(b"world").await.unwrap();
        assert_eq!(staging.written(), 11);

        let staged = staging.finish().await.unwrap();
        assert_eq!(staged.size(), 11);
        let staged_path = staged.path().to_path_buf();

        let dest = dir.path().join("final.txt");
        staged.publish(&dest).unwrap();

        assert!(!staged_path.exists());
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello world");
    }
}
