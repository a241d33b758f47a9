//! Local chunk storage.
//!
//! Reads fixed-size chunks out of files under a root directory and writes
//! downloads back sequentially. Nothing is cached: every chunk request goes
//! to disk.

use std::io::{self, ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};

use rand::seq::IndexedRandom;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::CHUNK_SIZE;
use crate::error::{Error, Result};
use crate::wire::frame::is_valid_field;

/// Number of chunks needed to hold `size` bytes.
pub fn chunk_count(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64)
}

fn chunk_offset(index: u64) -> io::Result<u64> {
    index
        .checked_mul(CHUNK_SIZE as u64)
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "chunk offset overflow"))
}

#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a wire file name to a path, refusing anything but a plain name.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if is_valid_field(name) => Ok(self.root.join(name)),
            _ => Err(Error::InvalidFileName(name.to_string())),
        }
    }

    /// Reads chunk `index` of `name`. Returns fewer than [`CHUNK_SIZE`] bytes
    /// for the last chunk and an empty buffer at or past the end of the file.
    pub async fn read_chunk(&self, name: &str, index: u64) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(chunk_offset(index)?)).await?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut filled = 0;
        while filled < CHUNK_SIZE {
            let n = file.read(&mut buffer[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    pub async fn file_size(&self, name: &str) -> Result<u64> {
        let path = self.resolve(name)?;
        Ok(fs::metadata(&path).await?.len())
    }

    /// Creates (or truncates) `name` for a sequential download.
    pub async fn create(&self, name: &str) -> Result<ChunkWriter> {
        let path = self.resolve(name)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        Ok(ChunkWriter { file, written: 0 })
    }

    /// Names of the regular files directly under the root, sorted.
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && is_valid_field(name)
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Picks one shareable file uniformly at random, `None` if there is none.
    pub async fn pick_random_file(&self) -> Result<Option<String>> {
        let names = self.list_files().await?;
        Ok(names.choose(&mut rand::rng()).cloned())
    }
}

/// Appends downloaded chunks at the current cursor.
#[derive(Debug)]
pub struct ChunkWriter {
    file: File,
    written: u64,
}

impl ChunkWriter {
    pub async fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flushes the file to disk.
    pub async fn finish(mut self) -> Result<u64> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.written)
    }
}
