use crate::config::CHUNK_SIZE;
use crate::store::chunk_count;

/// Outcome of a finished download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadReport {
    pub total_chunks: u64,
    pub chunks_written: u64,
    /// Chunks the peer answered with zero bytes; they were skipped.
    pub empty_chunks: u64,
    pub bytes_written: u64,
}

/// Progress of one sequential download.
///
/// The chunk count comes from the caller. It is only cross-checked against
/// the size the remote peer advertises; a wrong count is reported, never
/// corrected.
#[derive(Debug, Clone)]
pub struct DownloadState {
    pub total_chunks: u64,
    pub next_index: u64,
    pub chunks_written: u64,
    pub empty_chunks: u64,
    pub bytes_written: u64,
}

/// Caller-supplied chunk count that disagrees with the advertised file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCountMismatch {
    pub requested: u64,
    pub advertised: u64,
    pub advertised_size: u64,
}

impl DownloadState {
    pub fn new(total_chunks: u64) -> Self {
        Self {
            total_chunks,
            next_index: 0,
            chunks_written: 0,
            empty_chunks: 0,
            bytes_written: 0,
        }
    }

    /// Builds the state for a download of `advertised_size` bytes when the
    /// caller did not supply a chunk count.
    pub fn for_size(advertised_size: u64) -> Self {
        Self::new(chunk_count(advertised_size))
    }

    pub fn check_advertised_size(&self, advertised_size: u64) -> Option<ChunkCountMismatch> {
        let advertised = chunk_count(advertised_size);
        if advertised == self.total_chunks {
            None
        } else {
            Some(ChunkCountMismatch {
                requested: self.total_chunks,
                advertised,
                advertised_size,
            })
        }
    }

    /// Index of the next chunk to request, `None` once all were requested.
    pub fn next_chunk(&self) -> Option<u64> {
        (self.next_index < self.total_chunks).then_some(self.next_index)
    }

    /// Records the answer for the current index and advances.
    pub fn record_chunk(&mut self, len: usize) {
        debug_assert!(len <= CHUNK_SIZE);
        if len == 0 {
            self.empty_chunks += 1;
        } else {
            self.chunks_written += 1;
            self.bytes_written += len as u64;
        }
        self.next_index += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.next_index >= self.total_chunks
    }

    /// Fraction of requested chunks answered so far.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            1.0
        } else {
            self.next_index as f64 / self.total_chunks as f64
        }
    }

    pub fn report(&self) -> DownloadReport {
        DownloadReport {
            total_chunks: self.total_chunks,
            chunks_written: self.chunks_written,
            empty_chunks: self.empty_chunks,
            bytes_written: self.bytes_written,
        }
    }
}
