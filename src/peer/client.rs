use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result, with_deadline};
use crate::peer::PeerIdentity;
use crate::peer::state::{DownloadReport, DownloadState};
use crate::store::ChunkStore;
use crate::wire::frame::is_valid_field;
use crate::wire::{Message, PeerRequest, read_message};

/// An open session with a peer's transfer server.
#[derive(Debug)]
pub struct PeerSession {
    stream: TcpStream,
    config: Config,
}

impl PeerSession {
    pub async fn connect(peer: PeerIdentity, config: &Config) -> Result<Self> {
        let stream = with_deadline(
            config.connect_timeout,
            "connect to peer",
            TcpStream::connect(peer.socket_addr()),
        )
        .await?;
        debug!(%peer, "connected to peer");
        Ok(Self {
            stream,
            config: config.clone(),
        })
    }

    /// Fetches chunk `index` of `file`. An empty chunk means the index lies
    /// at or past the end of the file.
    pub async fn get_chunk(&mut self, file: &str, index: u64) -> Result<Vec<u8>> {
        let request = PeerRequest::GetChunk {
            file: file.to_string(),
            index,
        };
        self.call(&request).await?.into_chunk()
    }

    pub async fn file_size(&mut self, file: &str) -> Result<u64> {
        let request = PeerRequest::FileSize {
            file: file.to_string(),
        };
        self.call(&request).await?.into_size()
    }

    async fn call(&mut self, request: &PeerRequest) -> Result<Message> {
        let stream = &mut self.stream;
        with_deadline(self.config.io_timeout, "peer request", async {
            stream.write_all(request.encode().as_bytes()).await?;
            read_message(stream).await
        })
        .await
    }
}

/// Downloads `file` from `peer` into `store`, one chunk at a time.
///
/// With `total_chunks` set, exactly that many chunks are requested even if
/// the peer advertises a different size; the disagreement is only logged.
/// Without it the count is derived from the advertised size. Chunks the peer
/// answers with zero bytes are skipped. The first socket or file error aborts
/// the download and leaves the partial output in place.
pub async fn download(
    peer: PeerIdentity,
    file: &str,
    total_chunks: Option<u64>,
    store: &ChunkStore,
    config: &Config,
) -> Result<DownloadReport> {
    if !is_valid_field(file) {
        return Err(Error::InvalidFileName(file.to_string()));
    }

    let mut session = PeerSession::connect(peer, config).await?;
    let advertised_size = session.file_size(file).await?;

    let mut state = match total_chunks {
        Some(total) => {
            let state = DownloadState::new(total);
            if let Some(mismatch) = state.check_advertised_size(advertised_size) {
                warn!(
                    %peer,
                    file,
                    requested = mismatch.requested,
                    advertised = mismatch.advertised,
                    size = mismatch.advertised_size,
                    "requested chunk count disagrees with advertised file size"
                );
            }
            state
        }
        None => DownloadState::for_size(advertised_size),
    };

    info!(%peer, file, chunks = state.total_chunks, size = advertised_size, "starting download");
    let mut writer = store.create(file).await?;

    while let Some(index) = state.next_chunk() {
        let chunk = session.get_chunk(file, index).await?;
        if chunk.is_empty() {
            warn!(%peer, file, index, "peer returned an empty chunk, skipping");
        } else {
            writer.append(&chunk).await?;
        }
        state.record_chunk(chunk.len());
        debug!(file, index, progress = state.progress(), "chunk received");
    }

    debug_assert!(state.is_complete());
    let bytes = writer.finish().await?;
    let report = state.report();
    debug_assert_eq!(bytes, report.bytes_written);
    info!(
        %peer,
        file,
        chunks = report.chunks_written,
        empty = report.empty_chunks,
        bytes = report.bytes_written,
        "download finished"
    );
    Ok(report)
}
