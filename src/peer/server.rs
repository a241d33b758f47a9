use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, with_deadline};
use crate::store::ChunkStore;
use crate::tracker::TrackerClient;
use crate::wire::{Message, PeerRequest, write_message};

/// Serves chunks of local files to other peers.
///
/// A connection is a session: the client may send any number of
/// newline-terminated requests and gets one framed response per request.
/// A request without the trailing newline is only answered once the client
/// stays quiet for `session_idle_timeout`; the session closes after that
/// answer.
#[derive(Debug, Clone)]
pub struct PeerServer {
    store: ChunkStore,
    config: Config,
}

impl PeerServer {
    pub fn new(store: ChunkStore, config: Config) -> Self {
        Self { store, config }
    }

    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, root = %self.store.root().display(), "peer server listening");

        loop {
            let (stream, remote) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("error accepting connection: {e}");
                        continue;
                    }
                },
            };

            let server = self.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => debug!(%remote, "session cancelled"),
                    result = server.handle_session(stream, remote) => match result {
                        Ok(served) => debug!(%remote, served, "session closed"),
                        Err(e) => warn!(%remote, "session failed: {e}"),
                    },
                }
            });
        }

        info!("peer server stopped");
        Ok(())
    }

    /// Runs one session to completion and returns the number of requests
    /// answered successfully.
    pub async fn handle_session<S>(&self, stream: S, remote: SocketAddr) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        // room for the terminator on top of the frame itself
        let limit = self.config.max_frame_len as u64 + 2;
        let mut served = 0;

        loop {
            let mut line = Vec::new();
            let read = timeout(
                self.config.session_idle_timeout,
                (&mut reader).take(limit).read_until(b'\n', &mut line),
            )
            .await;
            let (n, quiet) = match read {
                Ok(n) => (n?, false),
                Err(_) if line.is_empty() => {
                    debug!(%remote, "session idle, closing");
                    break;
                }
                // bytes read before the deadline stay in `line`
                Err(_) => (line.len(), true),
            };
            if n == 0 {
                break;
            }
            if n as u64 == limit && !line.ends_with(b"\n") {
                warn!(%remote, "request line too long, closing session");
                self.respond(&mut writer, Message::error("request too long"))
                    .await?;
                break;
            }

            let text = String::from_utf8_lossy(&line);
            let Some(request) = PeerRequest::decode(&text) else {
                debug!(%remote, frame = %text.trim_end(), "malformed peer request");
                self.respond(&mut writer, Message::error("malformed request"))
                    .await?;
                if quiet {
                    break;
                }
                continue;
            };

            match self.answer(&request).await {
                Ok(message) => {
                    self.respond(&mut writer, message).await?;
                    served += 1;
                }
                Err(e) => {
                    error!(%remote, ?request, "cannot serve request: {e}");
                    self.respond(&mut writer, Message::error(e.to_string()))
                        .await?;
                    break;
                }
            }
            if quiet {
                debug!(%remote, "answered unterminated request, closing");
                break;
            }
        }

        Ok(served)
    }

    async fn answer(&self, request: &PeerRequest) -> Result<Message> {
        match request {
            PeerRequest::GetChunk { file, index } => {
                let chunk = self.store.read_chunk(file, *index).await?;
                debug!(file = %file, index, len = chunk.len(), "served chunk");
                Ok(Message::chunk(chunk))
            }
            PeerRequest::FileSize { file } => {
                let size = self.store.file_size(file).await?;
                Ok(Message::size(size))
            }
        }
    }

    async fn respond<W>(&self, writer: &mut W, message: Message) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        with_deadline(
            self.config.io_timeout,
            "write peer response",
            write_message(writer, &message),
        )
        .await
    }
}

/// Serves files under `root` on `port` of every interface until cancelled.
pub async fn serve_chunk_requests(
    port: u16,
    root: impl AsRef<Path>,
    config: Config,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    PeerServer::new(ChunkStore::new(root), config)
        .serve(listener, cancel)
        .await
}

/// Binds `port`, starts serving `store` and only then advertises `file` to
/// the tracker, so a peer never advertises a file it cannot serve.
///
/// Returns the bound port (useful when `port` is 0) and the server task.
/// If registration fails the server is stopped again.
pub async fn share_file(
    store: ChunkStore,
    port: u16,
    file: &str,
    tracker: &TrackerClient,
    config: Config,
    cancel: CancellationToken,
) -> Result<(u16, JoinHandle<Result<()>>)> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    let port = listener.local_addr()?.port();

    let server = PeerServer::new(store, config);
    let server_cancel = cancel.child_token();
    let token = server_cancel.clone();
    let handle = tokio::spawn(async move { server.serve(listener, token).await });

    if let Err(e) = tracker.register(file, port).await {
        server_cancel.cancel();
        let _ = handle.await;
        return Err(e);
    }
    Ok((port, handle))
}
