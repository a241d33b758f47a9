use std::net::SocketAddr;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, with_deadline};
use crate::peer::PeerIdentity;
use crate::tracker::registry::Registry;
use crate::wire::{REPLY_NO_PEER, REPLY_OK, TrackerRequest};

/// Picks one holder uniformly at random.
pub fn pick_holder(holders: &[PeerIdentity]) -> Option<PeerIdentity> {
    holders.choose(&mut rand::rng()).copied()
}

/// Answers `REGISTER`, `REQUEST_FILE` and `EXIT`, one request per connection.
#[derive(Debug, Clone)]
pub struct TrackerService {
    registry: Arc<Registry>,
    config: Config,
}

impl TrackerService {
    pub fn new(registry: Arc<Registry>, config: Config) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Accepts connections until `cancel` fires, one task per connection.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "tracker listening");

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

            let service = self.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let mut stream = stream;
                tokio::select! {
                    _ = cancel.cancelled() => debug!(%remote, "connection cancelled"),
                    result = service.handle_connection(&mut stream, remote) => {
                        if let Err(e) = result {
                            warn!(%remote, "tracker connection failed: {e}");
                        }
                    }
                }
            });
        }

        info!("tracker stopped");
        Ok(())
    }

    /// Reads one frame from `remote`, applies it and writes the reply, if any.
    pub async fn handle_connection<S>(&self, stream: &mut S, remote: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buffer = vec![0u8; self.config.max_frame_len];
        let n = with_deadline(self.config.io_timeout, "read tracker request", stream.read(&mut buffer))
            .await?;
        let frame = String::from_utf8_lossy(&buffer[..n]);

        let Some(request) = TrackerRequest::decode(&frame) else {
            debug!(%remote, frame = %frame, "ignoring malformed tracker frame");
            return Ok(());
        };

        if let Some(reply) = self.apply(request, remote).await {
            with_deadline(self.config.io_timeout, "write tracker reply", async {
                stream.write_all(reply.as_bytes()).await?;
                stream.shutdown().await
            })
            .await?;
        }
        Ok(())
    }

    /// Applies a decoded request to the registry and returns the text reply.
    pub async fn apply(&self, request: TrackerRequest, remote: SocketAddr) -> Option<String> {
        match request {
            TrackerRequest::Register { file, port } => {
                let identity = PeerIdentity::from_connection(remote, port);
                info!(peer = %identity, file = %file, "peer registered file");
                self.registry.register(identity, file).await;
                Some(REPLY_OK.to_string())
            }
            TrackerRequest::RequestFile { file } => {
                let holders = self.registry.find_holders(&file).await;
                match pick_holder(&holders) {
                    Some(holder) => {
                        info!(%remote, file = %file, holder = %holder, holders = holders.len(), "file requested");
                        Some(holder.to_string())
                    }
                    None => {
                        info!(%remote, file = %file, "no peer holds requested file");
                        Some(REPLY_NO_PEER.to_string())
                    }
                }
            }
            TrackerRequest::Exit { port } => {
                let identity = match port {
                    Some(port) => PeerIdentity::from_connection(remote, port),
                    // Legacy form: only matches if the peer exits from the
                    // address it serves on, which is rarely the case.
                    None => PeerIdentity::from(remote),
                };
                if self.registry.remove(&identity).await {
                    info!(peer = %identity, "peer left");
                } else {
                    warn!(peer = %identity, "exit for unknown peer");
                }
                None
            }
        }
    }
}

/// Binds `addr` and runs a tracker with an empty registry until cancelled.
pub async fn run_tracker(
    addr: impl ToSocketAddrs,
    config: Config,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let service = TrackerService::new(Arc::new(Registry::new()), config);
    service.serve(listener, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn remote(last_octet: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), port)
    }

    fn service() -> TrackerService {
        TrackerService::new(Arc::new(Registry::new()), Config::default())
    }

    /// Sends `frame` through an in-memory stream and returns the reply text.
    async fn exchange(service: &TrackerService, frame: &str, from: SocketAddr) -> String {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(frame.as_bytes()).await.unwrap();
        service.handle_connection(&mut server, from).await.unwrap();
        drop(server);

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_register_then_request_returns_registrant() {
        let service = service();

        let reply = exchange(&service, "REGISTER:report.txt:6001", remote(1, 50123)).await;
        assert_eq!(reply, "OK");

        let reply = exchange(&service, "REQUEST_FILE:report.txt", remote(2, 50999)).await;
        assert_eq!(reply, "10.0.0.1:6001");
    }

    #[tokio::test]
    async fn test_request_unknown_file_returns_no_peer() {
        let service = service();
        exchange(&service, "REGISTER:report.txt:6001", remote(1, 50123)).await;

        let reply = exchange(&service, "REQUEST_FILE:missing.txt", remote(2, 50999)).await;
        assert_eq!(reply, "NO_PEER");
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_no_reply_and_no_mutation() {
        let service = service();

        for frame in ["REGISTER:onlyonefield", "HELLO", "REGISTER:a:b:c", "REGISTER:a.txt:notaport"] {
            let reply = exchange(&service, frame, remote(1, 50123)).await;
            assert_eq!(reply, "", "{}", frame);
        }
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_exit_with_port_removes_registration() {
        let service = service();
        exchange(&service, "REGISTER:report.txt:6001", remote(1, 50123)).await;

        // the exit connection comes from another ephemeral port
        let reply = exchange(&service, "EXIT:6001", remote(1, 51777)).await;
        assert_eq!(reply, "");

        let reply = exchange(&service, "REQUEST_FILE:report.txt", remote(2, 50999)).await;
        assert_eq!(reply, "NO_PEER");
    }

    #[tokio::test]
    async fn test_legacy_exit_uses_raw_connection_address() {
        let service = service();
        exchange(&service, "REGISTER:report.txt:6001", remote(1, 50123)).await;

        exchange(&service, "EXIT", remote(1, 51777)).await;
        assert_eq!(service.registry().len().await, 1);

        exchange(&service, "EXIT", remote(1, 6001)).await;
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_exit_keeps_other_holders() {
        let service = service();
        exchange(&service, "REGISTER:report.txt:6001", remote(1, 50123)).await;
        exchange(&service, "REGISTER:report.txt:6001", remote(2, 50124)).await;

        exchange(&service, "EXIT:6001", remote(1, 50200)).await;

        let reply = exchange(&service, "REQUEST_FILE:report.txt", remote(3, 50999)).await;
        assert_eq!(reply, "10.0.0.2:6001");
    }

    #[tokio::test]
    async fn test_selection_spreads_across_all_holders() {
        let service = service();
        for octet in 1..=3 {
            exchange(&service, "REGISTER:F:6001", remote(octet, 40000)).await;
        }

        let trials = 600;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..trials {
            let reply = service
                .apply(
                    TrackerRequest::RequestFile {
                        file: "F".to_string(),
                    },
                    remote(9, 1),
                )
                .await
                .unwrap();
            *counts.entry(reply).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        // each holder expects 200 picks; 100 is far outside random variation
        for (holder, count) in counts {
            assert!(count > 100, "{holder} picked only {count} times");
        }
    }

    #[test]
    fn test_pick_holder_empty() {
        assert_eq!(pick_holder(&[]), None);
    }

    #[tokio::test]
    async fn test_stalled_client_times_out() {
        let config = Config::with_timeouts(
            Duration::from_secs(1),
            Duration::from_millis(50),
            Duration::from_secs(1),
        );
        let service = TrackerService::new(Arc::new(Registry::new()), config);
        let (_client, mut server) = tokio::io::duplex(64);

        let result = service.handle_connection(&mut server, remote(1, 1)).await;
        assert!(matches!(result, Err(crate::error::Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_serve_over_tcp_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = service();
        let cancel = CancellationToken::new();

        let server = {
            let service = service.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { service.serve(listener, cancel).await })
        };

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"REGISTER:report.txt:6001").await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "OK");
        assert_eq!(
            service.registry().find_holders("report.txt").await,
            vec![PeerIdentity::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6001)]
        );

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
