use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result, with_deadline};
use crate::peer::PeerIdentity;
use crate::wire::frame::is_valid_field;
use crate::wire::{REPLY_NO_PEER, REPLY_OK, TrackerRequest};

/// Peer-side access to a tracker. Every call opens its own connection.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    tracker_addr: String,
    config: Config,
}

impl TrackerClient {
    pub fn new(tracker_addr: impl Into<String>, config: Config) -> Self {
        Self {
            tracker_addr: tracker_addr.into(),
            config,
        }
    }

    /// Advertises `file` as served on `port` of this host.
    pub async fn register(&self, file: &str, port: u16) -> Result<()> {
        check_file_name(file)?;
        let request = TrackerRequest::Register {
            file: file.to_string(),
            port,
        };
        let reply = self.send(&request, true).await?;
        if reply != REPLY_OK {
            return Err(Error::UnexpectedReply(reply));
        }
        info!(tracker = %self.tracker_addr, file, port, "registered with tracker");
        Ok(())
    }

    /// Asks the tracker for a holder of `file`; `None` when nobody has it.
    pub async fn request_file(&self, file: &str) -> Result<Option<PeerIdentity>> {
        check_file_name(file)?;
        let request = TrackerRequest::RequestFile {
            file: file.to_string(),
        };
        let reply = self.send(&request, true).await?;
        if reply == REPLY_NO_PEER {
            info!(file, "no peer has the requested file");
            return Ok(None);
        }
        let holder: PeerIdentity = reply.parse()?;
        debug!(file, holder = %holder, "tracker returned holder");
        Ok(Some(holder))
    }

    /// Withdraws every advertisement made for `port` of this host.
    pub async fn exit(&self, port: u16) -> Result<()> {
        self.send(&TrackerRequest::Exit { port: Some(port) }, false)
            .await?;
        info!(tracker = %self.tracker_addr, port, "left tracker");
        Ok(())
    }

    async fn send(&self, request: &TrackerRequest, expect_reply: bool) -> Result<String> {
        let mut stream = with_deadline(
            self.config.connect_timeout,
            "connect to tracker",
            TcpStream::connect(&self.tracker_addr),
        )
        .await?;

        with_deadline(
            self.config.io_timeout,
            "send tracker request",
            stream.write_all(request.encode().as_bytes()),
        )
        .await?;

        if !expect_reply {
            return Ok(String::new());
        }

        // The tracker closes the connection after replying.
        let mut reply = Vec::new();
        let limit = self.config.max_frame_len as u64;
        with_deadline(
            self.config.io_timeout,
            "read tracker reply",
            (&mut stream).take(limit).read_to_end(&mut reply),
        )
        .await?;
        Ok(String::from_utf8_lossy(&reply).trim().to_string())
    }
}

fn check_file_name(file: &str) -> Result<()> {
    if is_valid_field(file) {
        Ok(())
    } else {
        Err(Error::InvalidFileName(file.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::registry::Registry;
    use crate::tracker::service::TrackerService;
    use assert_matches::assert_matches;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    async fn start_tracker() -> (TrackerService, String, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let service = TrackerService::new(Arc::new(Registry::new()), Config::default());
        let cancel = CancellationToken::new();

        let running = service.clone();
        let token = cancel.clone();
        tokio::spawn(async move { running.serve(listener, token).await });

        (service, addr, cancel)
    }

    #[tokio::test]
    async fn test_register_request_exit() {
        let (service, addr, cancel) = start_tracker().await;
        let client = TrackerClient::new(addr, Config::default());

        client.register("report.txt", 6001).await.unwrap();
        let holder = client.request_file("report.txt").await.unwrap();
        assert_eq!(
            holder,
            Some(PeerIdentity::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6001))
        );

        client.exit(6001).await.unwrap();
        // EXIT has no reply; wait until the tracker has applied it
        for _ in 0..50 {
            if service.registry().is_empty().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(client.request_file("report.txt").await.unwrap(), None);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_request_unknown_file() {
        let (_service, addr, cancel) = start_tracker().await;
        let client = TrackerClient::new(addr, Config::default());

        assert_matches!(client.request_file("missing.txt").await, Ok(None));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_rejects_names_that_break_framing() {
        let client = TrackerClient::new("127.0.0.1:1", Config::default());

        assert_matches!(
            client.register("a:b", 6001).await,
            Err(Error::InvalidFileName(_))
        );
        assert_matches!(
            client.request_file("").await,
            Err(Error::InvalidFileName(_))
        );
    }

    #[tokio::test]
    async fn test_unexpected_register_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(b"DENIED").await.unwrap();
        });

        let client = TrackerClient::new(addr, Config::default());
        assert_matches!(
            client.register("report.txt", 6001).await,
            Err(Error::UnexpectedReply(ref reply)) if reply == "DENIED"
        );
    }

    #[tokio::test]
    async fn test_garbage_holder_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(b"somewhere").await.unwrap();
        });

        let client = TrackerClient::new(addr, Config::default());
        assert_matches!(
            client.request_file("report.txt").await,
            Err(Error::InvalidPeerAddress(_))
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = TrackerClient::new(addr, Config::default());
        assert_matches!(client.request_file("report.txt").await, Err(Error::Io(_)));
    }
}
