use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::peer::PeerIdentity;

/// The tracker's record of which peer advertises which files.
///
/// Every operation takes the single lock for its whole duration, so no caller
/// observes a half-applied update. There is no atomicity across calls.
#[derive(Debug, Default)]
pub struct Registry {
    peers: Mutex<HashMap<PeerIdentity, Vec<String>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `file` to the files advertised by `identity`. Duplicates are kept.
    pub async fn register(&self, identity: PeerIdentity, file: impl Into<String>) {
        let mut peers = self.peers.lock().await;
        peers.entry(identity).or_default().push(file.into());
    }

    /// Every identity advertising `file`, in map iteration order.
    pub async fn find_holders(&self, file: &str) -> Vec<PeerIdentity> {
        let peers = self.peers.lock().await;
        peers
            .iter()
            .filter(|(_, files)| files.iter().any(|f| f == file))
            .map(|(identity, _)| *identity)
            .collect()
    }

    /// Drops `identity` and all its advertisements. Returns whether it existed.
    pub async fn remove(&self, identity: &PeerIdentity) -> bool {
        let mut peers = self.peers.lock().await;
        peers.remove(identity).is_some()
    }

    /// Copy of the files advertised by `identity`.
    pub async fn files_of(&self, identity: &PeerIdentity) -> Vec<String> {
        let peers = self.peers.lock().await;
        peers.get(identity).cloned().unwrap_or_default()
    }

    /// Number of identities with at least one advertisement.
    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }
}
