use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("invalid peer address: {0:?}")]
    InvalidPeerAddress(String),

    #[error("unexpected reply from tracker: {0:?}")]
    UnexpectedReply(String),

    /// The remote peer answered with an error frame.
    #[error("peer reported an error: {0}")]
    Remote(String),

    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Runs `fut` under a deadline, mapping an elapsed deadline to [`Error::Timeout`].
pub(crate) async fn with_deadline<T, E, F>(
    duration: std::time::Duration,
    operation: &'static str,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
    Error: From<E>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout { operation }),
    }
}
