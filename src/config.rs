use std::time::Duration;

/// Size of one file chunk in bytes.
pub const CHUNK_SIZE: usize = 1024;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_FRAME_LEN: usize = 1024;

/// Deadlines and limits shared by the tracker and the peers.
#[derive(Debug, Clone)]
pub struct Config {
    pub connect_timeout: Duration,
    /// Deadline for every single read or write on a socket.
    pub io_timeout: Duration,
    /// A peer session receiving no request for this long is closed.
    pub session_idle_timeout: Duration,
    /// Upper bound on the size of one text request frame.
    pub max_frame_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECTION_TIMEOUT,
            io_timeout: IO_TIMEOUT,
            session_idle_timeout: SESSION_IDLE_TIMEOUT,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl Config {
    pub fn with_timeouts(connect: Duration, io: Duration, idle: Duration) -> Self {
        Self {
            connect_timeout: connect,
            io_timeout: io,
            session_idle_timeout: idle,
            ..Self::default()
        }
    }
}
