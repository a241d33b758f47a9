use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::CHUNK_SIZE;
use crate::error::{Error, Result};

/// Largest length field accepted: the kind byte plus one full chunk.
pub const MAX_MESSAGE_LEN: usize = 1 + CHUNK_SIZE;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chunk = 0,
    Size = 1,
    Error = 2,
}

impl TryFrom<u8> for MessageKind {
    type Error = ();

    fn try_from(value: u8) -> std::result::Result<Self, ()> {
        match value {
            0 => Ok(MessageKind::Chunk),
            1 => Ok(MessageKind::Size),
            2 => Ok(MessageKind::Error),
            _ => Err(()),
        }
    }
}

/// A response on a peer transfer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn chunk(bytes: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Chunk,
            payload: bytes,
        }
    }

    pub fn size(size: u64) -> Self {
        Self {
            kind: MessageKind::Size,
            payload: size.to_be_bytes().to_vec(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        let mut payload = reason.into().into_bytes();
        payload.truncate(CHUNK_SIZE);
        Self {
            kind: MessageKind::Error,
            payload,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let total_len = 1 + self.payload.len(); // 1 byte for the kind
        let mut buf = Vec::with_capacity(4 + total_len);

        buf.extend_from_slice(&(total_len as u32).to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.payload);

        buf
    }

    pub fn deserialize(buf: &[u8]) -> Option<Self> {
        if buf.len() < 5 {
            return None; // must be at least 4 (length) + 1 (kind)
        }

        let len = u32::from_be_bytes(buf[0..4].try_into().ok()?) as usize;
        if len == 0 || len > MAX_MESSAGE_LEN || buf.len() < 4 + len {
            return None;
        }

        let kind = MessageKind::try_from(buf[4]).ok()?;
        let payload = buf[5..4 + len].to_vec();

        Some(Self { kind, payload })
    }

    /// Interprets the message as the answer to a chunk request.
    pub fn into_chunk(self) -> Result<Vec<u8>> {
        match self.kind {
            MessageKind::Chunk => Ok(self.payload),
            MessageKind::Error => Err(self.into_remote_error()),
            MessageKind::Size => Err(Error::MalformedResponse("expected a chunk")),
        }
    }

    /// Interprets the message as the answer to a file size request.
    pub fn into_size(self) -> Result<u64> {
        match self.kind {
            MessageKind::Size => {
                let bytes: [u8; 8] = self
                    .payload
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::MalformedResponse("size payload must be 8 bytes"))?;
                Ok(u64::from_be_bytes(bytes))
            }
            MessageKind::Error => Err(self.into_remote_error()),
            MessageKind::Chunk => Err(Error::MalformedResponse("expected a file size")),
        }
    }

    fn into_remote_error(self) -> Error {
        Error::Remote(String::from_utf8_lossy(&self.payload).into_owned())
    }
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one framed message.
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len == 0 || msg_len > MAX_MESSAGE_LEN {
        return Err(Error::MalformedResponse("length out of range"));
    }

    let mut full_msg = vec![0u8; 4 + msg_len];
    full_msg[..4].copy_from_slice(&len_buf);
    reader.read_exact(&mut full_msg[4..]).await?;

    Message::deserialize(&full_msg).ok_or(Error::MalformedResponse("unknown message kind"))
}
