use nom::{
    IResult, Parser,
    bytes::complete::take_till,
    character::complete::{char, digit1},
    combinator::all_consuming,
    error::Error,
    multi::separated_list0,
};
use std::str::FromStr;

pub const REGISTER: &str = "REGISTER";
pub const REQUEST_FILE: &str = "REQUEST_FILE";
pub const EXIT: &str = "EXIT";
pub const GET_CHUNK: &str = "GET_CHUNK";
pub const FILE_SIZE: &str = "FILE_SIZE";

/// Tracker reply acknowledging a registration.
pub const REPLY_OK: &str = "OK";
/// Tracker reply when nobody holds the requested file.
pub const REPLY_NO_PEER: &str = "NO_PEER";

const SEPARATOR: char = ':';

/// Requests a peer sends to the tracker, one per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerRequest {
    Register { file: String, port: u16 },
    RequestFile { file: String },
    /// `EXIT` alone withdraws the connection's raw address; `EXIT:<port>`
    /// withdraws the identity registered with that port.
    Exit { port: Option<u16> },
}

/// Requests sent over a peer transfer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRequest {
    GetChunk { file: String, index: u64 },
    FileSize { file: String },
}

/// Splits a frame on every `:`, keeping empty fields.
fn fields(frame: &str) -> Vec<&str> {
    let parsed: IResult<&str, Vec<&str>> =
        separated_list0(char(SEPARATOR), take_till(|c: char| c == SEPARATOR)).parse(frame);
    match parsed {
        Ok((_, fields)) => fields,
        Err(_) => Vec::new(),
    }
}

fn decimal<T: FromStr>(field: &str) -> Option<T> {
    let parsed: IResult<&str, &str> = all_consuming(digit1::<&str, Error<&str>>).parse(field);
    let (_, digits) = parsed.ok()?;
    digits.parse().ok()
}

fn file_name(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

fn trim_line_ending(frame: &str) -> &str {
    frame
        .strip_suffix("\r\n")
        .or_else(|| frame.strip_suffix('\n'))
        .unwrap_or(frame)
}

/// True when `name` can travel inside a frame unchanged.
pub fn is_valid_field(name: &str) -> bool {
    !name.is_empty() && !name.contains(SEPARATOR) && !name.contains(['\r', '\n'])
}

impl TrackerRequest {
    pub fn encode(&self) -> String {
        match self {
            Self::Register { file, port } => format!("{REGISTER}:{file}:{port}"),
            Self::RequestFile { file } => format!("{REQUEST_FILE}:{file}"),
            Self::Exit { port: None } => EXIT.to_string(),
            Self::Exit { port: Some(port) } => format!("{EXIT}:{port}"),
        }
    }

    /// Decodes one frame. Any unknown tag or wrong field count yields `None`.
    pub fn decode(frame: &str) -> Option<Self> {
        match fields(trim_line_ending(frame)).as_slice() {
            [REGISTER, file, port] => Some(Self::Register {
                file: file_name(file)?,
                port: decimal(port)?,
            }),
            [REQUEST_FILE, file] => Some(Self::RequestFile {
                file: file_name(file)?,
            }),
            [EXIT] => Some(Self::Exit { port: None }),
            [EXIT, port] => Some(Self::Exit {
                port: Some(decimal(port)?),
            }),
            _ => None,
        }
    }
}

impl PeerRequest {
    /// Encodes the request as one newline-terminated line.
    pub fn encode(&self) -> String {
        match self {
            Self::GetChunk { file, index } => format!("{GET_CHUNK}:{file}:{index}\n"),
            Self::FileSize { file } => format!("{FILE_SIZE}:{file}\n"),
        }
    }

    pub fn decode(frame: &str) -> Option<Self> {
        match fields(trim_line_ending(frame)).as_slice() {
            [GET_CHUNK, file, index] => Some(Self::GetChunk {
                file: file_name(file)?,
                index: decimal(index)?,
            }),
            [FILE_SIZE, file] => Some(Self::FileSize {
                file: file_name(file)?,
            }),
            _ => None,
        }
    }
}
