use std::fmt;
use std::str;

use thiserror::Error;

use crate::{BLOCK_SIZE, OCTET_MODE};

pub const OP_RRQ: u16 = 1;
pub const OP_DATA: u16 = 2;
pub const OP_ACK: u16 = 3;
pub const OP_ERROR: u16 = 4;

/// Opcode plus block number: the smallest DATA/ACK datagram.
pub const HEADER_LEN: usize = 4;
/// Largest datagram a compliant DATA message occupies.
pub const MAX_DATA_PACKET: usize = HEADER_LEN + BLOCK_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short for opcode {opcode}: {len} bytes")]
    TooShort { opcode: u16, len: usize },
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u16),
    #[error("missing string terminator")]
    MissingTerminator,
    #[error("empty filename")]
    EmptyFilename,
    #[error("invalid string encoding")]
    InvalidEncoding,
}

/// Numeric error codes carried by an ERROR message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotDefined,
    FileNotFound,
    AccessViolation,
    DiskFull,
    Other(u16),
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::NotDefined => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::AccessViolation => 2,
            ErrorCode::DiskFull => 3,
            ErrorCode::Other(code) => code,
        }
    }

    /// Message sent when the caller has nothing more specific to say.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::AccessViolation => "Access violation",
            ErrorCode::DiskFull => "Disk full or allocation exceeded",
            ErrorCode::NotDefined | ErrorCode::Other(_) => "Not defined",
        }
    }
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            0 => ErrorCode::NotDefined,
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            other => ErrorCode::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.default_message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket {
    RRQ { filename: String, mode: String },
    DATA { block: u16, data: Vec<u8> },
    ACK(u16),
    ERROR { code: ErrorCode, msg: String },
}

impl TftpPacket {
    pub fn rrq(filename: impl Into<String>) -> Self {
        TftpPacket::RRQ {
            filename: filename.into(),
            mode: OCTET_MODE.to_string(),
        }
    }

    pub fn error(code: ErrorCode, msg: impl Into<String>) -> Self {
        TftpPacket::ERROR {
            code,
            msg: msg.into(),
        }
    }

    pub fn opcode(&self) -> u16 {
        match self {
            TftpPacket::RRQ { .. } => OP_RRQ,
            TftpPacket::DATA { .. } => OP_DATA,
            TftpPacket::ACK(_) => OP_ACK,
            TftpPacket::ERROR { .. } => OP_ERROR,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MAX_DATA_PACKET);
        bytes.extend_from_slice(&self.opcode().to_be_bytes());

        match self {
            TftpPacket::RRQ { filename, mode } => {
                bytes.extend_from_slice(filename.as_bytes());
                bytes.push(0);
                bytes.extend_from_slice(mode.as_bytes());
                bytes.push(0);
            }
            TftpPacket::DATA { block, data } => {
                bytes.extend_from_slice(&block.to_be_bytes());
                bytes.extend_from_slice(data);
            }
            TftpPacket::ACK(block) => {
                bytes.extend_from_slice(&block.to_be_bytes());
            }
            TftpPacket::ERROR { code, msg } => {
                bytes.extend_from_slice(&code.as_u16().to_be_bytes());
                bytes.extend_from_slice(msg.as_bytes());
                bytes.push(0);
            }
        }
        bytes
    }

    /// Decodes one datagram. Oversized DATA payloads are passed through;
    /// enforcing the block size is up to the caller.
    pub fn deserialize(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < 2 {
            return Err(PacketError::TooShort {
                opcode: 0,
                len: buf.len(),
            });
        }

        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let too_short = || PacketError::TooShort {
            opcode,
            len: buf.len(),
        };

        let pkt = match opcode {
            OP_RRQ => {
                let body = &buf[2..];
                let (filename, consumed) = read_cstr(body)?;
                if filename.is_empty() {
                    return Err(PacketError::EmptyFilename);
                }
                // The mode field is optional; peers that omit it get octet.
                let rest = &body[consumed..];
                let mode = if rest.is_empty() {
                    OCTET_MODE.to_string()
                } else {
                    read_cstr(rest)?.0
                };
                TftpPacket::RRQ { filename, mode }
            }
            OP_DATA => {
                if buf.len() < HEADER_LEN {
                    return Err(too_short());
                }
                TftpPacket::DATA {
                    block: u16::from_be_bytes([buf[2], buf[3]]),
                    data: buf[HEADER_LEN..].to_vec(),
                }
            }
            OP_ACK => {
                if buf.len() < HEADER_LEN {
                    return Err(too_short());
                }
                TftpPacket::ACK(u16::from_be_bytes([buf[2], buf[3]]))
            }
            OP_ERROR => {
                if buf.len() < HEADER_LEN {
                    return Err(too_short());
                }
                let code = u16::from_be_bytes([buf[2], buf[3]]).into();
                let text = &buf[HEADER_LEN..];
                let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
                let msg = String::from_utf8_lossy(&text[..end]).into_owned();

                TftpPacket::ERROR { code, msg }
            }
            _ => {
                return Err(PacketError::InvalidOpcode(opcode));
            }
        };

        Ok(pkt)
    }
}

// Reads a zero-terminated string, returning it with the bytes consumed
// including the terminator.
fn read_cstr(buf: &[u8]) -> Result<(String, usize), PacketError> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(PacketError::MissingTerminator)?;
    let s = str::from_utf8(&buf[..pos])
        .map_err(|_| PacketError::InvalidEncoding)?
        .to_string();
    Ok((s, pos + 1))
}
