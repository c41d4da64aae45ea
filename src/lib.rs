mod cli;

pub mod block;
pub mod config;
pub mod data;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod transport;
pub mod worker;

pub use crate::cli::{Cli, Command, TransferArgs};
pub use crate::config::{ServeConfig, TransferConfig};
pub use crate::data::{DataSink, DataSource};
pub use crate::error::TransferError;
pub use crate::packet::{ErrorCode, PacketError, TftpPacket};
pub use crate::server::Server;
pub use crate::transport::{Received, Transport, UdpTransport};
pub use crate::worker::Outcome;

pub const BLOCK_SIZE: usize = 512; // RFC 1350
pub const OCTET_MODE: &str = "octet";

pub const DEF_PORT: u16 = 69;
pub const DEF_TIMEOUT_MS: u64 = 1000;
pub const DEF_MAX_RETRIES: u8 = 5;
