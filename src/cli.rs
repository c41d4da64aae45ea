use anstyle::AnsiColor;
use clap::builder::styling::Styles;
use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::config::{ServeConfig, TransferConfig};
use crate::{DEF_MAX_RETRIES, DEF_PORT, DEF_TIMEOUT_MS};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default())
    .usage(AnsiColor::Green.on_default())
    .literal(AnsiColor::Cyan.on_default())
    .placeholder(AnsiColor::Red.on_default());

#[derive(Parser, Debug)]
#[command(name = "tftp")]
#[command(about = "A lockstep TFTP read client/server", long_about = None)]
#[command(styles = STYLES)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve files from a directory
    Serve {
        /// Listen ip
        #[arg(short, long, default_value = "0.0.0.0")]
        ip: IpAddr,

        /// Listen Port
        #[arg(short, long, default_value_t = DEF_PORT)]
        port: u16,

        /// Work directory
        #[arg(short, long, default_value = ".")]
        directory: PathBuf,

        /// Refuse files larger than this many bytes
        #[arg(short, long)]
        max_size: Option<u64>,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Download a file from a server
    Get {
        /// Server host name or ip
        server: String,

        /// Remote file name
        filename: String,

        /// Server port
        #[arg(short, long, default_value_t = DEF_PORT)]
        port: u16,

        /// Local output path (defaults to the remote file name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        transfer: TransferArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// Timeout (ms)
    #[arg(short, long, default_value_t = DEF_TIMEOUT_MS)]
    pub timeout: u64,

    /// Max retries
    #[arg(short, long, default_value_t = DEF_MAX_RETRIES)]
    pub retry: u8,
}

impl From<&TransferArgs> for TransferConfig {
    fn from(args: &TransferArgs) -> Self {
        TransferConfig::new(args.timeout, args.retry)
    }
}

impl Command {
    /// Responder settings for `serve`; `None` for other commands.
    pub fn serve_config(&self) -> Option<ServeConfig> {
        match self {
            Command::Serve {
                directory,
                max_size,
                transfer,
                ..
            } => Some(ServeConfig {
                root: directory.clone(),
                max_file_size: *max_size,
                transfer: transfer.into(),
            }),
            Command::Get { .. } => None,
        }
    }
}
