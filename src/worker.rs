use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ServeConfig, TransferConfig};
use crate::data::{DataSink, DataSource};
use crate::error::TransferError;
use crate::packet::{ErrorCode, TftpPacket};
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::transport::Transport;
use crate::OCTET_MODE;

#[derive(Debug)]
pub enum Outcome {
    Completed(u64),
    Failed(TransferError),
    PeerError { code: ErrorCode, msg: String },
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    fn from_result(res: Result<u64, TransferError>) -> Self {
        match res {
            Ok(bytes) => Outcome::Completed(bytes),
            Err(TransferError::Peer { code, msg }) => Outcome::PeerError { code, msg },
            Err(e) => Outcome::Failed(e),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed(bytes) => write!(f, "completed, {bytes} bytes"),
            Outcome::Failed(e) => write!(f, "failed: {e}"),
            Outcome::PeerError { code, msg } => write!(f, "peer error {code}: {msg}"),
        }
    }
}

pub async fn send_file<T, S, C>(
    mut transport: T,
    peer: SocketAddr,
    mut source: S,
    config: &TransferConfig,
    cancel: C,
) -> Outcome
where
    T: Transport,
    S: DataSource,
    C: Future<Output = ()>,
{
    let start = Instant::now();
    let res = {
        let mut sender = Sender::new(&mut transport, peer, &mut source, config);
        tokio::select! {
            res = sender.run() => res,
            _ = cancel => Err(TransferError::Cancelled),
        }
    };
    finish(&transport, peer, res, start).await
}

pub async fn fetch<T, K, C>(
    mut transport: T,
    server: SocketAddr,
    filename: &str,
    mut sink: K,
    config: &TransferConfig,
    cancel: C,
) -> Outcome
where
    T: Transport,
    K: DataSink,
    C: Future<Output = ()>,
{
    let start = Instant::now();
    let (res, peer) = {
        let mut receiver = Receiver::new(&mut transport, server, filename, &mut sink, config);
        let res = tokio::select! {
            res = receiver.run() => res,
            _ = cancel => Err(TransferError::Cancelled),
        };
        (res, receiver.peer().unwrap_or(server))
    };
    let res = match res {
        Ok(bytes) => sink.flush().await.map(|_| bytes).map_err(TransferError::Sink),
        Err(e) => Err(e),
    };
    finish(&transport, peer, res, start).await
}

/// Refusals are reported to the peer before any DATA is sent.
pub async fn serve_read<T, C>(
    transport: T,
    peer: SocketAddr,
    filename: &str,
    mode: &str,
    config: &ServeConfig,
    cancel: C,
) -> Outcome
where
    T: Transport,
    C: Future<Output = ()>,
{
    match open_requested(filename, mode, config).await {
        Ok((file, len)) => {
            info!(%peer, filename, len, "start transfer");
            send_file(transport, peer, file, &config.transfer, cancel).await
        }
        Err((code, msg)) => {
            warn!(%peer, filename, "refusing request: {msg}");
            let error = TftpPacket::error(code, msg.as_str()).serialize();
            if let Err(e) = transport.send(&error, peer).await {
                debug!(%peer, "failed to send error: {e}");
            }
            Outcome::Failed(TransferError::Refused { code, msg })
        }
    }
}

async fn open_requested(
    filename: &str,
    mode: &str,
    config: &ServeConfig,
) -> Result<(File, u64), (ErrorCode, String)> {
    if !mode.eq_ignore_ascii_case(OCTET_MODE) {
        return Err((ErrorCode::NotDefined, format!("Unsupported '{mode}' mode")));
    }

    let path = resolve(&config.root, filename).ok_or_else(|| refusal(ErrorCode::AccessViolation))?;
    let metadata = fs::metadata(&path).await.map_err(io_refusal)?;
    if !metadata.is_file() {
        return Err(refusal(ErrorCode::AccessViolation));
    }
    if config.max_file_size.is_some_and(|max| metadata.len() > max) {
        return Err(refusal(ErrorCode::DiskFull));
    }

    let file = File::open(&path).await.map_err(io_refusal)?;
    Ok((file, metadata.len()))
}

// Only the final path component is honoured, confining requests to root.
fn resolve(root: &Path, filename: &str) -> Option<PathBuf> {
    let name = Path::new(filename).file_name()?;
    Some(root.join(name))
}

fn refusal(code: ErrorCode) -> (ErrorCode, String) {
    (code, code.default_message().to_string())
}

fn io_refusal(e: io::Error) -> (ErrorCode, String) {
    match e.kind() {
        io::ErrorKind::NotFound => refusal(ErrorCode::FileNotFound),
        io::ErrorKind::PermissionDenied => refusal(ErrorCode::AccessViolation),
        _ => (ErrorCode::NotDefined, e.to_string()),
    }
}

async fn finish<T: Transport>(
    transport: &T,
    peer: SocketAddr,
    res: Result<u64, TransferError>,
    start: Instant,
) -> Outcome {
    if let Err(e) = &res {
        if let Some((code, msg)) = e.courtesy_error() {
            let error = TftpPacket::error(code, msg).serialize();
            if let Err(send_err) = transport.send(&error, peer).await {
                debug!(%peer, "failed to send error: {send_err}");
            }
        }
    }

    let outcome = Outcome::from_result(res);
    match &outcome {
        Outcome::Completed(bytes) => {
            let cost = start.elapsed().as_secs_f64();
            info!(
                %peer,
                bytes,
                "cost: {:.3}s, speed: {:.2} MB/s",
                cost,
                *bytes as f64 / cost.max(f64::EPSILON) / 1024.0 / 1024.0
            );
        }
        other => warn!(%peer, "transfer {other}"),
    }
    outcome
}
