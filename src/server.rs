use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServeConfig;
use crate::error::TransferError;
use crate::packet::TftpPacket;
use crate::transport::UdpTransport;
use crate::worker::{self, Outcome};

// Requests are small; anything that does not fit is not a valid request.
const REQUEST_BUF: usize = 1472;

// A client that repeats its request is already being served by this worker.
type RequestKey = (SocketAddr, String);

pub struct Server {
    socket: UdpSocket,
    config: Arc<ServeConfig>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, config: ServeConfig) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self {
            socket,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serves requests until `shutdown` resolves, then cancels every
    /// in-flight transfer and waits for its worker to finish.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (cancel_tx, _) = broadcast::channel::<()>(1);
        let mut workers = JoinSet::new();
        let mut in_flight = HashSet::new();
        let mut buf = [0u8; REQUEST_BUF];

        info!(
            "TFTP server listen on {}, root: {}, timeout: {} ms, retry: {}",
            self.socket.local_addr()?,
            self.config.root.display(),
            self.config.transfer.timeout.as_millis(),
            self.config.transfer.max_retries
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                res = self.socket.recv_from(&mut buf) => {
                    let (n, addr) = match res {
                        Ok(r) => r,
                        Err(e) => {
                            // Errors on the listening socket are per-datagram
                            // on most platforms; keep serving.
                            warn!("receive on listening socket failed: {e}");
                            continue;
                        }
                    };
                    self.dispatch(&buf[..n], addr, &cancel_tx, &mut workers, &mut in_flight);
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    match joined {
                        Ok((key, _)) => {
                            in_flight.remove(&key);
                        }
                        Err(e) => error!("worker task failed: {e}"),
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        info!(active = workers.len(), "shutting down");
        // No receivers simply means no transfer is running.
        let _ = cancel_tx.send(());
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("worker task failed: {e}");
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        datagram: &[u8],
        addr: SocketAddr,
        cancel_tx: &broadcast::Sender<()>,
        workers: &mut JoinSet<(RequestKey, Outcome)>,
        in_flight: &mut HashSet<RequestKey>,
    ) {
        let (filename, mode) = match TftpPacket::deserialize(datagram) {
            Ok(TftpPacket::RRQ { filename, mode }) => (filename, mode),
            Ok(other) => {
                debug!(%addr, opcode = other.opcode(), "ignoring non-request on listening port");
                return;
            }
            Err(e) => {
                debug!(%addr, "discarding malformed request: {e}");
                return;
            }
        };

        let key = (addr, filename.clone());
        if in_flight.contains(&key) {
            debug!(%addr, %filename, "repeated request for a running transfer");
            return;
        }
        in_flight.insert(key.clone());

        info!(%addr, %filename, %mode, "read request");
        let config = Arc::clone(&self.config);
        let mut cancel_rx = cancel_tx.subscribe();
        workers.spawn(async move {
            let cancel = async move {
                let _ = cancel_rx.recv().await;
            };
            let transport = match UdpTransport::ephemeral_for(addr).await {
                Ok(t) => t,
                Err(e) => {
                    error!(%addr, "cannot bind transfer socket: {e}");
                    return (key, Outcome::Failed(TransferError::Transport(e)));
                }
            };
            let outcome =
                worker::serve_read(transport, addr, &filename, &mode, &config, cancel).await;
            (key, outcome)
        });
    }
}
