use std::net::SocketAddr;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::block::{self, BlockOrder, FIRST_BLOCK};
use crate::config::TransferConfig;
use crate::data::DataSink;
use crate::error::{Result, TransferError};
use crate::packet::TftpPacket;
use crate::transport::{Received, Transport};
use crate::BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    RequestSent,
    AwaitingData,
    Complete,
    Aborted,
}

impl ReceiverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReceiverState::Complete | ReceiverState::Aborted)
    }
}

pub struct Receiver<'a, T, K> {
    transport: &'a mut T,
    server: SocketAddr,
    peer: Option<SocketAddr>,
    filename: String,
    sink: &'a mut K,
    config: &'a TransferConfig,
    state: ReceiverState,
    expected: u16,
    retries: u8,
    // The request until the first block arrives, then the latest ACK.
    last_packet: Vec<u8>,
    bytes_received: u64,
}

impl<'a, T, K> Receiver<'a, T, K>
where
    T: Transport,
    K: DataSink,
{
    pub fn new(
        transport: &'a mut T,
        server: SocketAddr,
        filename: impl Into<String>,
        sink: &'a mut K,
        config: &'a TransferConfig,
    ) -> Self {
        Self {
            transport,
            server,
            peer: None,
            filename: filename.into(),
            sink,
            config,
            state: ReceiverState::Idle,
            expected: FIRST_BLOCK,
            retries: 0,
            last_packet: Vec::new(),
            bytes_received: 0,
        }
    }

    pub async fn run(&mut self) -> Result<u64> {
        loop {
            let step = match self.state {
                ReceiverState::Idle => self.send_request().await,
                ReceiverState::RequestSent | ReceiverState::AwaitingData => {
                    self.await_data().await
                }
                ReceiverState::Complete => return Ok(self.bytes_received),
                ReceiverState::Aborted => return Err(TransferError::Cancelled),
            };
            if let Err(e) = step {
                self.state = ReceiverState::Aborted;
                debug!(server = %self.server, expected = self.expected, "receiver aborted: {e}");
                return Err(e);
            }
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    async fn send_request(&mut self) -> Result<()> {
        self.last_packet = TftpPacket::rrq(self.filename.as_str()).serialize();
        self.expected = FIRST_BLOCK;
        debug!(server = %self.server, filename = %self.filename, "send request");
        self.transport
            .send(&self.last_packet, self.server)
            .await
            .map_err(TransferError::Transport)?;
        self.state = ReceiverState::RequestSent;
        Ok(())
    }

    fn resend_target(&self) -> SocketAddr {
        self.peer.unwrap_or(self.server)
    }

    async fn await_data(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            let received = self
                .transport
                .recv_timeout(wait)
                .await
                .map_err(TransferError::Transport)?;

            let (buf, from) = match received {
                Received::Datagram(buf, from) => (buf, from),
                Received::Timeout => return self.resend_last().await,
            };
            if self.peer.is_some_and(|peer| peer != from) {
                debug!(%from, "ignoring datagram from unknown peer");
                continue;
            }

            match TftpPacket::deserialize(&buf) {
                Ok(TftpPacket::DATA { data, .. }) if data.len() > BLOCK_SIZE => {
                    debug!(len = data.len(), "discarding oversized data block");
                }
                Ok(TftpPacket::DATA { block, data }) => {
                    // The responder answers from its own transfer port, and
                    // only its first block may claim the session.
                    if self.peer.is_none() {
                        if block::classify(block, self.expected) != BlockOrder::Current {
                            debug!(%from, block, "discarding data before first block");
                            continue;
                        }
                        self.peer = Some(from);
                        self.state = ReceiverState::AwaitingData;
                    }
                    if self.on_data(block, data).await? {
                        return Ok(());
                    }
                }
                Ok(TftpPacket::ERROR { code, msg }) => {
                    return Err(TransferError::Peer { code, msg });
                }
                Ok(other) => debug!(opcode = other.opcode(), "ignoring unexpected packet"),
                Err(e) => debug!("discarding malformed packet: {e}"),
            }
        }
    }

    // true when the block advanced the transfer
    async fn on_data(&mut self, block: u16, data: Vec<u8>) -> Result<bool> {
        let peer = self.resend_target();
        match block::classify(block, self.expected) {
            BlockOrder::Current => {
                self.sink
                    .append_chunk(&data)
                    .await
                    .map_err(TransferError::Sink)?;
                self.bytes_received += data.len() as u64;

                trace!(block, len = data.len(), "ack data");
                self.last_packet = TftpPacket::ACK(block).serialize();
                self.transport
                    .send(&self.last_packet, peer)
                    .await
                    .map_err(TransferError::Transport)?;

                self.retries = 0;
                self.expected = block::next(block);
                if data.len() < BLOCK_SIZE {
                    self.state = ReceiverState::Complete;
                }
                Ok(true)
            }
            BlockOrder::Duplicate => {
                debug!(block, expected = self.expected, "duplicate block, re-acking");
                self.transport
                    .send(&TftpPacket::ACK(block).serialize(), peer)
                    .await
                    .map_err(TransferError::Transport)?;
                Ok(false)
            }
            BlockOrder::Ahead => {
                debug!(block, expected = self.expected, "discarding block ahead of sequence");
                Ok(false)
            }
        }
    }

    async fn resend_last(&mut self) -> Result<()> {
        self.retries += 1;
        if self.retries >= self.config.max_retries {
            return Err(TransferError::RetriesExhausted {
                block: self.expected,
                retries: self.retries,
            });
        }

        warn!(
            server = %self.server,
            expected = self.expected,
            retries = self.retries,
            "timeout, resending last packet"
        );
        self.transport
            .send(&self.last_packet, self.resend_target())
            .await
            .map_err(TransferError::Transport)
    }
}
