use std::net::SocketAddr;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::block::{self, FIRST_BLOCK};
use crate::config::TransferConfig;
use crate::data::DataSource;
use crate::error::{Result, TransferError};
use crate::packet::TftpPacket;
use crate::transport::{Received, Transport};
use crate::BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    AwaitingRequest,
    SendingBlock,
    AwaitingAck,
    Finished,
    Aborted,
}

impl SenderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SenderState::Finished | SenderState::Aborted)
    }
}

pub struct Sender<'a, T, S> {
    transport: &'a mut T,
    peer: SocketAddr,
    source: &'a mut S,
    config: &'a TransferConfig,
    state: SenderState,
    block: u16,
    retries: u8,
    // Encoded copy of the outstanding DATA message, resent verbatim.
    last_packet: Vec<u8>,
    last_len: usize,
    bytes_sent: u64,
}

impl<'a, T, S> Sender<'a, T, S>
where
    T: Transport,
    S: DataSource,
{
    pub fn new(
        transport: &'a mut T,
        peer: SocketAddr,
        source: &'a mut S,
        config: &'a TransferConfig,
    ) -> Self {
        Self {
            transport,
            peer,
            source,
            config,
            state: SenderState::AwaitingRequest,
            block: FIRST_BLOCK,
            retries: 0,
            last_packet: Vec::new(),
            last_len: 0,
            bytes_sent: 0,
        }
    }

    /// Returns the payload bytes delivered, each block counted once.
    pub async fn run(&mut self) -> Result<u64> {
        loop {
            let step = match self.state {
                SenderState::AwaitingRequest => {
                    self.state = SenderState::SendingBlock;
                    Ok(())
                }
                SenderState::SendingBlock => self.send_block().await,
                SenderState::AwaitingAck => self.await_ack().await,
                SenderState::Finished => return Ok(self.bytes_sent),
                SenderState::Aborted => return Err(TransferError::Cancelled),
            };
            if let Err(e) = step {
                self.state = SenderState::Aborted;
                debug!(peer = %self.peer, block = self.block, "sender aborted: {e}");
                return Err(e);
            }
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    async fn send_block(&mut self) -> Result<()> {
        let chunk = self
            .source
            .read_chunk(BLOCK_SIZE)
            .await
            .map_err(TransferError::Source)?;

        self.last_len = chunk.len();
        self.bytes_sent += chunk.len() as u64;
        self.last_packet = TftpPacket::DATA {
            block: self.block,
            data: chunk,
        }
        .serialize();

        trace!(block = self.block, len = self.last_len, "send data");
        self.transport
            .send(&self.last_packet, self.peer)
            .await
            .map_err(TransferError::Transport)?;
        self.state = SenderState::AwaitingAck;
        Ok(())
    }

    async fn await_ack(&mut self) -> Result<()> {
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
                Received::Timeout => return self.retransmit().await,
            };
            if from != self.peer {
                debug!(%from, "ignoring datagram from unknown peer");
                continue;
            }

            match TftpPacket::deserialize(&buf) {
                Ok(TftpPacket::ACK(ack)) if ack == self.block => {
                    self.retries = 0;
                    self.block = block::next(self.block);
                    self.state = if self.last_len < BLOCK_SIZE {
                        SenderState::Finished
                    } else {
                        SenderState::SendingBlock
                    };
                    return Ok(());
                }
                Ok(TftpPacket::ACK(ack)) => {
                    trace!(ack, block = self.block, "discarding stale ack");
                }
                Ok(TftpPacket::ERROR { code, msg }) => {
                    return Err(TransferError::Peer { code, msg });
                }
                Ok(other) => debug!(opcode = other.opcode(), "ignoring unexpected packet"),
                Err(e) => debug!("discarding malformed packet: {e}"),
            }
        }
    }

    async fn retransmit(&mut self) -> Result<()> {
        self.retries += 1;
        if self.retries >= self.config.max_retries {
            return Err(TransferError::RetriesExhausted {
                block: self.block,
                retries: self.retries,
            });
        }

        warn!(peer = %self.peer, block = self.block, retries = self.retries, "timeout, retransmitting");
        self.transport
            .send(&self.last_packet, self.peer)
            .await
            .map_err(TransferError::Transport)
    }
}
