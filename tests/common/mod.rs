//! In-memory datagram link for exercising the transfer machines without a
//! network. Each end can be given a fault function that decides, per
//! outgoing datagram, whether it is delivered, dropped, duplicated or held
//! back until the next datagram overtakes it.
//!
//! Every datagram an end emits is recorded before faults are applied, so
//! tests can count what each side actually sent.

#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lockstep_tftp::config::TransferConfig;
use lockstep_tftp::transport::{Received, Transport};
use lockstep_tftp::worker::{self, Outcome};
use lockstep_tftp::{ErrorCode, TftpPacket};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Deliver,
    Drop,
    Duplicate,
    /// Held until the next datagram on the same link has been delivered.
    Delay,
}

pub type FaultFn = Box<dyn FnMut(&TftpPacket) -> Fault + Send>;

/// What an end sent, without payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Request(String),
    Data { block: u16, len: usize },
    Ack(u16),
    Error(ErrorCode),
    Garbage,
}

#[derive(Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<Sent>>>);

impl SentLog {
    pub fn all(&self) -> Vec<Sent> {
        self.0.lock().clone()
    }

    pub fn data_blocks(&self) -> Vec<(u16, usize)> {
        self.0
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Data { block, len } => Some((*block, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self) -> Vec<u16> {
        self.0
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Ack(block) => Some(*block),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Sent) -> usize {
        self.0.lock().iter().filter(|s| *s == wanted).count()
    }

    fn push(&self, sent: Sent) {
        self.0.lock().push(sent);
    }
}

type Datagram = (Vec<u8>, SocketAddr);

pub struct MemoryTransport {
    local: SocketAddr,
    outbox: mpsc::UnboundedSender<Datagram>,
    inbox: mpsc::UnboundedReceiver<Datagram>,
    // Lets tests inject datagrams that appear to come from anywhere.
    loopback: mpsc::UnboundedSender<Datagram>,
    faults: Mutex<FaultFn>,
    held: Mutex<Option<Vec<u8>>>,
    log: SentLog,
}

pub fn pair(a: SocketAddr, b: SocketAddr) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let end = |local, outbox, inbox, loopback| {
        let deliver_all: FaultFn = Box::new(|_: &TftpPacket| Fault::Deliver);
        MemoryTransport {
            local,
            outbox,
            inbox,
            loopback,
            faults: Mutex::new(deliver_all),
            held: Mutex::new(None),
            log: SentLog::default(),
        }
    };
    (
        end(a, b_tx.clone(), a_rx, a_tx.clone()),
        end(b, a_tx, b_rx, b_tx),
    )
}

impl MemoryTransport {
    pub fn with_faults(self, faults: impl FnMut(&TftpPacket) -> Fault + Send + 'static) -> Self {
        *self.faults.lock() = Box::new(faults);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn log(&self) -> SentLog {
        self.log.clone()
    }

    pub fn inject(&self, pkt: &TftpPacket, from: SocketAddr) {
        let _ = self.loopback.send((pkt.serialize(), from));
    }

    fn deliver(&self, buf: Vec<u8>) {
        // A closed channel is a peer that went away: the datagram is lost.
        let _ = self.outbox.send((buf, self.local));
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, buf: &[u8], _to: SocketAddr) -> std::io::Result<()> {
        let fault = match TftpPacket::deserialize(buf) {
            Ok(pkt) => {
                self.log.push(summarize(&pkt));
                let mut faults = self.faults.lock();
                (*faults)(&pkt)
            }
            Err(_) => {
                self.log.push(Sent::Garbage);
                Fault::Deliver
            }
        };

        match fault {
            Fault::Drop => {}
            Fault::Delay => {
                let previous = self.held.lock().replace(buf.to_vec());
                if let Some(previous) = previous {
                    self.deliver(previous);
                }
            }
            Fault::Deliver | Fault::Duplicate => {
                self.deliver(buf.to_vec());
                if fault == Fault::Duplicate {
                    self.deliver(buf.to_vec());
                }
                let held = self.held.lock().take();
                if let Some(held) = held {
                    self.deliver(held);
                }
            }
        }
        Ok(())
    }

    async fn recv_timeout(&mut self, wait: Duration) -> std::io::Result<Received> {
        match tokio::time::timeout(wait, self.inbox.recv()).await {
            Ok(Some((buf, from))) => Ok(Received::Datagram(buf, from)),
            Ok(None) => {
                tokio::time::sleep(wait).await;
                Ok(Received::Timeout)
            }
            Err(_) => Ok(Received::Timeout),
        }
    }
}

fn summarize(pkt: &TftpPacket) -> Sent {
    match pkt {
        TftpPacket::RRQ { filename, .. } => Sent::Request(filename.clone()),
        TftpPacket::DATA { block, data } => Sent::Data {
            block: *block,
            len: data.len(),
        },
        TftpPacket::ACK(block) => Sent::Ack(*block),
        TftpPacket::ERROR { code, .. } => Sent::Error(*code),
    }
}

/// Drops the first datagram matching `pred`, delivers everything else.
pub fn drop_once(
    mut pred: impl FnMut(&TftpPacket) -> bool + Send + 'static,
) -> impl FnMut(&TftpPacket) -> Fault + Send + 'static {
    let mut fired = false;
    move |pkt: &TftpPacket| {
        if !fired && pred(pkt) {
            fired = true;
            Fault::Drop
        } else {
            Fault::Deliver
        }
    }
}

/// Independent per-datagram faults drawn from a seeded generator.
pub fn random_faults(
    seed: u64,
    loss: f64,
    duplicate: f64,
    delay: f64,
) -> impl FnMut(&TftpPacket) -> Fault + Send + 'static {
    let mut rng = StdRng::seed_from_u64(seed);
    move |_: &TftpPacket| {
        let roll: f64 = rng.gen();
        if roll < loss {
            Fault::Drop
        } else if roll < loss + duplicate {
            Fault::Duplicate
        } else if roll < loss + duplicate + delay {
            Fault::Delay
        } else {
            Fault::Deliver
        }
    }
}

pub fn client_addr() -> SocketAddr {
    "10.0.0.2:40000".parse().unwrap()
}

pub fn server_addr() -> SocketAddr {
    "10.0.0.1:50000".parse().unwrap()
}

pub fn test_data(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill(&mut data[..]);
    data
}

/// Waits for the read request a client sends to this end.
pub async fn accept_request(transport: &mut MemoryTransport) -> (String, String, SocketAddr) {
    loop {
        match transport.recv_timeout(Duration::from_secs(3600)).await.unwrap() {
            Received::Datagram(buf, from) => {
                if let Ok(TftpPacket::RRQ { filename, mode }) = TftpPacket::deserialize(&buf) {
                    return (filename, mode, from);
                }
            }
            Received::Timeout => panic!("no request arrived"),
        }
    }
}

pub struct Run {
    pub client: Outcome,
    pub server: Outcome,
    pub received: Vec<u8>,
    pub client_log: SentLog,
    pub server_log: SentLog,
}

/// Runs a whole download of `data` between a fetching client and a
/// responder fed from memory, each over its own end of a faulty link.
pub async fn transfer(
    data: Vec<u8>,
    client: MemoryTransport,
    server: MemoryTransport,
    client_config: TransferConfig,
    server_config: TransferConfig,
) -> Run {
    let client_log = client.log();
    let server_log = server.log();
    let target = server.local_addr();

    let server_task = tokio::spawn(async move {
        let mut server = server;
        let (_, _, peer) = accept_request(&mut server).await;
        worker::send_file(
            server,
            peer,
            Cursor::new(data),
            &server_config,
            std::future::pending(),
        )
        .await
    });
    let client_task = tokio::spawn(async move {
        let mut received = Vec::new();
        let outcome = worker::fetch(
            client,
            target,
            "file.bin",
            &mut received,
            &client_config,
            std::future::pending(),
        )
        .await;
        (outcome, received)
    });

    let (client, received) = client_task.await.unwrap();
    let server = server_task.await.unwrap();
    Run {
        client,
        server,
        received,
        client_log,
        server_log,
    }
}

pub fn config(timeout_ms: u64, max_retries: u8) -> TransferConfig {
    TransferConfig::new(timeout_ms, max_retries)
}
