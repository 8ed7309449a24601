//! In-process multi-rank communicator
//!
//! Each rank is a thread holding one `LocalComm`. Every ordered rank pair has
//! its own unbounded channel, so sends never block and per-pair FIFO order
//! lines collectives up. Each message carries the sender's collective sequence
//! number; a mismatch means the ranks called collectives in different orders.

use crate::{CommError, Communicator};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const HEADER_LEN: usize = std::mem::size_of::<u64>();

/// Transport settings for [`LocalComm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalCommConfig {
    /// How long a receive waits for a peer before the collective fails.
    pub timeout_ms: u64,
}

impl Default for LocalCommConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// One rank's endpoint of an in-process universe.
pub struct LocalComm {
    rank: usize,
    size: usize,
    senders: Vec<Sender<Vec<u8>>>,     // indexed by destination rank
    receivers: Vec<Receiver<Vec<u8>>>, // indexed by source rank
    timeout: Duration,
    sequence: AtomicU64,
}

impl LocalComm {
    /// Create connected endpoints for `size` ranks; element `r` is rank `r`.
    pub fn universe(size: usize, config: LocalCommConfig) -> Vec<LocalComm> {
        let size = size.max(1);
        let mut senders: Vec<Vec<Sender<Vec<u8>>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Receiver<Vec<u8>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();

        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = unbounded();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalComm {
                rank,
                size,
                senders,
                receivers,
                timeout: Duration::from_millis(config.timeout_ms),
                sequence: AtomicU64::new(0),
            })
            .collect()
    }

    fn recv_from(&self, peer: usize, expected: u64) -> Result<Vec<u8>, CommError> {
        let mut framed = self.receivers[peer]
            .recv_timeout(self.timeout)
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => CommError::Timeout {
                    peer,
                    waited_ms: self.timeout.as_millis() as u64,
                },
                RecvTimeoutError::Disconnected => CommError::Disconnected { peer },
            })?;

        if framed.len() < HEADER_LEN {
            return Err(CommError::Malformed {
                peer,
                reason: format!("{} byte message has no header", framed.len()),
            });
        }
        let got: u64 = bytemuck::pod_read_unaligned(&framed[..HEADER_LEN]);
        if got != expected {
            return Err(CommError::OutOfSequence { peer, expected, got });
        }
        Ok(framed.split_off(HEADER_LEN))
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn exchange(&self, mut outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        if outgoing.len() != self.size {
            return Err(CommError::MessageCount {
                expected: self.size,
                actual: outgoing.len(),
            });
        }
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);

        let mut sent_bytes = 0usize;
        for (peer, payload) in outgoing.iter_mut().enumerate() {
            if peer == self.rank {
                continue;
            }
            let mut framed = Vec::with_capacity(HEADER_LEN + payload.len());
            framed.extend_from_slice(bytemuck::bytes_of(&seq));
            framed.append(payload);
            sent_bytes += framed.len();
            self.senders[peer]
                .send(framed)
                .map_err(|_| CommError::Disconnected { peer })?;
        }

        let mut incoming = vec![Vec::new(); self.size];
        incoming[self.rank] = std::mem::take(&mut outgoing[self.rank]);
        for (peer, slot) in incoming.iter_mut().enumerate() {
            if peer == self.rank {
                continue;
            }
            *slot = self.recv_from(peer, seq)?;
        }

        tracing::trace!(rank = self.rank, seq, sent_bytes, "exchange complete");
        Ok(incoming)
    }
}
