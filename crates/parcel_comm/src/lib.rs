//! Parcel Communication Layer
//!
//! Rank-to-rank transport consumed by the particle container:
//! - Sparse all-to-all byte exchange (particle migration)
//! - Integer reductions (global particle counts, memory spreads)
//! - Barrier
//!
//! [`SerialComm`] is the single-rank case; [`LocalComm`] runs several ranks as
//! threads of one process and is what the multi-rank tests use.

mod error;
mod local;
mod serial;

pub use error::CommError;
pub use local::{LocalComm, LocalCommConfig};
pub use serial::SerialComm;

/// Reduction applied element-wise by [`Communicator::allreduce_i64`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    #[inline]
    fn apply(self, a: i64, b: i64) -> i64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

/// Collective communication service shared by every rank of a run.
///
/// Every method except `rank`/`size` is collective: all ranks must call it,
/// in the same order, or the run stalls until the transport times out.
pub trait Communicator: Send + Sync {
    /// Rank of the calling process, `0..size()`.
    fn rank(&self) -> usize;

    /// Number of cooperating ranks.
    fn size(&self) -> usize;

    /// All-to-all exchange. `outgoing[r]` is delivered to rank `r`; the
    /// result holds at index `r` what rank `r` sent here. The entry for the
    /// calling rank is handed back untouched.
    fn exchange(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError>;

    /// Element-wise reduction of `values` across all ranks, in place.
    fn allreduce_i64(&self, values: &mut [i64], op: ReduceOp) -> Result<(), CommError> {
        if self.size() == 1 {
            return Ok(());
        }
        let payload = bytemuck::cast_slice::<i64, u8>(values).to_vec();
        let incoming = self.exchange(vec![payload; self.size()])?;
        for (peer, bytes) in incoming.iter().enumerate() {
            if peer == self.rank() {
                continue;
            }
            if bytes.len() != values.len() * std::mem::size_of::<i64>() {
                return Err(CommError::Malformed {
                    peer,
                    reason: format!("expected {} reduction values", values.len()),
                });
            }
            for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(8)) {
                let theirs: i64 = bytemuck::pod_read_unaligned(chunk);
                *value = op.apply(*value, theirs);
            }
        }
        Ok(())
    }

    /// Block until every rank reaches the barrier.
    fn barrier(&self) -> Result<(), CommError> {
        self.exchange(vec![Vec::new(); self.size()]).map(|_| ())
    }

    /// Rank that should emit run-wide log lines.
    fn is_io_rank(&self) -> bool {
        self.rank() == 0
    }
}
