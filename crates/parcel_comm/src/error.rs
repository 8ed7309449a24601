use thiserror::Error;

/// Failures of a collective or point-to-point operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommError {
    #[error("timed out after {waited_ms} ms waiting for rank {peer}")]
    Timeout { peer: usize, waited_ms: u64 },

    #[error("rank {peer} hung up")]
    Disconnected { peer: usize },

    #[error("exchange needs one buffer per rank ({expected}), got {actual}")]
    MessageCount { expected: usize, actual: usize },

    #[error("rank {peer} is at collective #{got} but this rank is at #{expected}")]
    OutOfSequence { peer: usize, expected: u64, got: u64 },

    #[error("malformed message from rank {peer}: {reason}")]
    Malformed { peer: usize, reason: String },
}
