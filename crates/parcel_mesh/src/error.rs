use thiserror::Error;

/// Errors raised while describing a mesh level.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshError {
    #[error("index box is empty (lo {lo:?}, hi {hi:?})")]
    EmptyBox { lo: [i32; 3], hi: [i32; 3] },

    #[error("real box dimension {dim} has lo {lo} >= hi {hi}")]
    InvalidRealBox { dim: usize, lo: f64, hi: f64 },

    #[error("box {box_index} is assigned to rank {rank} but only {nprocs} ranks exist")]
    RankOutOfRange {
        box_index: usize,
        rank: usize,
        nprocs: usize,
    },

    #[error("distribution mapping covers {ranks} boxes but the box array has {boxes}")]
    LengthMismatch { boxes: usize, ranks: usize },

    #[error("boxes {first} and {second} overlap")]
    OverlappingBoxes { first: usize, second: usize },

    #[error("maximum box size must be positive, got {0}")]
    InvalidMaxSize(i32),

    #[error("refinement ratio must be positive in every dimension, got {0:?}")]
    InvalidRefRatio([i32; 3]),
}
