//! Single-rank communicator

use crate::{CommError, Communicator};

/// The whole run is one rank; every collective is local.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl SerialComm {
    pub fn new() -> Self {
        Self
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn exchange(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        if outgoing.len() != 1 {
            return Err(CommError::MessageCount {
                expected: 1,
                actual: outgoing.len(),
            });
        }
        Ok(outgoing)
    }
}
