//! Process groups: the set of cooperating workers that run the setup pipeline.
//!
//! Every worker executes the same pipeline on the part of the system tree assigned to it. The only
//! collective the pipeline needs is an all-gather: each rank contributes a payload and receives the
//! payloads of every rank, in rank order. Payloads are JSON encoded so that a [`ProcessGroup`]
//! implementation only has to move bytes.

use serde::{de::DeserializeOwned, Serialize};

#[cfg(feature = "threads")]
pub mod threaded;

#[cfg(feature = "threads")]
pub use threaded::{ThreadComm, ThreadGroup};

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("Rank {rank} left the process group before contributing")]
    PeerDisconnected { rank: usize },

    #[error("Process group state is poisoned")]
    Poisoned,

    #[error("Expected {expected} contributions, found {found}")]
    PayloadCount { expected: usize, found: usize },

    #[error("Error encoding collective payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A handle to a group of cooperating workers.
pub trait ProcessGroup: std::fmt::Debug {
    /// Index of the current worker, `0 <= rank < size`.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Contribute `payload` and block until every rank has contributed.
    ///
    /// # Returns
    /// One payload per rank, ordered by rank.
    fn all_gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError>;
}

/// Typed all-gather on top of [`ProcessGroup::all_gather_bytes`].
pub fn all_gather<T>(comm: &dyn ProcessGroup, value: &T) -> Result<Vec<T>, CommError>
where
    T: Serialize + DeserializeOwned,
{
    all_gather_as(comm, value)
}

/// All-gather where the contribution is a borrowed form of the gathered type, such as
/// `Option<&T>` gathered as `Option<T>`.
pub fn all_gather_as<T, U>(comm: &dyn ProcessGroup, value: &T) -> Result<Vec<U>, CommError>
where
    T: Serialize + ?Sized,
    U: DeserializeOwned,
{
    let payload = serde_json::to_vec(value)?;
    let gathered = comm.all_gather_bytes(payload)?;
    if gathered.len() != comm.size() {
        return Err(CommError::PayloadCount {
            expected: comm.size(),
            found: gathered.len(),
        });
    }
    gathered
        .iter()
        .map(|bytes| serde_json::from_slice(bytes).map_err(CommError::from))
        .collect()
}

/// The single-worker identity group.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialGroup;

impl ProcessGroup for SerialGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        Ok(vec![payload])
    }
}
