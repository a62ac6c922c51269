//! Ownership-tracked audio graph and the contexts that run it.
//!
//! Every node lives in an [`AudioGraph`] owned by one [`AudioContext`]. The
//! component that created a node holds its [`NodeId`] and removes it when it
//! is done; closing a context tears down whatever is left.

use thiserror::Error;

pub mod context;
pub mod device;
pub mod graph;
pub mod media;
pub mod node;
pub mod param;

pub use context::{AudioContext, ContextFactory, ContextState, DeviceContextFactory, OfflineContextFactory};
pub use graph::{AudioGraph, NodeId};
pub use media::{MediaError, MediaLoader, MemoryLoader, PcmBuffer, RawPcmLoader};
pub use node::{BufferSource, NodeKind, Oscillator, ParamKind};
pub use param::AudioParam;

/// Errors raised by graph manipulation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("unknown or removed node {0:?}")]
    UnknownNode(NodeId),

    #[error("connecting {from:?} to {to:?} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },

    #[error("invalid automation: {0}")]
    InvalidRamp(String),

    #[error("node {0:?} does not support this operation")]
    WrongKind(NodeId),

    #[error("audio context is closed")]
    Closed,

    #[error("audio device error: {0}")]
    Device(String),
}

impl From<GraphError> for aura_core::Error {
    fn from(e: GraphError) -> Self {
        aura_core::Error::Audio(e.to_string())
    }
}

impl From<MediaError> for aura_core::Error {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::NotFound(what) => aura_core::Error::NotFound(what),
            other => aura_core::Error::Audio(other.to_string()),
        }
    }
}
