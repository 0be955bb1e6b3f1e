//! Error types for micbridge.
//!
//! Only backend setup is allowed to fail hard. Everything else (a missing
//! app, a rejected link, an unsupported capability) is logged and surfaces
//! as a `bool`/`Option` from the [`AudioBackend`](crate::AudioBackend)
//! methods, so these variants mostly travel between internal layers.

use std::time::Duration;

use crate::graph::ObjectId;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// Connection, context or registry could not be obtained.
    #[error("backend setup failed: {0}")]
    Setup(String),

    /// The server did not answer a round trip in time.
    #[error("sync round trip {seq} not completed after {waited:?}")]
    SyncTimeout { seq: i32, waited: Duration },

    /// The backend thread is running but did not answer a request in time.
    #[error("backend thread did not answer within {waited:?}")]
    Unanswered { waited: Duration },

    /// The server rejected a link or object request.
    #[error("link operation failed: {0}")]
    Link(String),

    /// The server reported an error outside of a link request.
    #[error("sound server error: {0}")]
    Server(String),

    /// The backend thread is gone (shut down or crashed).
    #[error("backend disconnected")]
    Disconnected,

    /// The node is not (or no longer) tracked by the registry.
    #[error("node {0} is not tracked")]
    UnknownNode(ObjectId),

    /// The capability is not implemented by this backend.
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, RoutingError>;
