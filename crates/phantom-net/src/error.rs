//! Error types for the transport layer

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur in the transport layer
#[derive(Debug, Error)]
pub enum NetError {
    /// Binding or listening on an endpoint failed
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound
        addr: SocketAddr,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The peer is gone; the channel can no longer send
    #[error("channel is closed")]
    ChannelClosed,

    /// The scheduler backing the callbacks has shut down
    #[error(transparent)]
    Scheduler(#[from] phantom_sched::SchedulerError),

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
