//! Socket transport primitives for the phantom controller emulator
//!
//! This crate provides the connection-level building blocks the emulator's
//! four listening interfaces share:
//!
//! - [`DataChannel`]: one connected socket with non-blocking send/receive
//! - [`ReadinessMultiplexer`]: edge-triggered, single-shot readable watches
//!   delivered on the scheduler's execution context
//! - [`ChannelServer`]: one listening socket with explicit accept re-arming
//! - [`Transport`]: the bind/listen/accept setup helper the orchestrator
//!   stands up once per logical interface
//!
//! Readiness and accept callbacks never run on the I/O tasks that observe
//! them; they are enqueued on the [`phantom_sched`] executor, which is what
//! keeps the emulated controller's state single-threaded by construction.

pub mod channel;
pub mod error;
pub mod multiplexer;
pub mod server;
pub mod transport;

pub use channel::{ChannelId, DataChannel, ReadOutcome};
pub use error::NetError;
pub use multiplexer::{ChannelEvent, ReadinessMultiplexer};
pub use server::ChannelServer;
pub use transport::{EndpointConfig, Transport};
