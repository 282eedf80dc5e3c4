//! Text control protocol for the phantom controller emulator
//!
//! The control channel is the side interface a test driver uses to steer a
//! simulation: inject configuration commands, change timing, load command
//! scripts, and terminate the run. This crate implements the wire format,
//! the command dispatcher, and the glue that drains a data channel into
//! parsed commands.
//!
//! # Wire format
//!
//! Commands (driver → emulator): a `u8` name length, the UTF-8 name, a `u8`
//! argument count, then each argument as a `u8` length followed by UTF-8
//! bytes. Responses (emulator → driver): a big-endian `u16` length followed
//! by UTF-8 text. The format is a fixed contract; see [`wire`].
//!
//! Scripted commands ("NAME arg1 arg2" lines) go through the exact same
//! dispatch path as live ones, so a preloaded script and a live session are
//! indistinguishable to the emulated controller.

pub mod dispatch;
pub mod error;
pub mod link;
pub mod wire;

pub use dispatch::ControlDispatcher;
pub use error::ControlError;
pub use link::{ControlLink, Drained};
pub use wire::{encode_command, encode_response, Command, FrameDecoder};
