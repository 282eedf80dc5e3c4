//! Session-side protocol glue
//!
//! A [`ControlLink`] holds the per-session decoder state and turns readiness
//! events on the control channel into parsed commands. One link per accepted
//! session; decoder state dies with the session.

use phantom_net::DataChannel;
use tracing::warn;

use crate::error::ControlError;
use crate::wire::{encode_response, Command, FrameDecoder};

/// How much to pull off the socket per read attempt
const READ_CHUNK: usize = 4096;

/// Result of draining a control channel
#[derive(Debug, Default)]
pub struct Drained {
    /// Commands that arrived complete, in order
    pub commands: Vec<Command>,
    /// True once the peer has closed its end
    pub closed: bool,
}

/// Per-session control protocol state
#[derive(Debug, Default)]
pub struct ControlLink {
    decoder: FrameDecoder,
}

impl ControlLink {
    /// Create a link for a freshly accepted session
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything readable from the channel into parsed commands
    ///
    /// Call on a readable edge. A malformed frame (invalid UTF-8) is logged
    /// and skipped; commands decoded before it are still returned and the
    /// session stays up.
    pub fn read_commands(&mut self, channel: &DataChannel) -> Result<Drained, ControlError> {
        let (bytes, closed) = channel.receive_available(READ_CHUNK)?;
        self.decoder.push_bytes(&bytes);

        let mut commands = Vec::new();
        loop {
            match self.decoder.next_command() {
                Ok(Some(command)) => commands.push(command),
                Ok(None) => break,
                Err(ControlError::InvalidUtf8) => {
                    warn!(
                        "malformed control frame from {}, dropping buffer",
                        channel.peer_addr()
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Drained { commands, closed })
    }

    /// Frame a response and queue it on the channel
    pub fn send_response(channel: &DataChannel, text: &str) -> Result<(), ControlError> {
        channel.send(encode_response(text))?;
        Ok(())
    }
}
