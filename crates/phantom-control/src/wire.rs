//! Control-channel wire format
//!
//! Fixed framing contract for the control interface:
//!
//! - Command frame: `u8` name length, name bytes, `u8` argument count, then
//!   per argument a `u8` length plus bytes. All text is UTF-8.
//! - Response frame: big-endian `u16` length, then UTF-8 text.
//!
//! The decoder is incremental and tolerates arbitrary TCP segmentation: feed
//! it whatever arrived, pull complete commands out. Length-driven framing
//! means the only malformed case is invalid UTF-8, which clears the buffer
//! (resynchronizing mid-stream is not possible once lengths are suspect).

use crate::error::ControlError;

/// One parsed protocol unit: a command name and its ordered arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command name, dispatched against the handler registry
    pub name: String,
    /// Ordered argument list
    pub args: Vec<String>,
}

impl Command {
    /// Create a command from a name and arguments
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Parse one script line ("NAME arg1 arg2")
    ///
    /// Returns None for blank lines and `#` comments.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.split_whitespace();
        let name = parts.next()?.to_string();
        let args = parts.map(str::to_string).collect();
        Some(Self { name, args })
    }
}

/// Encode a command frame
pub fn encode_command(cmd: &Command) -> Result<Vec<u8>, ControlError> {
    if cmd.args.len() > u8::MAX as usize {
        return Err(ControlError::TooManyArguments(cmd.args.len()));
    }

    let mut out = Vec::with_capacity(2 + cmd.name.len());
    push_field(&mut out, cmd.name.as_bytes())?;
    out.push(cmd.args.len() as u8);
    for arg in &cmd.args {
        push_field(&mut out, arg.as_bytes())?;
    }
    Ok(out)
}

fn push_field(out: &mut Vec<u8>, field: &[u8]) -> Result<(), ControlError> {
    if field.len() > u8::MAX as usize {
        return Err(ControlError::FieldTooLong(field.len()));
    }
    out.push(field.len() as u8);
    out.extend_from_slice(field);
    Ok(())
}

/// Encode a response frame
///
/// Responses longer than a `u16` can carry are truncated at a character
/// boundary rather than rejected; a driver losing the tail of a giant
/// response beats a driver losing the session.
pub fn encode_response(text: &str) -> Vec<u8> {
    let mut body = text.as_bytes();
    if body.len() > u16::MAX as usize {
        let mut cut = u16::MAX as usize;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        body = &text.as_bytes()[..cut];
    }
    let mut out = Vec::with_capacity(2 + body.len());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Decode one response frame from the front of a buffer
///
/// Returns the text and the number of bytes consumed, or None if the buffer
/// does not yet hold a complete frame. Used by test drivers.
pub fn decode_response(buf: &[u8]) -> Result<Option<(String, usize)>, ControlError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < 2 + len {
        return Ok(None);
    }
    let text = std::str::from_utf8(&buf[2..2 + len])
        .map_err(|_| ControlError::InvalidUtf8)?
        .to_string();
    Ok(Some((text, 2 + len)))
}

/// Incremental command-frame decoder
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes into the decoder
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pull the next complete command, if one has fully arrived
    ///
    /// On invalid UTF-8 the buffer is cleared and the error returned; the
    /// caller reports it to the session and keeps going.
    pub fn next_command(&mut self) -> Result<Option<Command>, ControlError> {
        let Some((frame_len, command)) = self.try_parse()? else {
            return Ok(None);
        };
        self.buf.drain(..frame_len);
        Ok(Some(command))
    }

    /// Number of buffered, not-yet-parsed bytes
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    fn try_parse(&mut self) -> Result<Option<(usize, Command)>, ControlError> {
        let buf = &self.buf;
        let mut pos = 0;

        let Some(name) = read_field(buf, &mut pos) else {
            return Ok(None);
        };
        if pos >= buf.len() {
            return Ok(None);
        }
        let argc = buf[pos] as usize;
        pos += 1;

        let mut raw_args = Vec::with_capacity(argc);
        for _ in 0..argc {
            let Some(arg) = read_field(buf, &mut pos) else {
                return Ok(None);
            };
            raw_args.push(arg);
        }

        let name = match std::str::from_utf8(name) {
            Ok(name) => name.to_string(),
            Err(_) => {
                self.buf.clear();
                return Err(ControlError::InvalidUtf8);
            }
        };
        let mut args = Vec::with_capacity(argc);
        for raw in raw_args {
            match std::str::from_utf8(raw) {
                Ok(arg) => args.push(arg.to_string()),
                Err(_) => {
                    self.buf.clear();
                    return Err(ControlError::InvalidUtf8);
                }
            }
        }

        Ok(Some((pos, Command { name, args })))
    }
}

/// Read one `u8`-length-prefixed field, advancing `pos`
fn read_field<'a>(buf: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    if *pos >= buf.len() {
        return None;
    }
    let len = buf[*pos] as usize;
    let start = *pos + 1;
    if buf.len() < start + len {
        return None;
    }
    *pos = start + len;
    Some(&buf[start..start + len])
}
