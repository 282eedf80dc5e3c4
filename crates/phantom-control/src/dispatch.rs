//! Command dispatcher
//!
//! Resolves parsed [`Command`]s against a registry of named handlers, with a
//! fallback table for command names this core treats as opaque (they belong
//! to the controller-state collaborator). Responses go to a swappable sink:
//! the active control session's channel when one exists, otherwise a logging
//! sink that never blocks and never errors.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::wire::Command;

/// Handler for one registered command name
pub type CommandHandler = Box<dyn FnMut(&[String]) -> Vec<String> + Send>;

/// Handler for command names with no registration of their own
pub type FallbackHandler = Box<dyn FnMut(&str, &[String]) -> Vec<String> + Send>;

/// Sink receiving textual responses
pub type ResponseSink = Box<dyn FnMut(&str) + Send>;

fn logging_sink() -> ResponseSink {
    Box::new(|response| info!("no control session, response dropped: {}", response))
}

/// Registry of command handlers plus the active response sink
pub struct ControlDispatcher {
    handlers: HashMap<String, CommandHandler>,
    fallback: Option<FallbackHandler>,
    sink: ResponseSink,
}

impl ControlDispatcher {
    /// Create a dispatcher with no handlers and the logging sink
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: None,
            sink: logging_sink(),
        }
    }

    /// Register a handler for a command name, replacing any previous one
    pub fn register_command(
        &mut self,
        name: impl Into<String>,
        handler: impl FnMut(&[String]) -> Vec<String> + Send + 'static,
    ) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Register the fallback for unregistered names
    ///
    /// This is where the controller collaborator's opaque command table
    /// plugs in.
    pub fn register_fallback(
        &mut self,
        handler: impl FnMut(&str, &[String]) -> Vec<String> + Send + 'static,
    ) {
        self.fallback = Some(Box::new(handler));
    }

    /// Route responses to a new sink (the active session's channel)
    pub fn register_response_sink(&mut self, sink: impl FnMut(&str) + Send + 'static) {
        self.sink = Box::new(sink);
    }

    /// Route responses back to the logging sink (no active session)
    pub fn reset_response_sink(&mut self) {
        self.sink = logging_sink();
    }

    /// Send a response through the current sink
    pub fn send_response(&mut self, response: &str) {
        (self.sink)(response);
    }

    /// Dispatch one command
    ///
    /// Unrecognized names produce an error response, never a failure; the
    /// session stays up.
    pub fn dispatch(&mut self, command: &Command) {
        debug!("dispatching {} ({} args)", command.name, command.args.len());

        let responses = if let Some(handler) = self.handlers.get_mut(&command.name) {
            handler(&command.args)
        } else if let Some(fallback) = self.fallback.as_mut() {
            fallback(&command.name, &command.args)
        } else {
            vec![format!("unknown command: {}", command.name)]
        };

        for response in responses {
            (self.sink)(&response);
        }
    }

    /// Dispatch every command in a script, in order
    ///
    /// One command per line, `#` comments and blank lines skipped. Uses the
    /// same dispatch path as live commands, so scripted and live commands
    /// are indistinguishable to the handlers.
    pub fn preload(&mut self, script: &str) {
        for command in script.lines().filter_map(Command::parse_line) {
            self.dispatch(&command);
        }
    }
}

impl Default for ControlDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
