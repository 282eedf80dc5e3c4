//! Controller capability interface
//!
//! [`ControllerModel`] is the seam between the transport/scheduling substrate
//! and the emulated controller proper. The environment drives it through a
//! narrow set of calls: lifecycle hooks, timer ticks, accepted connections,
//! and an opaque command table for everything the substrate does not handle
//! itself.
//!
//! [`SimController`] is the in-tree model: it records what happened so the
//! protocol is observable end to end, and answers `LIST` with its state.
//! Real controller semantics live behind this trait, outside this workspace.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use phantom_net::DataChannel;
use tracing::{debug, info};

/// A controller model shared between the environment and command handlers
pub type SharedModel = Arc<Mutex<dyn ControllerModel>>;

/// Capabilities the environment requires of a controller
pub trait ControllerModel: Send {
    /// Called once before any interface is bound
    fn start(&mut self) {}

    /// Called when the environment shuts down
    fn stop(&mut self) {}

    /// Drop all accumulated state
    fn reset(&mut self);

    /// One timer tick on the execution context
    fn tick(&mut self);

    /// Attach a phy of the named category
    fn add_phy(&mut self, kind: &str);

    /// Current tick period
    fn timer_period(&self) -> Duration;

    /// Change the tick period
    fn set_timer_period(&mut self, period: Duration);

    /// Handle a control command the substrate does not recognize
    ///
    /// Returns response lines; an unsupported name must produce an error
    /// line, never a panic or silence.
    fn handle_command(&mut self, name: &str, args: &[String]) -> Vec<String>;

    /// A peer connected on the command interface
    fn incoming_command_connection(&mut self, channel: DataChannel);

    /// A peer connected on the link interface
    fn incoming_link_connection(&mut self, channel: DataChannel);

    /// A peer connected on the low-energy link interface
    fn incoming_low_energy_connection(&mut self, channel: DataChannel);
}

const DEFAULT_TIMER_PERIOD: Duration = Duration::from_secs(1);

/// Recording controller model
#[derive(Debug)]
pub struct SimController {
    phys: Vec<String>,
    timer_period: Duration,
    ticks: u64,
    command_channels: Vec<DataChannel>,
    link_channels: Vec<DataChannel>,
    low_energy_channels: Vec<DataChannel>,
}

impl SimController {
    pub fn new() -> Self {
        Self {
            phys: Vec::new(),
            timer_period: DEFAULT_TIMER_PERIOD,
            ticks: 0,
            command_channels: Vec::new(),
            link_channels: Vec::new(),
            low_energy_channels: Vec::new(),
        }
    }

    /// Phy categories attached so far, in attach order
    pub fn phys(&self) -> &[String] {
        &self.phys
    }

    /// Ticks observed so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Default for SimController {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerModel for SimController {
    fn reset(&mut self) {
        *self = Self::new();
    }

    fn tick(&mut self) {
        self.ticks += 1;
        debug!("tick {}", self.ticks);
    }

    fn add_phy(&mut self, kind: &str) {
        info!("attaching phy {}", kind);
        self.phys.push(kind.to_string());
    }

    fn timer_period(&self) -> Duration {
        self.timer_period
    }

    fn set_timer_period(&mut self, period: Duration) {
        self.timer_period = period;
    }

    fn handle_command(&mut self, name: &str, args: &[String]) -> Vec<String> {
        match name {
            "LIST" => vec![
                format!("phys: {}", self.phys.join(" ")),
                format!("timer_period_ms: {}", self.timer_period.as_millis()),
                format!("ticks: {}", self.ticks),
                format!("command_channels: {}", self.command_channels.len()),
                format!("link_channels: {}", self.link_channels.len()),
                format!("low_energy_channels: {}", self.low_energy_channels.len()),
            ],
            _ => {
                debug!("unsupported command {} ({} args)", name, args.len());
                vec![format!("unsupported command: {}", name)]
            }
        }
    }

    fn incoming_command_connection(&mut self, channel: DataChannel) {
        info!("command peer connected: {}", channel.peer_addr());
        self.command_channels.push(channel);
    }

    fn incoming_link_connection(&mut self, channel: DataChannel) {
        info!("link peer connected: {}", channel.peer_addr());
        self.link_channels.push(channel);
    }

    fn incoming_low_energy_connection(&mut self, channel: DataChannel) {
        info!("low-energy peer connected: {}", channel.peer_addr());
        self.low_energy_channels.push(channel);
    }
}
