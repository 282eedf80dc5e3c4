//! Environment orchestrator
//!
//! Owns the whole assembly: the executor actor, the readiness multiplexer,
//! the four listening interfaces, the control dispatcher, and the
//! termination barrier. A caller builds one [`Environment`] per emulated
//! controller, injects a [`ControllerModel`], calls
//! [`Environment::initialize`], and awaits the returned waiter until a
//! control client ends the run.
//!
//! The control interface admits one session at a time. A second connection
//! is told "The connection is broken" and dropped; the listener stays armed
//! so the refusal can be repeated. When the active session disconnects, its
//! pending dispatch work is cancelled and the interface returns to idle.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use phantom_control::{Command, ControlDispatcher, ControlLink};
use phantom_net::{
    ChannelEvent, ChannelId, DataChannel, NetError, ReadinessMultiplexer, Transport,
};
use phantom_sched::{
    termination_barrier, Executor, ExecutorHandle, TaskGroupId, TaskHandle, TerminationBarrier,
    TerminationWaiter,
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::SharedModel;

/// Control command that ends the run
const TERMINATE_COMMAND: &str = "END_SIMULATION";

/// Sent to a control client connecting while a session is active
const SESSION_REFUSAL: &str = "The connection is broken";

/// Commands dispatched at startup so the emulator is usable with no driver
/// input; a startup script runs after these and can override them
const DEFAULT_SETUP: &str = "\
ADD_PHY BR_EDR
ADD_PHY LOW_ENERGY
SET_TIMER_PERIOD 5
START_TIMER
";

/// The active control session, if any
struct ControlSession {
    channel: DataChannel,
    link: ControlLink,
}

/// State shared between the accept path, the readiness watches, and the
/// dispatch callbacks; everything here runs on the execution context
struct ControlShared {
    executor: ExecutorHandle,
    multiplexer: ReadinessMultiplexer,
    dispatcher: Mutex<ControlDispatcher>,
    barrier: TerminationBarrier,
    control_group: TaskGroupId,
    session: Mutex<Option<ControlSession>>,
}

impl ControlShared {
    /// Handle a connection accepted on the control interface
    fn accept_control(self: &Arc<Self>, channel: DataChannel) {
        {
            let mut session = self.session.lock().unwrap();
            if session.is_some() {
                warn!(
                    "refusing control connection from {}: session already active",
                    channel.peer_addr()
                );
                if ControlLink::send_response(&channel, SESSION_REFUSAL).is_err() {
                    debug!("refused peer gone before the refusal was queued");
                }
                // Dropping the channel closes it once the refusal flushes.
                return;
            }

            info!("control session opened from {}", channel.peer_addr());
            *session = Some(ControlSession {
                channel: channel.clone(),
                link: ControlLink::new(),
            });
        }

        let response_channel = channel.clone();
        self.dispatcher
            .lock()
            .unwrap()
            .register_response_sink(move |text| {
                if ControlLink::send_response(&response_channel, text).is_err() {
                    debug!("control session gone, dropping response");
                }
            });

        arm_read(Arc::clone(self), channel);
    }

    /// Drain and dispatch whatever the active session sent
    fn drain_session(self: &Arc<Self>, channel: DataChannel) {
        let result = {
            let mut session = self.session.lock().unwrap();
            match session.as_mut() {
                Some(active) if active.channel.id() == channel.id() => {
                    Some(active.link.read_commands(&channel))
                }
                _ => None,
            }
        };
        let Some(result) = result else {
            debug!("readable event for a stale control session, ignoring");
            return;
        };
        let drained = match result {
            Ok(drained) => drained,
            Err(e) => {
                warn!("control session read failed: {}", e);
                self.close_session(channel.id());
                return;
            }
        };

        for command in drained.commands {
            let shared = Arc::clone(self);
            let scheduled = self
                .executor
                .execute(self.control_group, move || shared.handle_command(&command));
            if scheduled.is_err() {
                debug!("dropping control command: executor shut down");
            }
        }

        if drained.closed {
            self.close_session(channel.id());
        } else {
            arm_read(Arc::clone(self), channel);
        }
    }

    /// Run one control command on the execution context
    fn handle_command(&self, command: &Command) {
        if command.name == TERMINATE_COMMAND {
            if self.barrier.signal() {
                info!("termination requested by control client");
            } else {
                debug!("termination already requested, ignoring");
            }
            return;
        }
        self.dispatcher.lock().unwrap().dispatch(command);
    }

    /// Tear the active session down if `id` still owns it
    fn close_session(&self, id: ChannelId) {
        {
            let mut session = self.session.lock().unwrap();
            match session.as_ref() {
                Some(active) if active.channel.id() == id => *session = None,
                _ => return,
            }
        }
        info!("control session closed");
        self.multiplexer.unwatch(id);
        self.dispatcher.lock().unwrap().reset_response_sink();
        // Undispatched commands from the dead session must not run.
        self.executor.cancel_group(self.control_group);
    }
}

/// Arm a single-shot readable watch on the active session's channel
fn arm_read(shared: Arc<ControlShared>, channel: DataChannel) {
    let multiplexer = shared.multiplexer.clone();
    multiplexer.watch_for_readable(&channel, move |channel, event| match event {
        ChannelEvent::Readable => shared.drain_session(channel),
        ChannelEvent::Closed => shared.close_session(channel.id()),
    });
}

/// The model's periodic tick, started and stopped over the control protocol
struct TimerControl {
    executor: ExecutorHandle,
    group: TaskGroupId,
    task: Mutex<Option<TaskHandle>>,
    model: SharedModel,
}

impl TimerControl {
    /// Start (or restart) ticking at the model's current period
    fn start(&self) {
        let period = self.model.lock().unwrap().timer_period();
        let mut slot = self.task.lock().unwrap();
        if let Some(old) = slot.take() {
            self.executor.cancel(old);
        }

        let model = Arc::clone(&self.model);
        match self
            .executor
            .schedule_periodic(self.group, period, period, move || {
                model.lock().unwrap().tick();
            }) {
            Ok(handle) => {
                info!("timer started, period {:?}", period);
                *slot = Some(handle);
            }
            Err(e) => debug!("timer not started: {}", e),
        }
    }

    /// Stop ticking; a no-op when already stopped
    fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            self.executor.cancel(handle);
            info!("timer stopped");
        }
    }

    /// Change the period, restarting the timer if it is running
    fn set_period(&self, period: Duration) {
        self.model.lock().unwrap().set_timer_period(period);
        let running = self.task.lock().unwrap().is_some();
        if running {
            self.start();
        }
    }
}

/// One emulated-controller environment
pub struct Environment {
    config: Config,
    model: SharedModel,
    shared: Arc<ControlShared>,
    timer: Arc<TimerControl>,
    control: Transport,
    command: Transport,
    link: Transport,
    low_energy: Transport,
}

impl Environment {
    /// Build an environment around an injected controller model
    ///
    /// Spawns the executor actor; must be called inside a tokio runtime.
    /// The returned waiter resolves when a control client terminates the
    /// run.
    pub fn new(config: Config, model: SharedModel) -> (Self, TerminationWaiter) {
        let (executor, handle) = Executor::new();
        tokio::spawn(executor.run());

        let multiplexer = ReadinessMultiplexer::new(handle.clone());
        let (barrier, waiter) = termination_barrier();
        let control_group = handle.new_group();
        let timer_group = handle.new_group();

        let shared = Arc::new(ControlShared {
            executor: handle.clone(),
            multiplexer,
            dispatcher: Mutex::new(ControlDispatcher::new()),
            barrier,
            control_group,
            session: Mutex::new(None),
        });
        let timer = Arc::new(TimerControl {
            executor: handle,
            group: timer_group,
            task: Mutex::new(None),
            model: Arc::clone(&model),
        });

        let environment = Self {
            config,
            model,
            shared,
            timer,
            control: Transport::new(),
            command: Transport::new(),
            link: Transport::new(),
            low_energy: Transport::new(),
        };
        (environment, waiter)
    }

    /// Bind the interfaces and run the startup script
    ///
    /// The control interface is essential: failing to bind it fails
    /// initialization. The command, link, and low-energy interfaces are
    /// best-effort; a bind failure is logged and the environment runs
    /// without that interface.
    pub async fn initialize(&mut self) -> Result<(), NetError> {
        self.model.lock().unwrap().start();
        self.register_builtins();

        let shared = Arc::clone(&self.shared);
        let control_addr = self
            .control
            .set_up(&self.config.control, &self.shared.executor, move |channel, server| {
                shared.accept_control(channel);
                // Stay armed so further connections can be refused.
                server.start_listening();
            })
            .await?;
        info!("control interface on {}", control_addr);

        self.shared.dispatcher.lock().unwrap().preload(DEFAULT_SETUP);

        if let Some(path) = self.config.startup_script.clone() {
            let script = std::fs::read_to_string(&path).map_err(NetError::Io)?;
            info!("preloading control script {}", path.display());
            self.shared.dispatcher.lock().unwrap().preload(&script);
        }

        let model = Arc::clone(&self.model);
        let command_result = self
            .command
            .set_up(&self.config.command, &self.shared.executor, move |channel, server| {
                model.lock().unwrap().incoming_command_connection(channel);
                server.start_listening();
            })
            .await;
        if let Err(e) = command_result {
            warn!("command interface unavailable: {}", e);
        }

        let model = Arc::clone(&self.model);
        let link_result = self
            .link
            .set_up(&self.config.link, &self.shared.executor, move |channel, server| {
                model.lock().unwrap().incoming_link_connection(channel);
                server.start_listening();
            })
            .await;
        if let Err(e) = link_result {
            warn!("link interface unavailable: {}", e);
        }

        let model = Arc::clone(&self.model);
        let low_energy_result = self
            .low_energy
            .set_up(&self.config.low_energy, &self.shared.executor, move |channel, server| {
                model.lock().unwrap().incoming_low_energy_connection(channel);
                server.start_listening();
            })
            .await;
        if let Err(e) = low_energy_result {
            warn!("low-energy interface unavailable: {}", e);
        }

        Ok(())
    }

    fn register_builtins(&self) {
        let mut dispatcher = self.shared.dispatcher.lock().unwrap();

        let model = Arc::clone(&self.model);
        dispatcher.register_command("ADD_PHY", move |args| {
            let [kind] = args else {
                return vec!["ADD_PHY expects exactly one argument".to_string()];
            };
            model.lock().unwrap().add_phy(kind);
            vec![]
        });

        let timer = Arc::clone(&self.timer);
        dispatcher.register_command("SET_TIMER_PERIOD", move |args| {
            let [ms] = args else {
                return vec![
                    "SET_TIMER_PERIOD expects exactly one argument (milliseconds)".to_string(),
                ];
            };
            match ms.parse::<u64>() {
                Ok(ms) if ms > 0 => {
                    timer.set_period(Duration::from_millis(ms));
                    vec![]
                }
                _ => vec![format!("invalid timer period: {}", ms)],
            }
        });

        let timer = Arc::clone(&self.timer);
        dispatcher.register_command("START_TIMER", move |_args| {
            timer.start();
            vec![]
        });

        let timer = Arc::clone(&self.timer);
        dispatcher.register_command("STOP_TIMER", move |_args| {
            timer.stop();
            vec![]
        });

        let model = Arc::clone(&self.model);
        dispatcher.register_fallback(move |name, args| {
            model.lock().unwrap().handle_command(name, args)
        });
    }

    /// Bound control-interface address, once initialized
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control.local_addr()
    }

    /// Bound command-interface address, once initialized
    pub fn command_addr(&self) -> Option<SocketAddr> {
        self.command.local_addr()
    }

    /// Bound link-interface address, once initialized
    pub fn link_addr(&self) -> Option<SocketAddr> {
        self.link.local_addr()
    }

    /// Bound low-energy-interface address, once initialized
    pub fn low_energy_addr(&self) -> Option<SocketAddr> {
        self.low_energy.local_addr()
    }

    /// Stop the model, the multiplexer, and the executor
    pub fn close(&self) {
        info!("shutting environment down");
        self.timer.stop();
        {
            let mut model = self.model.lock().unwrap();
            model.stop();
            model.reset();
        }
        self.shared.multiplexer.close();
        self.shared.executor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimController;

    fn timer_fixture() -> (Arc<TimerControl>, Arc<Mutex<SimController>>) {
        let (executor, handle) = Executor::new();
        tokio::spawn(executor.run());
        let model = Arc::new(Mutex::new(SimController::new()));
        let shared: SharedModel = model.clone();
        let timer = Arc::new(TimerControl {
            group: handle.new_group(),
            executor: handle,
            task: Mutex::new(None),
            model: shared,
        });
        (timer, model)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_until_stopped() {
        let (timer, model) = timer_fixture();
        timer.set_period(Duration::from_millis(10));
        timer.start();

        tokio::time::sleep(Duration::from_millis(35)).await;
        timer.stop();
        let ticks = model.lock().unwrap().ticks();
        assert_eq!(ticks, 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(model.lock().unwrap().ticks(), ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_period_restarts_running_timer() {
        let (timer, model) = timer_fixture();
        timer.set_period(Duration::from_millis(100));
        timer.start();

        timer.set_period(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(model.lock().unwrap().ticks(), 2);
    }

    #[tokio::test]
    async fn test_terminate_command_signals_barrier_once() {
        let model: SharedModel = Arc::new(Mutex::new(SimController::new()));
        let (environment, waiter) = Environment::new(Config::ephemeral(), model);

        let terminate = Command::new(TERMINATE_COMMAND, vec![]);
        environment.shared.handle_command(&terminate);
        environment.shared.handle_command(&terminate);

        waiter.wait().await;
    }
}
