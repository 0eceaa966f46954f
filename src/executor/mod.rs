//! The privileged executor.
//!
//! One dedicated OS thread pops commands from the [`CommandQueue`] and runs
//! each to completion before popping the next. Every socket mutation and
//! every host bridge call happens here, so host-visible effects are
//! totally ordered without further locking.
//!
//! # Shutdown
//!
//! [`ExecutorHandle::shutdown`] clears the running flag and pushes a wake
//! marker, so a blocked pop returns promptly. The loop exits after the
//! current command; remaining connections are torn down without events.

// Rust guideline compliant 2026-02

pub mod gate;
pub mod queue;

pub use gate::{SubmitGate, SubmitGuard};
pub use queue::{CommandQueue, CommandReceiver, Popped, QueueItem, Submitter};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::bridge::{Attribute, AttributeValue, EventArg, EventName, HostBridge, LogLevel};
use crate::command::{self, Command};
use crate::config::Config;
use crate::connection::{Connection, ConnectionId, Listener, ListenerContext, ReadyState};
use crate::tls::TlsSettings;

/// Executor state, owned by the executor thread.
pub struct Executor {
    pub(crate) config: Arc<Config>,
    pub(crate) bridge: Arc<dyn HostBridge>,
    pub(crate) tls: TlsSettings,
    pub(crate) submitter: Submitter,
    pub(crate) connections: HashMap<ConnectionId, Connection>,
    /// Ids that reached CLOSED. They are never reopened.
    pub(crate) terminal: HashSet<ConnectionId>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("connections", &self.connections.len())
            .field("terminal", &self.terminal.len())
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor that is not yet running.
    pub fn new(
        config: Arc<Config>,
        bridge: Arc<dyn HostBridge>,
        tls: TlsSettings,
        submitter: Submitter,
    ) -> Self {
        Self {
            config,
            bridge,
            tls,
            submitter,
            connections: HashMap::new(),
            terminal: HashSet::new(),
        }
    }

    /// Starts the executor thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS thread cannot be spawned.
    pub fn start(
        config: Config,
        bridge: Arc<dyn HostBridge>,
        tls: TlsSettings,
    ) -> io::Result<ExecutorHandle> {
        let gate = config.fairness_gate.then(|| Arc::new(SubmitGate::new()));
        let (submitter, receiver) = CommandQueue::new(gate).split();
        let executor = Self::new(Arc::new(config), bridge, tls, submitter.clone());

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let thread_handle = thread::Builder::new()
            .name("executor".to_string())
            .spawn(move || executor.run(receiver, &thread_running))?;

        Ok(ExecutorHandle {
            submitter,
            running,
            thread_handle: Some(thread_handle),
        })
    }

    /// Runs the command loop until `running` is cleared or the queue closes.
    pub fn run(mut self, mut receiver: CommandReceiver, running: &AtomicBool) {
        log::info!("[Executor] Started");
        while running.load(Ordering::Acquire) {
            match receiver.pop() {
                Popped::Command(command) => self.execute(command),
                Popped::Interrupted => {}
                Popped::Closed => break,
            }
        }

        let open = self.connections.len();
        self.connections.clear();
        log::info!("[Executor] Stopped ({} connections released)", open);
    }

    /// Executes one command. Never propagates a failure.
    pub fn execute(&mut self, command: Command) {
        let name = command.name();
        log::trace!("[Executor] {} for {}", name, command.connection_id());
        let result = panic::catch_unwind(AssertUnwindSafe(|| command::dispatch(self, command)));
        if result.is_err() {
            log::error!("[Executor] {} panicked; continuing with next command", name);
        }
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether `id` is registered and OPEN.
    pub fn is_open(&self, id: &ConnectionId) -> bool {
        self.connections.get(id).is_some_and(Connection::is_open)
    }

    /// Whether `id` has reached CLOSED at some point.
    pub fn is_terminal(&self, id: &ConnectionId) -> bool {
        self.terminal.contains(id)
    }

    // ========================================================================
    // Helpers for command handlers
    // ========================================================================

    /// Writes the `readyState` attribute.
    pub(crate) fn set_ready_state(&self, id: &ConnectionId, state: ReadyState) {
        self.bridge
            .set_attribute(id, Attribute::ReadyState, AttributeValue::Int(state.code()));
    }

    /// Sets `readyState` to CLOSED and retires `id` for good.
    pub(crate) fn mark_closed(&mut self, id: &ConnectionId) {
        self.set_ready_state(id, ReadyState::Closed);
        self.terminal.insert(id.clone());
    }

    /// Invokes a host callback now, on the executor thread.
    ///
    /// Used where the host must observe the event together with the
    /// attribute state of the current command (`onopen`).
    pub(crate) fn emit(&self, id: &ConnectionId, event: EventName, argument: Option<EventArg>) {
        command::notify::execute(self, id, event, argument.as_ref());
    }

    /// Queues a host notification.
    pub(crate) fn notify(&self, id: &ConnectionId, event: EventName, argument: Option<EventArg>) {
        self.submitter
            .push(Command::notify(id.clone(), event, argument));
    }

    /// Queues an `onlog` record and mirrors it to the `log` facade.
    pub(crate) fn host_log(&self, id: &ConnectionId, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        log::log!(level.to_log(), "[Executor] {}: {}", id, message);
        self.notify(id, EventName::Log, Some(EventArg::log(level, message)));
    }

    /// Starts a listener on `conn`'s current transport.
    pub(crate) fn start_listener(&self, conn: &mut Connection) -> io::Result<()> {
        let ctx = ListenerContext {
            connection_id: conn.id().clone(),
            generation: conn.next_generation(),
            transport: Arc::clone(conn.transport()),
            encoding: conn.encoding(),
            buffer_size: self.config.buffer_size(),
            submitter: self.submitter.clone(),
        };
        let listener = Listener::spawn(ctx)?;
        conn.attach_listener(listener);
        Ok(())
    }
}

/// Owner handle for a running executor thread.
pub struct ExecutorHandle {
    submitter: Submitter,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ExecutorHandle {
    /// A new push handle onto the executor's queue.
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    /// Whether the executor loop is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.thread_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the executor after its current command and joins the thread.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        self.submitter.wake();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("[Executor] Thread panicked during shutdown");
            }
        }
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MemoryBridge;
    use std::time::Duration;

    fn start() -> (ExecutorHandle, Arc<MemoryBridge>) {
        let bridge = Arc::new(MemoryBridge::new());
        let handle = Executor::start(
            Config::default(),
            Arc::clone(&bridge) as Arc<dyn HostBridge>,
            TlsSettings::default(),
        )
        .expect("Should start executor");
        (handle, bridge)
    }

    #[test]
    fn test_notify_commands_run_in_fifo_order() {
        let (handle, bridge) = start();
        let submitter = handle.submitter();
        let id = ConnectionId::from("c1");
        for i in 0..20 {
            submitter.push(Command::notify(
                id.clone(),
                EventName::Log,
                Some(EventArg::log(LogLevel::Info, format!("{i}"))),
            ));
        }
        assert!(bridge.wait_for_event(&id, EventName::Log, 20, Duration::from_secs(5)));
        let order: Vec<String> = bridge
            .events_for(&id)
            .iter()
            .filter_map(|e| e.text())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_message_for_unknown_connection_is_dropped() {
        let (handle, bridge) = start();
        let submitter = handle.submitter();
        let id = ConnectionId::from("ghost");
        submitter.push(Command::notify(
            id.clone(),
            EventName::Message,
            Some(EventArg::Text("late".into())),
        ));
        submitter.push(Command::notify(id.clone(), EventName::Close, None));
        assert!(bridge.wait_for_event(&id, EventName::Close, 1, Duration::from_secs(5)));
        assert_eq!(bridge.event_names(&id), vec![EventName::Close]);
    }

    #[test]
    fn test_shutdown_interrupts_idle_pop() {
        let (mut handle, _bridge) = start();
        assert!(handle.is_running());
        handle.shutdown();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_gated_executor_runs_commands() {
        let bridge = Arc::new(MemoryBridge::new());
        let config = Config {
            fairness_gate: true,
            ..Config::default()
        };
        let handle = Executor::start(
            config,
            Arc::clone(&bridge) as Arc<dyn HostBridge>,
            TlsSettings::default(),
        )
        .expect("Should start executor");
        let id = ConnectionId::from("c1");
        handle
            .submitter()
            .push(Command::notify(id.clone(), EventName::Close, None));
        assert!(bridge.wait_for_event(&id, EventName::Close, 1, Duration::from_secs(5)));
    }
}
