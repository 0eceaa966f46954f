//! Script runtime management.
//!
//! [`ScriptRuntime`] owns the Lua state, the executor it drives, and the
//! receiving end of the [`LuaBridge`] channel. The Lua state is not `Send`,
//! so every callback fires on the thread that calls [`ScriptRuntime::pump`]
//! or [`ScriptRuntime::run`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use mlua::Lua;

use crate::bridge::{AttributeStore, HostBridge};
use crate::config::Config;
use crate::connector::Connector;
use crate::executor::{Executor, ExecutorHandle};
use crate::tls::TlsSettings;

use super::bridge::{LuaBridge, ScriptEvent};
use super::primitives::{self, tcp, TcpRegistry};

/// Interval between shutdown checks while [`ScriptRuntime::run`] waits.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Why [`ScriptRuntime::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every connection the script opened has finished.
    Idle,
    /// The shutdown flag was raised.
    Shutdown,
    /// The run timeout elapsed first.
    TimedOut,
}

/// Lua host for the socket bridge.
///
/// Field order matters for drop: the event receiver goes before the
/// executor handle, so a certificate prompt still waiting for an answer
/// fails fast instead of holding up the executor join.
pub struct ScriptRuntime {
    lua: Lua,
    registry: TcpRegistry,
    connector: Arc<Connector>,
    attributes: Arc<AttributeStore>,
    events_rx: Receiver<ScriptEvent>,
    executor: ExecutorHandle,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("executor", &self.executor)
            .field("live_connections", &self.live_connections())
            .finish_non_exhaustive()
    }
}

impl ScriptRuntime {
    /// Starts an executor and a Lua state with all primitives registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the executor thread cannot be spawned or a
    /// primitive fails to register.
    pub fn new(config: Config, tls: TlsSettings) -> Result<Self> {
        let attributes = Arc::new(AttributeStore::new());
        let (bridge, events_rx) =
            LuaBridge::channel(Arc::clone(&attributes), config.cert_prompt_timeout());
        let bridge: Arc<dyn HostBridge> = Arc::new(bridge);

        let executor = Executor::start(config.clone(), Arc::clone(&bridge), tls)
            .context("Failed to start executor thread")?;
        let connector = Arc::new(Connector::new(
            executor.submitter(),
            bridge,
            Arc::new(config),
        ));

        let lua = Lua::new();
        let registry = tcp::new_tcp_registry();
        primitives::register_all(&lua, &registry, &connector)?;

        log::info!("[ScriptRuntime] Ready");
        Ok(Self {
            lua,
            registry,
            connector,
            attributes,
            events_rx,
            executor,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The Lua state.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// The connector scripts submit through.
    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    /// Host-side attributes of every connection.
    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    /// Flag that makes [`run`](Self::run) return [`RunOutcome::Shutdown`].
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Loads and executes a Lua file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the chunk fails.
    pub fn exec_file(&self, path: &Path) -> Result<()> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read Lua file: {}", path.display()))?;

        self.lua
            .load(&source)
            .set_name(path.to_string_lossy())
            .exec()
            .map_err(|e| anyhow!("Failed to execute Lua file {}: {}", path.display(), e))?;

        log::debug!("Loaded Lua file: {}", path.display());
        Ok(())
    }

    /// Executes Lua source.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk fails to parse or run.
    pub fn exec_str(&self, source: &str, name: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .map_err(|e| anyhow!("Failed to execute Lua chunk {name}: {e}"))
    }

    /// Fires callbacks for forwarded events.
    ///
    /// Waits up to `wait` for the first event, then drains whatever else is
    /// already queued. Returns the number of events handled.
    pub fn pump(&self, wait: Duration) -> usize {
        let first = match self.events_rx.recv_timeout(wait) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return 0,
        };

        let mut handled = 0;
        let mut next = Some(first);
        while let Some(event) = next {
            tcp::fire_event(&self.lua, &self.registry, &self.connector, event);
            handled += 1;
            next = self.events_rx.try_recv().ok();
        }
        handled
    }

    /// Connections the script opened that have not finished yet.
    pub fn live_connections(&self) -> usize {
        self.registry
            .lock()
            .expect("TcpRegistry mutex poisoned")
            .live_count()
    }

    /// Pumps events until every connection has finished, the shutdown flag
    /// is raised, or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns an error if the executor thread stopped on its own.
    pub fn run(&self, timeout: Option<Duration>) -> Result<RunOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                log::info!("[ScriptRuntime] Shutdown requested");
                return Ok(RunOutcome::Shutdown);
            }

            self.pump(PUMP_INTERVAL);

            if self.live_connections() == 0 {
                return Ok(RunOutcome::Idle);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::warn!(
                    "[ScriptRuntime] Timed out with {} live connection(s)",
                    self.live_connections()
                );
                return Ok(RunOutcome::TimedOut);
            }
            if !self.executor.is_running() {
                bail!("Executor stopped while connections were live");
            }
        }
    }

    /// Stops the executor and releases the Lua state.
    ///
    /// Pending certificate prompts are abandoned first, which the
    /// executor treats as a rejection.
    pub fn shutdown(self) {
        let Self {
            lua,
            events_rx,
            mut executor,
            ..
        } = self;
        drop(events_rx);
        executor.shutdown();
        drop(lua);
    }
}
