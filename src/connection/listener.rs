//! Per-connection read loop.
//!
//! Each open connection has exactly one listener thread. It reads with a
//! bounded timeout, decodes chunks with the connection's encoding, and
//! submits the results as `Notify` commands. It never calls the host
//! bridge itself.
//!
//! # Stop modes
//!
//! - [`Listener::stop`]: cooperative; the thread exits within one read
//!   timeout
//! - [`Listener::stop_and_join`]: hard; additionally waits for the thread
//!   to finish, used before a TLS upgrade or explicit close
//!
//! Either way, bytes of an incomplete character are flushed as U+FFFD
//! rather than dropped.

// Rust guideline compliant 2026-02

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{ConnectionId, SharedTransport};
use crate::bridge::{EventArg, EventName};
use crate::command::Command;
use crate::encoding::TextEncoding;
use crate::executor::Submitter;

/// Why a listener stopped on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitCause {
    /// Peer closed the stream.
    EndOfStream,
    /// Unrecoverable read error.
    ReadError(String),
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("end of stream"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
        }
    }
}

/// Everything a listener thread needs.
#[derive(Debug)]
pub struct ListenerContext {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Listener generation; bumped on every (re)start.
    pub generation: u64,
    /// Shared transport to read from.
    pub transport: Arc<SharedTransport>,
    /// Connection encoding.
    pub encoding: TextEncoding,
    /// Read buffer size.
    pub buffer_size: usize,
    /// Queue handle for notifications.
    pub submitter: Submitter,
}

/// Handle to a running listener thread.
pub struct Listener {
    connection_id: ConnectionId,
    generation: u64,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("connection_id", &self.connection_id)
            .field("generation", &self.generation)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Listener {
    /// Starts a listener thread.
    ///
    /// The executor emits `onopen` before calling this, so no read result
    /// can reach the host ahead of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS thread cannot be spawned.
    pub fn spawn(ctx: ListenerContext) -> io::Result<Self> {
        let connection_id = ctx.connection_id.clone();
        let generation = ctx.generation;
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = Arc::clone(&running);
        let thread_handle = thread::Builder::new()
            .name(format!("listener-{connection_id}"))
            .spawn(move || run_read_loop(&ctx, &thread_running))?;

        log::debug!(
            "[Listener] Started for {} (generation {})",
            connection_id,
            generation
        );

        Ok(Self {
            connection_id,
            generation,
            running,
            thread_handle: Some(thread_handle),
        })
    }

    /// Requests a cooperative stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stops the listener and waits for its thread to exit.
    pub fn stop_and_join(&mut self) {
        self.stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("[Listener] Thread for {} panicked", self.connection_id);
            }
        }
    }

    /// Whether the read loop is still live.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Generation this listener was started with.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run_read_loop(ctx: &ListenerContext, running: &AtomicBool) {
    let mut buf = vec![0u8; ctx.buffer_size];
    let mut decoder = ctx.encoding.decoder();

    let cause = loop {
        if !running.load(Ordering::Acquire) {
            log::debug!("[Listener] {} stopped by request", ctx.connection_id);
            // A partial sequence left here surfaces as U+FFFD.
            submit_text(ctx, decoder.finish());
            return;
        }

        let result = ctx.transport.lock_for_read().read(&mut buf);
        match result {
            Ok(0) => break ExitCause::EndOfStream,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                submit_text(ctx, text);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => break ExitCause::ReadError(e.to_string()),
        }
    };

    submit_text(ctx, decoder.finish());

    // Exactly one side reports the exit: this thread, or a stop request
    // that already flipped the flag.
    if running.swap(false, Ordering::AcqRel) {
        log::info!("[Listener] {} exited: {}", ctx.connection_id, cause);
        ctx.transport.lock().close();
        ctx.submitter.push(Command::ListenerExited {
            connection_id: ctx.connection_id.clone(),
            generation: ctx.generation,
            cause,
        });
    }
}

fn submit_text(ctx: &ListenerContext, text: String) {
    if text.is_empty() {
        return;
    }
    ctx.submitter.push(Command::notify(
        ctx.connection_id.clone(),
        EventName::Message,
        Some(EventArg::Text(text)),
    ));
}
