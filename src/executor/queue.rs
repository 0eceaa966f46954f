//! Command queue feeding the executor.
//!
//! An unbounded FIFO built on a tokio mpsc channel. Any number of
//! [`Submitter`]s push without blocking; the single [`CommandReceiver`]
//! pops with a blocking receive from the executor's OS thread.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::gate::SubmitGate;
use crate::command::Command;

/// Item carried by the queue.
#[derive(Debug)]
pub enum QueueItem {
    /// Work for the executor.
    Command(Command),
    /// Interrupts a blocked pop so the executor can re-check its running
    /// flag.
    Wake,
}

/// Result of a blocking pop.
#[derive(Debug)]
pub enum Popped {
    /// Next command, in submission order.
    Command(Command),
    /// Woken without work (shutdown request).
    Interrupted,
    /// Every submitter is gone.
    Closed,
}

/// Unsplit queue.
#[derive(Debug)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    rx: mpsc::UnboundedReceiver<QueueItem>,
    gate: Option<Arc<SubmitGate>>,
}

impl CommandQueue {
    /// Creates a queue, optionally with a fairness gate.
    pub fn new(gate: Option<Arc<SubmitGate>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx, gate }
    }

    /// Splits into the cloneable submit side and the executor side.
    pub fn split(self) -> (Submitter, CommandReceiver) {
        (
            Submitter {
                tx: self.tx,
                gate: self.gate.clone(),
            },
            CommandReceiver {
                rx: self.rx,
                gate: self.gate,
            },
        )
    }
}

/// Cloneable push handle.
#[derive(Clone, Debug)]
pub struct Submitter {
    tx: mpsc::UnboundedSender<QueueItem>,
    gate: Option<Arc<SubmitGate>>,
}

impl Submitter {
    /// Enqueues a command. Never blocks.
    ///
    /// Returns `false` if the executor is gone and the command was dropped.
    pub fn push(&self, command: Command) -> bool {
        let _guard = self.gate.as_deref().map(SubmitGate::enter);
        match self.tx.send(QueueItem::Command(command)) {
            Ok(()) => true,
            Err(mpsc::error::SendError(item)) => {
                log::warn!("[CommandQueue] Executor gone, dropping {:?}", item);
                false
            }
        }
    }

    /// Interrupts a blocked pop.
    pub fn wake(&self) {
        let _ = self.tx.send(QueueItem::Wake);
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Executor side of the queue.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    gate: Option<Arc<SubmitGate>>,
}

impl CommandReceiver {
    /// Blocks until an item is available.
    ///
    /// Must not be called from inside an async runtime.
    pub fn pop(&mut self) -> Popped {
        if let Some(gate) = &self.gate {
            gate.wait_idle(std::time::Duration::from_millis(crate::constants::FAIRNESS_WAIT_MS));
            std::thread::yield_now();
        }
        match self.rx.blocking_recv() {
            Some(QueueItem::Command(command)) => Popped::Command(command),
            Some(QueueItem::Wake) => Popped::Interrupted,
            None => Popped::Closed,
        }
    }

    /// Non-blocking pop; skips wake markers.
    pub fn try_pop(&mut self) -> Option<Command> {
        loop {
            match self.rx.try_recv() {
                Ok(QueueItem::Command(command)) => return Some(command),
                Ok(QueueItem::Wake) => {}
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::EventName;
    use crate::connection::ConnectionId;
    use std::thread;

    fn notify(n: usize) -> Command {
        Command::notify(ConnectionId::new(format!("c{n}")), EventName::Close, None)
    }

    fn id_of(popped: Popped) -> String {
        match popped {
            Popped::Command(Command::Notify { connection_id, .. }) => connection_id.to_string(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fifo_across_submitters() {
        let (submitter, mut receiver) = CommandQueue::new(None).split();
        let other = submitter.clone();
        assert!(submitter.push(notify(1)));
        assert!(other.push(notify(2)));
        assert!(submitter.push(notify(3)));

        assert_eq!(id_of(receiver.pop()), "c1");
        assert_eq!(id_of(receiver.pop()), "c2");
        assert_eq!(id_of(receiver.pop()), "c3");
    }

    #[test]
    fn test_wake_interrupts_blocked_pop() {
        let (submitter, mut receiver) = CommandQueue::new(None).split();
        let popper = thread::spawn(move || matches!(receiver.pop(), Popped::Interrupted));
        thread::sleep(std::time::Duration::from_millis(20));
        submitter.wake();
        assert!(popper.join().expect("popper panicked"));
    }

    #[test]
    fn test_closed_when_submitters_dropped() {
        let (submitter, mut receiver) = CommandQueue::new(None).split();
        drop(submitter);
        assert!(matches!(receiver.pop(), Popped::Closed));
    }

    #[test]
    fn test_push_after_receiver_dropped_returns_false() {
        let (submitter, receiver) = CommandQueue::new(None).split();
        drop(receiver);
        assert!(submitter.is_closed());
        assert!(!submitter.push(notify(1)));
    }

    #[test]
    fn test_gated_queue_still_fifo() {
        let gate = Arc::new(SubmitGate::new());
        let (submitter, mut receiver) = CommandQueue::new(Some(Arc::clone(&gate))).split();
        submitter.push(notify(1));
        submitter.push(notify(2));
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(id_of(receiver.pop()), "c1");
        assert_eq!(id_of(receiver.try_pop().map_or(Popped::Closed, Popped::Command)), "c2");
    }
}
