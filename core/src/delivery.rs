//! Delivery of results onto a single consumer thread.
//!
//! # Design
//! Worker threads never call listeners directly. They hand a boxed
//! invocation to a `Dispatcher`, which queues it on an unbounded channel.
//! The thread that owns the matching `MainLoop` drains the queue and runs
//! invocations one at a time, in the order they were queued.
//!
//! `MainLoop` is neither `Send` nor `Sync`: it stays on the thread that
//! created it, which is therefore the only consumer.

use std::marker::PhantomData;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::warn;

use crate::envelope::Outcome;

/// A deferred call waiting to run on the consumer thread.
pub struct QueuedInvocation {
    invoke: Box<dyn FnOnce() + Send>,
}

impl QueuedInvocation {
    pub fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
        }
    }

    pub fn execute(self) {
        (self.invoke)();
    }
}

/// Receiver of decoded results.
///
/// Both methods run on the consumer thread and should return quickly;
/// every later delivery waits behind them.
pub trait Listener<T>: Send + Sync + 'static {
    fn on_success(&self, output: T);
    fn on_error(&self, error: String);
}

/// Producer side of the delivery channel. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<QueuedInvocation>,
}

impl Dispatcher {
    /// Queue an arbitrary invocation.
    ///
    /// Returns `false` if the consumer loop is gone.
    pub fn post<F>(&self, invoke: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(QueuedInvocation::new(invoke)).is_ok()
    }

    /// Queue `outcome` for `listener`.
    pub fn deliver<T, L>(&self, listener: std::sync::Arc<L>, outcome: Outcome<T>)
    where
        T: Send + 'static,
        L: Listener<T> + ?Sized,
    {
        let posted = self.post(move || match outcome {
            Outcome::Success(output) => listener.on_success(output),
            Outcome::Failure(error) => listener.on_error(error),
        });
        if !posted {
            warn!("consumer loop has shut down; dropping delivery");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queued", &self.tx.len())
            .finish()
    }
}

/// Consumer side of the delivery channel.
pub struct MainLoop {
    rx: Receiver<QueuedInvocation>,
    tx: Sender<QueuedInvocation>,
    _local: PhantomData<Rc<()>>,
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            rx,
            tx,
            _local: PhantomData,
        }
    }

    /// A producer handle feeding this loop.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            tx: self.tx.clone(),
        }
    }

    /// Number of invocations waiting to run.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Run every invocation already queued. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(invocation) => {
                    invocation.execute();
                    ran += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Wait up to `timeout` for one invocation and run it.
    pub fn run_one(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(invocation) => {
                invocation.execute();
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Run invocations as they arrive until `done` returns `true` or
    /// `timeout` elapses. Returns the final value of `done`.
    pub fn run_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.run_one(remaining);
        }
        true
    }
}
