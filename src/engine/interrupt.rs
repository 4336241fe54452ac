//! Cooperative interruption: a termination signal sets a flag that the engine
//! polls between work items.
//!
//! Signals are received by one process-wide dispatcher. While a latch is
//! listening, SIGINT/SIGTERM set it. With no listener left, the dispatcher
//! falls back to the default action and exits with `128 + signo`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

/// Flag set by an interruption request and observed by the engine.
///
/// Cloning shares the flag. Setting it never aborts in-flight work; the
/// engine only looks at it after an item is fully processed.
#[derive(Debug, Clone, Default)]
pub struct InterruptLatch(Arc<AtomicBool>);

impl InterruptLatch {
    /// Creates an unset latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop at the next item boundary.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Withdraws a stop request.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Starts translating SIGINT/SIGTERM into [`set`](Self::set).
    ///
    /// Translation stops when the returned guard is dropped, and signals get
    /// their default action back once no guard is alive. Must be called from
    /// within a tokio runtime.
    #[must_use = "signals are only translated while the guard is alive"]
    pub fn listen(&self) -> SignalGuard {
        let mut registry = registry();
        let id = registry.register(self.clone());
        if registry.dispatcher.as_ref().is_none_or(JoinHandle::is_finished) {
            registry.dispatcher = Some(tokio::spawn(dispatch_signals()));
        }
        SignalGuard { id }
    }
}

/// Keeps a latch connected to process signals. Dropping it disconnects.
#[derive(Debug)]
pub struct SignalGuard {
    id: u64,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        registry().unregister(self.id);
        debug!(listener = self.id, "signal listener removed");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Interrupt,
    #[cfg_attr(not(unix), allow(dead_code))]
    Terminate,
}

impl Signal {
    /// Status a shell reports for a process killed by this signal.
    fn exit_code(self) -> i32 {
        match self {
            Self::Interrupt => 128 + 2,
            Self::Terminate => 128 + 15,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        })
    }
}

#[derive(Debug)]
struct Registry {
    next_id: u64,
    latches: Vec<(u64, InterruptLatch)>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            next_id: 0,
            latches: Vec::new(),
            dispatcher: None,
        }
    }

    fn register(&mut self, latch: InterruptLatch) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.latches.push((id, latch));
        id
    }

    fn unregister(&mut self, id: u64) {
        self.latches.retain(|(listener, _)| *listener != id);
    }

    /// Sets every listening latch. Without listeners, returns the exit code
    /// of the signal's default action.
    fn deliver(&self, signal: Signal) -> Option<i32> {
        if self.latches.is_empty() {
            return Some(signal.exit_code());
        }
        for (_, latch) in &self.latches {
            latch.set();
        }
        None
    }
}

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver(signal: Signal) {
    let exit = registry().deliver(signal);
    match exit {
        Some(code) => {
            info!(%signal, code, "received signal with no run active, exiting");
            std::process::exit(code);
        }
        None => info!(%signal, "received signal, stopping after current item"),
    }
}

#[cfg(unix)]
async fn dispatch_signals() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "could not register unix signal handlers, using ctrl_c fallback");
            dispatch_ctrl_c().await;
            return;
        }
    };
    loop {
        let signal = tokio::select! {
            Some(()) = sigterm.recv() => Signal::Terminate,
            Some(()) = sigint.recv() => Signal::Interrupt,
            else => return,
        };
        deliver(signal);
    }
}

#[cfg(not(unix))]
async fn dispatch_signals() {
    dispatch_ctrl_c().await;
}

async fn dispatch_ctrl_c() {
    loop {
        match tokio::signal::ctrl_c().await {
            Ok(()) => deliver(Signal::Interrupt),
            Err(e) => {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
        }
    }
}
