// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopping a shard run early on interrupt or termination.

use crate::errors::SignalHandlerSetupError;

/// Whether a shard run listens for shutdown signals.
///
/// Passed into [`ScriptRunner::new`](crate::runner::ScriptRunner::new).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// Stop on SIGINT or SIGTERM, or on Ctrl-C on Windows.
    Standard,

    /// Ignore signals. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    /// Starts listening. Must be called from within a tokio runtime.
    pub(crate) fn listen(self) -> Result<ShutdownListener, SignalHandlerSetupError> {
        let signals = match self {
            Self::Standard => Some(imp::Signals::new()?),
            Self::Noop => None,
        };
        Ok(ShutdownListener { signals })
    }
}

pub(crate) struct ShutdownListener {
    signals: Option<imp::Signals>,
}

impl ShutdownListener {
    /// Waits for the first shutdown signal and returns its name.
    ///
    /// Never completes for [`SignalHandlerKind::Noop`].
    pub(crate) async fn recv(&mut self) -> &'static str {
        match &mut self.signals {
            Some(signals) => signals.recv().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(unix)]
mod imp {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    pub(super) struct Signals {
        interrupt: Signal,
        terminate: Signal,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }

        pub(super) async fn recv(&mut self) -> &'static str {
            // recv() only yields None once the runtime is shutting down.
            tokio::select! {
                Some(()) = self.interrupt.recv() => "SIGINT",
                Some(()) = self.terminate.recv() => "SIGTERM",
                else => std::future::pending().await,
            }
        }
    }
}

#[cfg(windows)]
mod imp {
    use tokio::signal::windows::{CtrlC, ctrl_c};

    pub(super) struct Signals {
        ctrl_c: CtrlC,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            Ok(Self { ctrl_c: ctrl_c()? })
        }

        pub(super) async fn recv(&mut self) -> &'static str {
            match self.ctrl_c.recv().await {
                Some(()) => "Ctrl-C",
                None => std::future::pending().await,
            }
        }
    }
}
