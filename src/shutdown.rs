//! Operator interrupt handling.
//!
//! The backup and CSV export loops poll a [`CancellationToken`] between
//! items. The first SIGINT, SIGTERM or SIGHUP cancels it: the item in flight
//! is finished (or its `.part` file discarded), nothing new is started and
//! the run exits with status 1. A second signal exits immediately with 130.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

pub(crate) const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalAction {
    /// Stop at the next item boundary.
    StopAfterCurrentItem,
    ForceExit,
}

/// Counts interrupts and owns the token the item loops poll.
#[derive(Debug, Default)]
pub(crate) struct InterruptLatch {
    token: CancellationToken,
    received: AtomicU32,
}

impl InterruptLatch {
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn record(&self) -> SignalAction {
        if self.received.fetch_add(1, Ordering::SeqCst) == 0 {
            self.token.cancel();
            SignalAction::StopAfterCurrentItem
        } else {
            SignalAction::ForceExit
        }
    }
}

/// Spawn the signal listener and return the token cancelled by the first
/// interrupt.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let latch = InterruptLatch::default();
    let token = latch.token();

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?,
            signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?,
        )
    };

    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::warn!("Cannot listen for Ctrl+C; interrupts will not stop cleanly");
                    return;
                }
            }

            match latch.record() {
                SignalAction::StopAfterCurrentItem => {
                    tracing::info!(
                        "Interrupt received; stopping after the current item. \
                         Completed items stay in the ledger and are skipped next run"
                    );
                    tracing::info!("Interrupt again to quit immediately");
                }
                SignalAction::ForceExit => {
                    tracing::warn!("Second interrupt, exiting without waiting for the current item");
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
        }
    });

    Ok(token)
}
