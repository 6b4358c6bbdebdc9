//! # Expiration Sweeper
//!
//! Background task that expires overdue cash tickets on an interval.
//! Reads and confirmations expire tickets lazily too; the sweeper makes
//! sure abandoned codes get voided even when nobody looks at them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  loop {                                                                 │
//! │    select! {                                                            │
//! │      interval.tick()   ──► expire_overdue_tickets(now)                 │
//! │      shutdown_rx.recv() ──► break                                       │
//! │    }                                                                    │
//! │  }                                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{CheckoutError, CheckoutResult};
use crate::reconciliation::ReconciliationGateway;

/// Periodically expires overdue cash tickets.
pub struct ExpirationSweeper {
    reconciliation: ReconciliationGateway,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping the sweeper.
#[derive(Clone)]
pub struct ExpirationSweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ExpirationSweeperHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> CheckoutResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| CheckoutError::Internal("Sweeper shutdown channel closed".into()))
    }
}

impl ExpirationSweeper {
    /// Creates a sweeper and returns its handle.
    pub fn new(
        reconciliation: ReconciliationGateway,
        interval: Duration,
    ) -> (Self, ExpirationSweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let sweeper = ExpirationSweeper {
            reconciliation,
            interval,
            shutdown_rx,
        };

        (sweeper, ExpirationSweeperHandle { shutdown_tx })
    }

    /// Runs until the handle asks it to stop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Expiration sweeper starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.reconciliation.expire_overdue_tickets(Utc::now()).await {
                        Ok(0) => debug!("No overdue cash tickets"),
                        Ok(count) => debug!(count, "Sweep expired cash tickets"),
                        Err(e) => error!(error = %e, "Cash ticket sweep failed"),
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Expiration sweeper shutting down");
                    break;
                }
            }
        }

        info!("Expiration sweeper stopped");
    }
}
