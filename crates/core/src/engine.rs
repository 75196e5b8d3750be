//! Engine composition
//!
//! `PresenceEngine` owns the presence set worker and the reconciler for one
//! store. Whatever fronts the engine (CLI, HTTP) holds it explicitly; there
//! is no process-global state.

use crate::address::{parse_address, HardwareAddress};
use crate::config::PresenceConfig;
use crate::error::Result;
use crate::presence::PresenceSet;
use crate::reconcile::{Reconciler, TickReport};
use crate::store::PresenceStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How many entries of a reported batch were usable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub accepted: usize,
    pub rejected: usize,
}

pub struct PresenceEngine<S: ?Sized> {
    config: PresenceConfig,
    presence: PresenceSet,
    reconciler: Arc<Reconciler<S>>,
}

impl<S> PresenceEngine<S>
where
    S: PresenceStore + ?Sized + 'static,
{
    /// Spawns the presence set worker; must be called inside a tokio runtime
    pub fn new(config: PresenceConfig, store: Arc<S>) -> Self {
        let presence = PresenceSet::spawn(config.inbox_capacity);
        let reconciler = Arc::new(Reconciler::new(presence.clone(), store));
        Self {
            config,
            presence,
            reconciler,
        }
    }

    /// Feed a batch of freshly observed addresses into the presence set.
    /// Malformed entries are dropped and counted.
    pub async fn report_addresses<I, T>(&self, raw: I) -> Result<ReportSummary>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut summary = ReportSummary::default();
        let mut addresses = Vec::new();
        for entry in raw {
            match parse_address(entry.as_ref()) {
                Ok(address) => {
                    addresses.push(address);
                    summary.accepted += 1;
                }
                Err(_) => summary.rejected += 1,
            }
        }

        if summary.rejected > 0 {
            tracing::warn!(rejected = summary.rejected, "dropped malformed addresses from report");
        }
        self.presence
            .report_many(addresses, self.config.address_ttl())
            .await?;
        tracing::debug!(accepted = summary.accepted, "received addresses");
        Ok(summary)
    }

    /// Addresses currently considered present
    pub async fn snapshot(&self) -> Result<Vec<HardwareAddress>> {
        self.presence.snapshot().await
    }

    /// Run one reconciliation tick immediately. Serialised with scheduled
    /// ticks.
    pub async fn reconcile_now(&self) -> Result<TickReport> {
        self.reconciler.tick().await
    }

    /// Start the periodic scheduler
    pub fn start(&self) -> EngineHandle {
        let (shutdown, rx) = watch::channel(false);
        let scheduler = tokio::spawn(
            Arc::clone(&self.reconciler).run(self.config.refresh_period(), rx),
        );
        EngineHandle {
            shutdown,
            scheduler: Some(scheduler),
            presence: self.presence.clone(),
        }
    }

    /// Stop the presence set worker without a scheduler running
    pub async fn shutdown(&self) -> Result<()> {
        self.presence.shutdown().await
    }
}

/// Running scheduler. Dropping the handle without calling `shutdown` stops
/// the scheduler at its next wake-up but does not wait for it.
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    scheduler: Option<JoinHandle<()>>,
    presence: PresenceSet,
}

impl EngineHandle {
    /// Stop the timer, wait for an in-flight tick, then drain and stop the
    /// presence set worker. The worker is stopped even when the scheduler
    /// task failed; that failure is reported afterwards.
    pub async fn shutdown(mut self) -> Result<()> {
        // Receiver already gone means the scheduler exited on its own
        let _ = self.shutdown.send(true);
        let scheduled = match self.scheduler.take() {
            Some(scheduler) => scheduler.await,
            None => Ok(()),
        };
        self.presence.shutdown().await?;
        if let Err(e) = &scheduled {
            tracing::error!(error = %e, "reconciliation scheduler failed");
        }
        scheduled?;
        Ok(())
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
