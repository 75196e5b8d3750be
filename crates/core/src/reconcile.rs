//! Reconciliation ticks
//!
//! Each tick turns "addresses seen recently" into "users who are present":
//! snapshot the presence set, read devices and users once, match every
//! device against every address, then commit all online flags as one batch.
//! A failed tick leaves the previously committed state alone.
//!
//! Matching is O(devices × addresses) argon2 verifications per tick. That is
//! fine at hackerspace scale and is the first thing to revisit if it grows.

use crate::address::HardwareAddress;
use crate::config::MAX_PERIOD_SECS;
use crate::error::Result;
use crate::matcher;
use crate::presence::PresenceSet;
use crate::store::{Device, PresenceStore, StatusCounters, User};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};

/// Outcome of one committed tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Addresses in the snapshot used for matching
    pub addresses: usize,
    /// Registered devices checked
    pub devices: usize,
    /// Ids of users now online, sorted
    pub online: Vec<String>,
    /// Counters committed with the flags
    pub counters: StatusCounters,
}

/// Result of matching one snapshot against the device list
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Matches {
    /// Owners with at least one device seen
    pub owners: BTreeSet<String>,
    /// Addresses that matched no device
    pub unknown_addresses: usize,
}

/// Test every device against every address
pub fn match_devices(addresses: &[HardwareAddress], devices: &[Device]) -> Matches {
    let mut owners = BTreeSet::new();
    let mut claimed = vec![false; addresses.len()];

    for device in devices {
        for (i, address) in addresses.iter().enumerate() {
            if matcher::matches(address, &device.hashed_address) {
                owners.insert(device.owner_id.clone());
                claimed[i] = true;
                break;
            }
        }
    }

    Matches {
        owners,
        unknown_addresses: claimed.iter().filter(|c| !**c).count(),
    }
}

/// Set `online` on every user from the matched owner set
pub fn apply_matches(mut users: Vec<User>, matches: &Matches) -> (Vec<User>, StatusCounters) {
    let mut online_users = 0;
    for user in &mut users {
        user.online = matches.owners.contains(&user.id);
        if user.online {
            online_users += 1;
        }
    }
    let counters = StatusCounters {
        online_users,
        unknown_devices: matches.unknown_addresses,
        updated_at: Some(Utc::now()),
    };
    (users, counters)
}

/// Runs ticks against one presence set and one store. Ticks never overlap.
pub struct Reconciler<S: ?Sized> {
    presence: PresenceSet,
    store: Arc<S>,
    gate: Mutex<()>,
}

impl<S> Reconciler<S>
where
    S: PresenceStore + ?Sized + 'static,
{
    pub fn new(presence: PresenceSet, store: Arc<S>) -> Self {
        Self {
            presence,
            store,
            gate: Mutex::new(()),
        }
    }

    /// Run one tick now. Errors leave stored state untouched.
    pub async fn tick(&self) -> Result<TickReport> {
        let _serialised = self.gate.lock().await;
        let started = Instant::now();

        let addresses = self.presence.snapshot().await?;
        let devices = self.store.all_devices().await?;
        let users = self.store.all_users().await?;

        let address_count = addresses.len();
        let device_count = devices.len();
        let matches =
            tokio::task::spawn_blocking(move || match_devices(&addresses, &devices)).await?;

        let (users, counters) = apply_matches(users, &matches);
        let mut online: Vec<String> = users
            .iter()
            .filter(|u| u.online)
            .map(|u| u.id.clone())
            .collect();
        online.sort();

        self.store.commit_all(users, counters.clone()).await?;

        tracing::info!(
            addresses = address_count,
            devices = device_count,
            online = counters.online_users,
            unknown_devices = counters.unknown_devices,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "statuses updated"
        );

        Ok(TickReport {
            addresses: address_count,
            devices: device_count,
            online,
            counters,
        })
    }

    /// Tick every `period` until `shutdown` flips to true or its sender is
    /// dropped. An in-flight tick always runs to completion. The period is
    /// clamped to between one second and one year.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let bounded = period.clamp(Duration::from_secs(1), Duration::from_secs(MAX_PERIOD_SECS));
        if bounded != period {
            tracing::warn!(
                requested_secs = period.as_secs(),
                period_secs = bounded.as_secs(),
                "tick period out of range; clamped"
            );
        }
        let period = bounded;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_secs = period.as_secs(), "reconciliation scheduler started");

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.tick().await {
                tracing::warn!(error = %e, "failed to update statuses; keeping previous state");
            }
        }

        tracing::info!("reconciliation scheduler stopped");
    }
}
