//! Presence set
//!
//! Addresses seen recently, each with its own deadline. A single worker task
//! owns the map and processes commands from its inbox one at a time, so
//! reports, snapshots and expiry never race. Expiry uses a min-heap of
//! deadlines; stale heap entries left behind by refreshes are skipped when
//! popped.

use crate::address::HardwareAddress;
use crate::error::{DomainError, PresenceError, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Rebuild the heap once stale entries outnumber live ones by this factor
const HEAP_SLACK: usize = 2;
const HEAP_MIN_COMPACT: usize = 64;
/// Deadline used when `now + ttl` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

enum Command {
    Report {
        addresses: Vec<HardwareAddress>,
        deadline: Instant,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<HardwareAddress>>,
    },
    Shutdown,
}

/// Handle to the presence set worker. Cheap to clone; all clones talk to the
/// same worker.
#[derive(Clone)]
pub struct PresenceSet {
    inbox: mpsc::Sender<Command>,
    worker: std::sync::Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PresenceSet {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(inbox_capacity: usize) -> Self {
        let (inbox, rx) = mpsc::channel(inbox_capacity.max(1));
        let worker = tokio::spawn(run_worker(rx));
        Self {
            inbox,
            worker: std::sync::Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Upsert one address. Re-reporting resets the deadline to `now + ttl`.
    pub async fn report(&self, address: HardwareAddress, ttl: Duration) -> Result<()> {
        self.report_many(vec![address], ttl).await
    }

    /// Upsert a batch of addresses with a shared ttl. The deadline is taken
    /// from the moment of the call, not when the worker gets to it.
    pub async fn report_many(&self, addresses: Vec<HardwareAddress>, ttl: Duration) -> Result<()> {
        if addresses.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let deadline = now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE);
        self.send(Command::Report {
            addresses,
            deadline,
        })
        .await
    }

    /// Independent copy of every live address, sorted
    pub async fn snapshot(&self) -> Result<Vec<HardwareAddress>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| closed())
    }

    /// Stop the worker after it has processed everything already queued.
    /// Later calls on any clone fail with `PresenceClosed`.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        // A closed inbox means the worker already exited
        let _ = self.inbox.send(Command::Shutdown).await;
        worker.await?;
        Ok(())
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.inbox.send(cmd).await.map_err(|_| closed())
    }
}

fn closed() -> PresenceError {
    PresenceError::Domain(DomainError::PresenceClosed)
}

async fn run_worker(mut rx: mpsc::Receiver<Command>) {
    let mut entries = Entries::default();
    tracing::debug!("presence worker started");

    loop {
        let next_deadline = entries.next_deadline();
        let cmd = tokio::select! {
            biased;
            cmd = rx.recv() => cmd,
            _ = sleep_until(next_deadline), if next_deadline.is_some() => {
                entries.expire(Instant::now());
                continue;
            }
        };

        match cmd {
            Some(Command::Report {
                addresses,
                deadline,
            }) => {
                for address in addresses {
                    entries.upsert(address, deadline);
                }
            }
            Some(Command::Snapshot { reply }) => {
                entries.expire(Instant::now());
                // Caller may have given up waiting
                let _ = reply.send(entries.live());
            }
            Some(Command::Shutdown) | None => break,
        }
    }

    tracing::debug!(tracked = entries.len(), "presence worker stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Worker-private state
#[derive(Default)]
struct Entries {
    deadlines: HashMap<HardwareAddress, Instant>,
    heap: BinaryHeap<Reverse<(Instant, HardwareAddress)>>,
}

impl Entries {
    fn upsert(&mut self, address: HardwareAddress, deadline: Instant) {
        self.deadlines.insert(address.clone(), deadline);
        self.heap.push(Reverse((deadline, address)));
        self.compact();
    }

    /// Drop every entry whose deadline is at or before `now`
    fn expire(&mut self, now: Instant) {
        while let Some(Reverse((deadline, _))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            let Some(Reverse((deadline, address))) = self.heap.pop() else {
                break;
            };
            // Only the newest deadline for an address counts
            if self.deadlines.get(&address) == Some(&deadline) {
                self.deadlines.remove(&address);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    fn live(&self) -> Vec<HardwareAddress> {
        let mut live: Vec<_> = self.deadlines.keys().cloned().collect();
        live.sort();
        live
    }

    fn len(&self) -> usize {
        self.deadlines.len()
    }

    fn compact(&mut self) {
        if self.heap.len() < HEAP_MIN_COMPACT || self.heap.len() <= HEAP_SLACK * self.deadlines.len()
        {
            return;
        }
        self.heap = self
            .deadlines
            .iter()
            .map(|(address, deadline)| Reverse((*deadline, address.clone())))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::parse_address;

    fn addr(s: &str) -> HardwareAddress {
        parse_address(s).unwrap()
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_report_then_snapshot_observes_report() {
        let set = PresenceSet::spawn(16);
        set.report(addr("AA:AA:AA:AA:AA:AA"), MINUTE).await.unwrap();
        assert_eq!(set.snapshot().await.unwrap(), vec![addr("aa:aa:aa:aa:aa:aa")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_boundary() {
        let set = PresenceSet::spawn(16);
        let a = addr("AA:AA:AA:AA:AA:AA");
        set.report(a.clone(), MINUTE).await.unwrap();

        tokio::time::advance(MINUTE - Duration::from_millis(1)).await;
        assert_eq!(set.snapshot().await.unwrap(), vec![a]);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(set.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_does_not_duplicate() {
        let set = PresenceSet::spawn(16);
        let a = addr("AA:AA:AA:AA:AA:AA");
        set.report(a.clone(), MINUTE).await.unwrap();
        set.report(a.clone(), 2 * MINUTE).await.unwrap();
        set.report(addr("aa-aa-aa-aa-aa-aa"), MINUTE).await.unwrap();

        assert_eq!(set.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_ttl_wins() {
        let set = PresenceSet::spawn(16);
        let a = addr("AA:AA:AA:AA:AA:AA");
        set.report(a.clone(), 10 * MINUTE).await.unwrap();
        set.report(a.clone(), MINUTE).await.unwrap();

        tokio::time::advance(MINUTE + Duration::from_secs(1)).await;
        assert!(set.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_lifetime() {
        let set = PresenceSet::spawn(16);
        let a = addr("AA:AA:AA:AA:AA:AA");
        set.report(a.clone(), MINUTE).await.unwrap();

        tokio::time::advance(MINUTE / 2).await;
        set.report(a.clone(), MINUTE).await.unwrap();

        tokio::time::advance(MINUTE * 3 / 4).await;
        assert_eq!(set.snapshot().await.unwrap(), vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_lingers() {
        let set = PresenceSet::spawn(16);
        set.report(addr("AA:AA:AA:AA:AA:AA"), Duration::ZERO)
            .await
            .unwrap();
        assert!(set.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_saturates() {
        let set = PresenceSet::spawn(16);
        let a = addr("AA:AA:AA:AA:AA:AA");
        set.report(a.clone(), Duration::MAX).await.unwrap();

        tokio::time::advance(365 * 24 * 60 * MINUTE).await;
        assert_eq!(set.snapshot().await.unwrap(), vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_is_independent_copy() {
        let set = PresenceSet::spawn(16);
        set.report(addr("AA:AA:AA:AA:AA:AA"), MINUTE).await.unwrap();
        let before = set.snapshot().await.unwrap();
        set.report(addr("BB:BB:BB:BB:BB:BB"), MINUTE).await.unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(set.snapshot().await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_then_closes() {
        let set = PresenceSet::spawn(16);
        let clone = set.clone();
        set.report(addr("AA:AA:AA:AA:AA:AA"), MINUTE).await.unwrap();
        set.shutdown().await.unwrap();

        assert!(matches!(
            clone.snapshot().await,
            Err(PresenceError::Domain(DomainError::PresenceClosed))
        ));
        assert!(clone
            .report(addr("AA:AA:AA:AA:AA:AA"), MINUTE)
            .await
            .is_err());
        // Second shutdown is a no-op
        clone.shutdown().await.unwrap();
    }

    #[test]
    fn test_compaction_keeps_live_entries() {
        let mut entries = Entries::default();
        let base = Instant::now();
        let a = addr("AA:AA:AA:AA:AA:AA");
        for i in 0..200u64 {
            entries.upsert(a.clone(), base + Duration::from_secs(i));
        }
        assert!(entries.heap.len() < 200);
        assert_eq!(entries.len(), 1);

        entries.expire(base + Duration::from_secs(198));
        assert_eq!(entries.len(), 1);
        entries.expire(base + Duration::from_secs(199));
        assert_eq!(entries.len(), 0);
    }
}
