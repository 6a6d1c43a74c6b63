//! # Pending Registry
//!
//! Maps live call-IDs to what should happen when the peer addresses them:
//! settle an awaited return value, or run a callback this side exposed.
//!
//! ## Invariants
//!
//! - IDs are unique among live entries; generation retries on collision.
//! - `live` equals the number of entries. Every insert and remove goes
//!   through this module and adjusts both together.
//! - Once `live` exceeds `max_pending`, the least recently acknowledged
//!   entries are evicted until it no longer does.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use tokio::sync::oneshot;

use crate::callback::Callback;
use crate::error::Error;
use crate::error::RemoteError;
use crate::error::Result;
use crate::packet::CallId;
use crate::value::Value;

/// Settles an awaited call exactly once.
pub(crate) type Settle = oneshot::Sender<std::result::Result<Value, RemoteError>>;

/// What an entry does when the peer addresses it.
pub(crate) enum Resolver {
    /// Awaiting a return value. Carries both resolve and reject.
    Settle(Settle),
    /// A local function exposed to the peer. Resolve only.
    Expose(Callback),
}

/// One registry entry.
pub(crate) struct PendingCall {
    resolver: Resolver,
    last_ack: u64,
}

impl PendingCall {
    /// True if this entry awaits a return value and can be rejected.
    pub(crate) fn can_reject(&self) -> bool {
        matches!(self.resolver, Resolver::Settle(_))
    }

    pub(crate) fn into_resolver(self) -> Resolver {
        self.resolver
    }
}

/// The outcome of addressing a live entry by its call-ID.
pub(crate) enum Claim {
    /// The entry awaited a return value and has been removed.
    Settle(Settle),
    /// The entry exposes a callback; its `last_ack` has been refreshed.
    Invoke(Callback),
}

/// Live call-IDs of one endpoint.
pub struct Registry {
    entries: DashMap<CallId, PendingCall>,
    live: AtomicUsize,
    clock: AtomicU64,
    max_pending: usize,
    id_space: u64,
    eviction_warned: AtomicBool,
}

impl Registry {
    /// Creates an empty registry.
    ///
    /// IDs are drawn from `1..=id_space`; `id_space` is clamped to
    /// `CallId::MAX`.
    pub fn new(max_pending: usize, id_space: u64) -> Self {
        Self {
            entries: DashMap::new(),
            live: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            max_pending,
            id_space: id_space.clamp(1, CallId::MAX.0),
            eviction_warned: AtomicBool::new(false),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Recency stamp of an entry.
    pub fn last_ack(&self, id: CallId) -> Option<u64> {
        self.entries.get(&id).map(|e| e.last_ack)
    }

    /// True if the entry awaits a return value.
    pub fn awaits_return(&self, id: CallId) -> Option<bool> {
        self.entries.get(&id).map(|e| e.can_reject())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Registers a local callback so the peer can invoke it.
    pub(crate) fn expose(&self, callback: Callback) -> Result<CallId> {
        self.insert(Resolver::Expose(callback))
    }

    /// Registers an awaited return value.
    pub(crate) fn await_return(
        &self,
    ) -> Result<(CallId, oneshot::Receiver<std::result::Result<Value, RemoteError>>)> {
        let (tx, rx) = oneshot::channel();
        let id = self.insert(Resolver::Settle(tx))?;
        Ok((id, rx))
    }

    fn insert(&self, resolver: Resolver) -> Result<CallId> {
        let mut rng = rand::thread_rng();

        let id = loop {
            if self.len() as u64 >= self.id_space {
                return Err(Error::CallIdsExhausted);
            }

            let id = CallId(rng.gen_range(1..=self.id_space));
            if let Entry::Vacant(slot) = self.entries.entry(id) {
                slot.insert(PendingCall { resolver, last_ack: self.tick() });
                self.live.fetch_add(1, Ordering::AcqRel);
                break id;
            }
        };

        self.evict_overflow();
        Ok(id)
    }

    /// Removes an entry, returning it if it was live.
    pub(crate) fn remove(&self, id: CallId) -> Option<PendingCall> {
        let (_, entry) = self.entries.remove(&id)?;
        self.live.fetch_sub(1, Ordering::AcqRel);
        Some(entry)
    }

    /// Resolves an inbound invocation addressed to `id`.
    ///
    /// Return-value entries are consumed; exposed callbacks stay and get
    /// their recency refreshed.
    pub(crate) fn claim(&self, id: CallId) -> Option<Claim> {
        let callback = {
            let mut guard = self.entries.get_mut(&id)?;
            let entry = &mut *guard;
            match &entry.resolver {
                Resolver::Expose(cb) => {
                    let cb = cb.clone();
                    entry.last_ack = self.tick();
                    Some(cb)
                }
                Resolver::Settle(_) => None,
            }
        };

        match callback {
            Some(cb) => Some(Claim::Invoke(cb)),
            None => match self.remove(id)?.resolver {
                Resolver::Settle(tx) => Some(Claim::Settle(tx)),
                Resolver::Expose(cb) => Some(Claim::Invoke(cb)),
            },
        }
    }

    fn evict_overflow(&self) {
        if self.len() <= self.max_pending {
            return;
        }

        if !self.eviction_warned.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                max_pending = self.max_pending,
                "pending registry exceeded its limit; evicting the least recently used entries. \
                 Check that callbacks are unbound after use, evicted ones will report as unavailable"
            );
        }

        let mut by_age: Vec<(u64, CallId)> = self.entries
            .iter()
            .map(|e| (e.last_ack, *e.key()))
            .collect();
        by_age.sort_unstable();

        let excess = self.len().saturating_sub(self.max_pending);
        let mut evicted = 0;
        for (_, id) in by_age.into_iter().take(excess) {
            if self.remove(id).is_some() {
                evicted += 1;
            }
        }

        tracing::debug!(evicted, live = self.len(), "pending registry sweep finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        Callback::from_fn(|_| Ok(Value::Null))
    }

    #[test]
    fn test_live_count_tracks_entries() {
        let registry = Registry::new(100, CallId::MAX.0);

        let a = registry.expose(noop()).unwrap();
        let (b, _rx) = registry.await_return().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.awaits_return(a), Some(false));
        assert_eq!(registry.awaits_return(b), Some(true));

        assert!(registry.remove(a).is_some());
        assert!(registry.remove(a).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_eviction_removes_least_recently_acknowledged() {
        let registry = Registry::new(3, CallId::MAX.0);

        let first = registry.expose(noop()).unwrap();
        let second = registry.expose(noop()).unwrap();
        let third = registry.expose(noop()).unwrap();

        // Invoking the oldest entry makes it the most recent.
        assert!(matches!(registry.claim(first), Some(Claim::Invoke(_))));

        let fourth = registry.expose(noop()).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(!registry.contains(second));
        assert!(registry.contains(first));
        assert!(registry.contains(third));
        assert!(registry.contains(fourth));

        let fifth = registry.expose(noop()).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(!registry.contains(third));
        assert!(registry.contains(fifth));
    }

    /// Log sink shared with the subscriber under test.
    #[derive(Clone, Default)]
    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_eviction_warns_once() {
        let capture = Capture::default();
        let sink = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();

        let registry = Registry::new(1, CallId::MAX.0);
        tracing::subscriber::with_default(subscriber, || {
            registry.expose(noop()).unwrap();
            assert!(!registry.eviction_warned.load(Ordering::Acquire));

            registry.expose(noop()).unwrap();
            assert!(registry.eviction_warned.load(Ordering::Acquire));

            registry.expose(noop()).unwrap();
            registry.expose(noop()).unwrap();
        });

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("pending registry exceeded its limit").count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_eviction_drops_awaited_senders() {
        let registry = Registry::new(1, CallId::MAX.0);

        let (_old, mut rx) = registry.await_return().unwrap();
        let (_new, _rx2) = registry.await_return().unwrap();

        assert_eq!(registry.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_creation_stamps_recency_and_claim_refreshes_it() {
        let registry = Registry::new(10, CallId::MAX.0);

        let a = registry.expose(noop()).unwrap();
        let b = registry.expose(noop()).unwrap();
        let before = registry.last_ack(a).unwrap();
        assert!(before < registry.last_ack(b).unwrap());

        registry.claim(a);
        assert!(registry.last_ack(a).unwrap() > registry.last_ack(b).unwrap());
    }

    #[test]
    fn test_claim_consumes_return_entries() {
        let registry = Registry::new(10, CallId::MAX.0);
        let (id, rx) = registry.await_return().unwrap();

        let Some(Claim::Settle(tx)) = registry.claim(id) else {
            panic!("expected a settle claim");
        };
        tx.send(Ok(Value::Int(5))).unwrap();

        assert!(registry.is_empty());
        assert!(registry.claim(id).is_none());
        assert_eq!(rx.blocking_recv().unwrap().unwrap(), Value::Int(5));
    }

    #[test]
    fn test_restricted_id_space_never_collides() {
        let registry = Registry::new(1000, 8);

        let ids: Vec<CallId> = (0..8).map(|_| registry.expose(noop()).unwrap()).collect();
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 8);
        assert!(ids.iter().all(|id| (1..=8).contains(&id.0)));

        assert!(matches!(registry.expose(noop()), Err(Error::CallIdsExhausted)));

        registry.remove(ids[3]);
        assert_eq!(registry.expose(noop()).unwrap(), ids[3]);
    }
}
