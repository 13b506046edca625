//! Sharing store and deferred destruction
//!
//! Symbolic states are made of three components (location tuple, integer
//! valuation, zone) that are re-created bit-identical over and over during a
//! search. The [`Interner`] deduplicates them behind `Arc`s keyed by a
//! stable 64-bit fingerprint, so equality of shared components degenerates
//! to pointer equality and memory stays flat.
//!
//! Destruction is detached from the search loop: dropping the last handle of
//! a discarded component happens on the collector thread, fed through an
//! unbounded channel. [`Gc::start`] spawns the worker and the handle stops
//! it on drop, so an unwinding search cannot leak the thread.

use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use rustc_hash::FxHashMap;

use crate::dbm::Dbm;
use crate::system::LocId;

/// Stable 64-bit content fingerprint; equal values hash equally across runs
/// and platforms.
pub trait Fingerprint {
    fn fingerprint(&self) -> u64;
}

fn finish64(hasher: blake3::Hasher) -> u64 {
    let mut out = [0u8; 8];
    hasher.finalize_xof().fill(&mut out);
    u64::from_le_bytes(out)
}

impl Fingerprint for Vec<LocId> {
    fn fingerprint(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"zonecheck.vloc.v1");
        for l in self {
            hasher.update(&(l.as_usize() as u64).to_le_bytes());
        }
        finish64(hasher)
    }
}

impl Fingerprint for Vec<i32> {
    fn fingerprint(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"zonecheck.intval.v1");
        for v in self {
            hasher.update(&v.to_le_bytes());
        }
        finish64(hasher)
    }
}

impl Fingerprint for Dbm {
    fn fingerprint(&self) -> u64 {
        Dbm::fingerprint(self)
    }
}

/// A hash-consing table over `Arc<T>`. Lookup hashes the candidate, then
/// compares by value within the bucket; a hit returns the stored handle and
/// the candidate is dropped.
pub struct Interner<T> {
    buckets: FxHashMap<u64, Vec<Arc<T>>>,
    hits: u64,
    misses: u64,
}

impl<T: Fingerprint + Eq> Interner<T> {
    pub fn new() -> Interner<T> {
        Interner { buckets: FxHashMap::default(), hits: 0, misses: 0 }
    }

    /// Deduplicate `value`; the returned handle is pointer-equal to every
    /// other `share` of an equal value.
    pub fn share(&mut self, value: T) -> Arc<T> {
        let key = value.fingerprint();
        let bucket = self.buckets.entry(key).or_default();
        for stored in bucket.iter() {
            if **stored == value {
                self.hits += 1;
                return Arc::clone(stored);
            }
        }
        self.misses += 1;
        let arc = Arc::new(value);
        bucket.push(Arc::clone(&arc));
        arc
    }

    /// Drop interned entries nobody else references, returning them for
    /// deferred destruction.
    pub fn sweep(&mut self, gc: &Gc)
    where
        T: Send + Sync + 'static,
    {
        self.buckets.retain(|_, bucket| {
            bucket.retain(|arc| {
                if Arc::strong_count(arc) == 1 {
                    gc.defer(Arc::clone(arc));
                    false
                } else {
                    true
                }
            });
            !bucket.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl<T: Fingerprint + Eq> Default for Interner<T> {
    fn default() -> Interner<T> {
        Interner::new()
    }
}

/// The background release worker. Components queue objects to be destroyed
/// while holding no locks; the worker drains the queue and runs the drops.
pub struct Gc {
    tx: Option<Sender<Box<dyn Any + Send>>>,
    handle: Option<JoinHandle<()>>,
}

impl Gc {
    /// Spawn the collector thread.
    pub fn start() -> Gc {
        let (tx, rx) = unbounded::<Box<dyn Any + Send>>();
        let handle = std::thread::Builder::new()
            .name("zonecheck-gc".into())
            .spawn(move || {
                // Dropping the received box runs the destructor here, off
                // the search thread.
                for released in rx {
                    drop(released);
                }
            })
            .expect("spawning the collector thread");
        Gc { tx: Some(tx), handle: Some(handle) }
    }

    /// Queue `obj` for destruction on the collector thread. After `stop`,
    /// objects are dropped inline instead.
    pub fn defer<T: Send + 'static>(&self, obj: T) {
        if let Some(tx) = &self.tx {
            match tx.send(Box::new(obj)) {
                Ok(()) => return,
                Err(crossbeam_channel::SendError(boxed)) => {
                    drop(boxed);
                    return;
                }
            }
        }
        drop(obj);
    }

    /// Close the queue and join the worker, draining every pending release.
    pub fn stop(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_dedupes_by_value() {
        let mut interner: Interner<Vec<i32>> = Interner::new();
        let a = interner.share(vec![1, 2, 3]);
        let b = interner.share(vec![1, 2, 3]);
        let c = interner.share(vec![4]);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn sweep_releases_unreferenced() {
        let gc = Gc::start();
        let mut interner: Interner<Vec<i32>> = Interner::new();
        let keep = interner.share(vec![1]);
        let _ = interner.share(vec![2]);
        interner.sweep(&gc);
        assert_eq!(interner.len(), 1);
        drop(keep);
    }

    #[test]
    fn gc_runs_deferred_drops() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Probe;
        impl Drop for Probe {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut gc = Gc::start();
        gc.defer(Probe);
        gc.defer(Probe);
        gc.stop();
        assert_eq!(DROPS.load(Ordering::SeqCst), 2);
        // After stop, deferred objects are dropped inline.
        gc.defer(Probe);
        assert_eq!(DROPS.load(Ordering::SeqCst), 3);
    }
}
