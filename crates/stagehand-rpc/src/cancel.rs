//! Connection-scoped registry of operation cancel triggers.

use std::collections::HashMap;

use parking_lot::Mutex;
use stagehand_core::ids::OperationId;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry {
    token: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct Funcs {
    entries: HashMap<OperationId, Entry>,
    next_generation: u64,
}

/// Operation id → cancel trigger. At most one trigger per id.
///
/// `add`, `remove` and `call` are serialized under one mutex.
#[derive(Default)]
pub struct CancelFuncs {
    funcs: Mutex<Funcs>,
}

impl CancelFuncs {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `token` under `id`, replacing any previous trigger.
    pub fn add(&self, id: OperationId, token: CancellationToken) {
        let _ = self.insert(id, token);
    }

    /// Store `token` under `id` for as long as the returned guard lives.
    ///
    /// Dropping the guard (including during unwind) removes the entry, unless
    /// a later `add` or `register` has replaced it in the meantime.
    pub fn register(&self, id: OperationId, token: CancellationToken) -> CancelRegistration<'_> {
        let generation = self.insert(id.clone(), token);
        CancelRegistration {
            funcs: self,
            id,
            generation,
        }
    }

    fn insert(&self, id: OperationId, token: CancellationToken) -> u64 {
        let mut funcs = self.funcs.lock();
        let generation = funcs.next_generation;
        funcs.next_generation += 1;
        if funcs.entries.insert(id.clone(), Entry { token, generation }).is_some() {
            debug!(operation_id = %id, "replaced existing cancel trigger");
        }
        generation
    }

    /// Discard the trigger under `id` without firing it.
    pub fn remove(&self, id: &OperationId) {
        let _ = self.funcs.lock().entries.remove(id);
    }

    fn remove_generation(&self, id: &OperationId, generation: u64) {
        let mut funcs = self.funcs.lock();
        if funcs.entries.get(id).is_some_and(|e| e.generation == generation) {
            let _ = funcs.entries.remove(id);
        }
    }

    /// Fire and remove the trigger under `id`.
    ///
    /// Returns whether a trigger was found.
    pub fn call(&self, id: &OperationId) -> bool {
        let entry = self.funcs.lock().entries.remove(id);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of registered triggers.
    pub fn len(&self) -> usize {
        self.funcs.lock().entries.len()
    }

    /// Whether no triggers are registered.
    pub fn is_empty(&self) -> bool {
        self.funcs.lock().entries.is_empty()
    }
}

/// Removes its own entry from a [`CancelFuncs`] on drop.
#[must_use = "the entry is removed as soon as the registration is dropped"]
pub struct CancelRegistration<'a> {
    funcs: &'a CancelFuncs,
    id: OperationId,
    generation: u64,
}

impl Drop for CancelRegistration<'_> {
    fn drop(&mut self) {
        self.funcs.remove_generation(&self.id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> OperationId {
        OperationId::from_raw(s)
    }

    #[test]
    fn call_unknown_is_not_found() {
        let funcs = CancelFuncs::new();
        assert!(!funcs.call(&id("nope")));
    }

    #[test]
    fn add_call_call() {
        let funcs = CancelFuncs::new();
        let token = CancellationToken::new();
        funcs.add(id("a"), token.clone());
        assert!(funcs.call(&id("a")));
        assert!(token.is_cancelled());
        assert!(!funcs.call(&id("a")));
        assert!(funcs.is_empty());
    }

    #[test]
    fn remove_does_not_fire() {
        let funcs = CancelFuncs::new();
        let token = CancellationToken::new();
        funcs.add(id("a"), token.clone());
        funcs.remove(&id("a"));
        assert!(!token.is_cancelled());
        assert!(!funcs.call(&id("a")));
    }

    #[test]
    fn add_overwrites() {
        let funcs = CancelFuncs::new();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        funcs.add(id("a"), first.clone());
        funcs.add(id("a"), second.clone());
        assert_eq!(funcs.len(), 1);
        assert!(funcs.call(&id("a")));
        assert!(!first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[test]
    fn registration_removes_entry_on_drop() {
        let funcs = CancelFuncs::new();
        let token = CancellationToken::new();
        {
            let _registration = funcs.register(id("a"), token.clone());
            assert_eq!(funcs.len(), 1);
        }
        assert!(funcs.is_empty());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn registration_removes_entry_on_unwind() {
        let funcs = CancelFuncs::new();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _registration = funcs.register(id("a"), CancellationToken::new());
            panic!("operation died");
        }));
        assert!(caught.is_err());
        assert!(funcs.is_empty());
    }

    #[test]
    fn stale_registration_keeps_newer_trigger() {
        let funcs = CancelFuncs::new();
        let first = funcs.register(id("a"), CancellationToken::new());
        let newer = CancellationToken::new();
        let second = funcs.register(id("a"), newer.clone());

        drop(first);
        assert_eq!(funcs.len(), 1);
        assert!(funcs.call(&id("a")));
        assert!(newer.is_cancelled());
        drop(second);
        assert!(funcs.is_empty());
    }

    #[test]
    fn concurrent_calls_fire_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let funcs = Arc::new(CancelFuncs::new());
        funcs.add(id("a"), CancellationToken::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let funcs = Arc::clone(&funcs);
                let hits = Arc::clone(&hits);
                std::thread::spawn(move || {
                    if funcs.call(&id("a")) {
                        let _ = hits.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
