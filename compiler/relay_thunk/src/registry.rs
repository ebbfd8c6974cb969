//! Idempotent symbol registry.
//!
//! Maps a key (a method reference, or a class for lookup functions) to a
//! declared entry point. Declaring allocates the symbol and its
//! declaration once; defining runs the body generator at most once per
//! entry, no matter how many threads ask concurrently. The registry is the
//! only shared mutable state of thunk generation.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use relay_ir::{Name, ThunkFunction};

/// A declared entry point and, once defined, its body.
#[derive(Debug)]
pub struct RegistryEntry<D> {
    pub symbol: Name,
    pub declaration: D,
    body: OnceLock<Arc<ThunkFunction>>,
}

impl<D> RegistryEntry<D> {
    pub fn body(&self) -> Option<&Arc<ThunkFunction>> {
        self.body.get()
    }

    pub fn is_defined(&self) -> bool {
        self.body.get().is_some()
    }
}

pub struct SymbolRegistry<K, D> {
    entries: DashMap<K, Arc<RegistryEntry<D>>>,
    by_symbol: DashMap<Name, Arc<RegistryEntry<D>>>,
    bodies_emitted: AtomicUsize,
}

impl<K: Hash + Eq + Clone, D> SymbolRegistry<K, D> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            by_symbol: DashMap::new(),
            bodies_emitted: AtomicUsize::new(0),
        }
    }

    /// Look up or allocate the entry for `key`.
    ///
    /// `declare` runs only for the first request and must not re-enter
    /// this registry.
    pub fn declare(&self, key: &K, declare: impl FnOnce() -> (Name, D)) -> Arc<RegistryEntry<D>> {
        if let Some(entry) = self.entries.get(key) {
            return Arc::clone(&entry);
        }
        let entry = Arc::clone(
            self.entries
                .entry(key.clone())
                .or_insert_with(|| {
                    let (symbol, declaration) = declare();
                    Arc::new(RegistryEntry {
                        symbol,
                        declaration,
                        body: OnceLock::new(),
                    })
                })
                .value(),
        );
        self.by_symbol
            .entry(entry.symbol)
            .or_insert_with(|| Arc::clone(&entry));
        entry
    }

    /// Define `entry`'s body with `emit` unless it already has one.
    pub fn define(
        &self,
        entry: &RegistryEntry<D>,
        emit: impl FnOnce() -> ThunkFunction,
    ) -> Arc<ThunkFunction> {
        Arc::clone(entry.body.get_or_init(|| {
            self.bodies_emitted.fetch_add(1, Ordering::Relaxed);
            Arc::new(emit())
        }))
    }

    pub fn get(&self, key: &K) -> Option<Arc<RegistryEntry<D>>> {
        self.entries.get(key).map(|e| Arc::clone(&e))
    }

    pub fn by_symbol(&self, symbol: Name) -> Option<Arc<RegistryEntry<D>>> {
        self.by_symbol.get(&symbol).map(|e| Arc::clone(&e))
    }

    /// Number of bodies generated so far.
    pub fn bodies_emitted(&self) -> usize {
        self.bodies_emitted.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every defined body.
    pub fn bodies(&self) -> Vec<Arc<ThunkFunction>> {
        self.entries
            .iter()
            .filter_map(|e| e.value().body().cloned())
            .collect()
    }
}

impl<K: Hash + Eq + Clone, D> Default for SymbolRegistry<K, D> {
    fn default() -> Self {
        Self::new()
    }
}
