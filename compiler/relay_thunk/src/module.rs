//! The thunk module: services, registries and emitted globals.

use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;

use relay_abi::{lower_signature, LayoutService, LoweredSignature, MetadataService};
use relay_ir::{
    EntityKind, Mangler, MethodReference, Name, SharedInterner, ThunkFunction, TypePool,
};

use crate::options::ThunkOptions;
use crate::registry::SymbolRegistry;
use crate::{emit, lookup, internal_error, ServiceResultExt};

/// Collaborators thunk emission consults.
#[derive(Clone)]
pub struct Services {
    pub interner: SharedInterner,
    pub types: Arc<TypePool>,
    pub layout: Arc<dyn LayoutService>,
    pub metadata: Arc<dyn MetadataService>,
}

/// A constant global the module defines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GlobalDefinition {
    /// Opaque, addressable identity of a method; never read as data.
    MethodDescriptor { method: MethodReference },
    /// Advertises the context frame size of an async function so callers
    /// can allocate before resolving its body.
    AsyncFunctionPointer { function: Name, context_size: u32 },
}

/// A declared dispatch thunk.
#[derive(Clone, Debug)]
pub struct EntryPoint {
    pub symbol: Name,
    pub signature: Arc<LoweredSignature>,
}

/// Owns every thunk, lookup function and global emitted for one module.
pub struct ThunkModule {
    services: Services,
    options: ThunkOptions,
    thunks: SymbolRegistry<MethodReference, Arc<LoweredSignature>>,
    lookups: SymbolRegistry<Name, ()>,
    globals: DashMap<Name, GlobalDefinition>,
}

impl ThunkModule {
    pub fn new(services: Services, options: ThunkOptions) -> Self {
        Self {
            services,
            options,
            thunks: SymbolRegistry::new(),
            lookups: SymbolRegistry::new(),
            globals: DashMap::new(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn options(&self) -> ThunkOptions {
        self.options
    }

    pub fn interner(&self) -> &SharedInterner {
        &self.services.interner
    }

    pub fn types(&self) -> &TypePool {
        &self.services.types
    }

    pub fn layout(&self) -> &dyn LayoutService {
        self.services.layout.as_ref()
    }

    pub fn metadata(&self) -> &dyn MetadataService {
        self.services.metadata.as_ref()
    }

    pub fn module_name(&self) -> Name {
        self.services.metadata.module()
    }

    pub fn mangler(&self) -> Mangler<'_> {
        Mangler::new(&self.services.interner, &self.services.types)
    }

    fn intern(&self, symbol: &str) -> Name {
        self.services.interner.intern(symbol)
    }

    // ── Dispatch thunks ─────────────────────────────────────────────

    /// Look up or allocate the entry point of `method`'s dispatch thunk.
    ///
    /// Does not emit a body. Async thunks also get their async function
    /// pointer record here, so it is addressable before any body exists.
    pub fn declare_dispatch_thunk(&self, method: &MethodReference) -> EntryPoint {
        let entry = self.thunks.declare(method, || {
            let symbol = self.intern(&self.mangler().dispatch_thunk(method));
            let signature = lower_signature(method, self.layout())
                .or_internal("lowering a dispatch thunk signature");
            tracing::debug!(
                symbol = self.interner().lookup(symbol),
                convention = ?method.convention(),
                "declared dispatch thunk"
            );
            (symbol, Arc::new(signature))
        });
        if let Some(layout) = &entry.declaration.async_layout {
            self.define_async_function_pointer(entry.symbol, layout.size);
        }
        EntryPoint {
            symbol: entry.symbol,
            signature: Arc::clone(&entry.declaration),
        }
    }

    /// Define `method`'s dispatch thunk, or return the existing body.
    #[tracing::instrument(level = "debug", skip_all, fields(selector = self.interner().lookup(method.selector)))]
    pub fn define_dispatch_thunk(&self, method: &MethodReference) -> Arc<ThunkFunction> {
        self.declare_dispatch_thunk(method);
        let Some(entry) = self.thunks.get(method) else {
            internal_error("dispatch thunk vanished after declaration")
        };
        self.thunks.define(&entry, || {
            emit::emit_dispatch_thunk(self, method, entry.symbol, &entry.declaration)
        })
    }

    /// Define a batch of dispatch thunks, in parallel when enabled.
    #[tracing::instrument(level = "debug", skip_all, fields(count = methods.len()))]
    pub fn emit_dispatch_thunks(&self, methods: &[MethodReference]) -> Vec<Arc<ThunkFunction>> {
        if self.options.parallel {
            methods
                .par_iter()
                .map(|m| self.define_dispatch_thunk(m))
                .collect()
        } else {
            methods.iter().map(|m| self.define_dispatch_thunk(m)).collect()
        }
    }

    // ── Descriptors and async function pointers ─────────────────────

    /// Symbol of `method`'s method descriptor.
    ///
    /// # Panics
    ///
    /// Panics if `method` overrides an inherited entry instead of
    /// introducing its own; such methods have no descriptor.
    pub fn declare_method_descriptor(&self, method: &MethodReference) -> Name {
        if !method.is_witness_method() {
            let introduces = self
                .metadata()
                .introduces_entry(method)
                .or_internal("querying a method descriptor");
            if !introduces {
                internal_error(format_args!(
                    "`{}` overrides an inherited entry and has no method descriptor",
                    self.interner().lookup(method.selector)
                ));
            }
        }
        let symbol = self.intern(&self.mangler().method_descriptor(method));
        self.globals
            .entry(symbol)
            .or_insert_with(|| GlobalDefinition::MethodDescriptor {
                method: method.clone(),
            });
        symbol
    }

    /// Symbol of the async function pointer record of `method`'s dispatch
    /// thunk.
    pub fn async_function_pointer(&self, method: &MethodReference) -> Name {
        if !method.convention().is_async() {
            internal_error(format_args!(
                "`{}` is not async and has no async function pointer",
                self.interner().lookup(method.selector)
            ));
        }
        let entry = self.declare_dispatch_thunk(method);
        self.async_pointer_symbol(entry.symbol)
    }

    fn async_pointer_symbol(&self, function: Name) -> Name {
        self.intern(&Mangler::async_function_pointer(
            self.interner().lookup(function),
        ))
    }

    pub(crate) fn define_async_function_pointer(&self, function: Name, context_size: u32) -> Name {
        let symbol = self.async_pointer_symbol(function);
        self.globals.entry(symbol).or_insert_with(|| {
            tracing::debug!(
                symbol = self.interner().lookup(symbol),
                context_size,
                "defined async function pointer"
            );
            GlobalDefinition::AsyncFunctionPointer {
                function,
                context_size,
            }
        });
        symbol
    }

    /// Function an async function pointer record points to.
    pub fn function_for_async_pointer(&self, record: Name) -> Option<Name> {
        match self.globals.get(&record).as_deref() {
            Some(GlobalDefinition::AsyncFunctionPointer { function, .. }) => Some(*function),
            _ => None,
        }
    }

    // ── Method lookup functions ─────────────────────────────────────

    /// Symbol of `class`'s method lookup function,
    /// `(metadata, descriptor) -> implementation`.
    pub fn declare_method_lookup_function(&self, class: Name) -> Name {
        self.lookups
            .declare(&class, || {
                let symbol = self.mangler().class_entity(
                    self.module_name(),
                    class,
                    EntityKind::MethodLookupFunction,
                );
                (self.intern(&symbol), ())
            })
            .symbol
    }

    #[tracing::instrument(level = "debug", skip_all, fields(class = self.interner().lookup(class)))]
    pub fn define_method_lookup_function(&self, class: Name) -> Arc<ThunkFunction> {
        self.declare_method_lookup_function(class);
        let Some(entry) = self.lookups.get(&class) else {
            internal_error("lookup function vanished after declaration")
        };
        self.lookups.define(&entry, || {
            lookup::emit_method_lookup_function(self, class, entry.symbol)
        })
    }

    // ── Output ──────────────────────────────────────────────────────

    /// Every defined function, sorted by symbol.
    pub fn functions(&self) -> Vec<Arc<ThunkFunction>> {
        let mut all = self.thunks.bodies();
        all.extend(self.lookups.bodies());
        all.sort_by(|a, b| {
            self.interner()
                .lookup(a.name)
                .cmp(self.interner().lookup(b.name))
        });
        all
    }

    /// The defined body of `symbol`, if any.
    pub fn function(&self, symbol: Name) -> Option<Arc<ThunkFunction>> {
        self.thunks
            .by_symbol(symbol)
            .and_then(|e| e.body().cloned())
            .or_else(|| self.lookups.by_symbol(symbol).and_then(|e| e.body().cloned()))
    }

    pub fn global(&self, symbol: Name) -> Option<GlobalDefinition> {
        self.globals.get(&symbol).map(|g| g.clone())
    }

    /// Every defined global.
    pub fn globals(&self) -> Vec<(Name, GlobalDefinition)> {
        self.globals
            .iter()
            .map(|g| (*g.key(), g.value().clone()))
            .collect()
    }

    /// Number of dispatch thunk bodies generated so far.
    pub fn thunk_bodies_emitted(&self) -> usize {
        self.thunks.bodies_emitted()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
