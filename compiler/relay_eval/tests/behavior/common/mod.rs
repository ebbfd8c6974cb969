//! The `Lab` fixture: two classes and a protocol covering every calling
//! convention, both dispatch forms, and values passed directly, through
//! memory and by address.
//!
//! ```text
//! class Base (resilient when asked)
//!   sum(i32, i8) -> i64                        base_sum = a + b
//!   fetch(i64) async throws -> (i64 x 6)       base_fetch = x..x+5, fails on 0
//!   stream(i64) yield_once -> i64              base_stream = 3x
//!   pack((i64 x 6)) throws -> (i64 x 5)        base_pack = v[5..0:-1], fails on v[0] == 0
//!   echo<T>(T) -> T                            base_echo = copy of *arg
//!   hidden() -> i64                            base_hidden = 13       internal
//!   make() static -> i64                       base_make = 77
//! class Derived: Base
//!   sum(i32, i8) -> i64                        derived_sum = a * b    overrides
//!   extra() -> i64                             derived_extra = 21
//! protocol Gauge, Derived: Gauge
//!   zero() -> i64                              derived_zero = 0
//!   one() -> i64                               derived_one = 1
//!   combine(i64, i64) -> i64                   derived_combine = 10a + b   witness slot 3
//!   tick(i64) async -> i64                     derived_tick = x + 1
//!   spin(i64) yield_once -> i64                derived_spin = x ^ 0xff
//!   blob((i64 x 6)) -> (i64 x 6)               derived_blob = v + 1 each
//! ```

#![allow(dead_code, reason = "not every test module uses every fixture item")]

use std::sync::Arc;

use relay_abi::{
    ClassDecl, Conformance, LayoutConfig, MethodDecl, ModuleMetadata, ProtocolDecl, TargetLayout,
};
use relay_eval::{ArgValue, Machine};
use relay_ir::{
    CallingConventionKind, DeclContext, FunctionSignature, GenericSignature, MethodKind,
    MethodReference, Name, SharedInterner, StringInterner, TypeId, TypePool, Visibility,
};
use relay_thunk::{Services, ThunkModule, ThunkOptions};

pub const FETCH_ERROR: u64 = 0xE1;
pub const PACK_ERROR: u64 = 0xE2;

/// Serial options so tests see emission in a fixed order.
pub fn serial() -> ThunkOptions {
    ThunkOptions::default().serial()
}

pub struct Lab {
    pub machine: Machine,
    pub module: Arc<ThunkModule>,
    pub interner: SharedInterner,
    pub types: Arc<TypePool>,

    pub sum: MethodReference,
    pub fetch: MethodReference,
    pub stream: MethodReference,
    pub pack: MethodReference,
    pub echo: MethodReference,
    pub hidden: MethodReference,
    pub make: MethodReference,
    pub derived_sum: MethodReference,
    pub extra: MethodReference,

    pub zero: MethodReference,
    pub one: MethodReference,
    pub combine: MethodReference,
    pub tick: MethodReference,
    pub spin: MethodReference,
    pub blob: MethodReference,
}

/// Declaration order of the fixture's members.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    AsWritten,
    Reversed,
}

impl Lab {
    pub fn new(options: ThunkOptions) -> Self {
        Self::build(options, false, Order::AsWritten)
    }

    pub fn resilient(options: ThunkOptions) -> Self {
        Self::build(options, true, Order::AsWritten)
    }

    pub fn build(options: ThunkOptions, resilient: bool, order: Order) -> Self {
        use CallingConventionKind::{Asynchronous, Ordinary, YieldingCoroutine};

        let interner = StringInterner::shared();
        let types = Arc::new(TypePool::new());
        let name = |s: &str| interner.intern(s);
        let module = name("lab");
        let wide = |n: usize| types.tuple(vec![TypeId::I64; n]);

        let sig = |convention, self_ty: TypeId, params: Vec<TypeId>, result: TypeId| {
            FunctionSignature {
                convention,
                generics: GenericSignature::EMPTY,
                self_ty,
                params,
                result,
                error: None,
            }
        };
        let throwing = |mut s: FunctionSignature| {
            s.error = Some(TypeId::I64);
            s
        };
        let method = |owner: DeclContext, selector: &str, s: FunctionSignature| {
            let kind = if types.is_metatype(s.self_ty) {
                MethodKind::Static
            } else {
                MethodKind::Instance
            };
            MethodReference::new(module, owner, name(selector), kind, s)
        };
        let decl = |m: &MethodReference, imp: &str, visibility, overrides: Option<&MethodReference>| {
            MethodDecl {
                method: m.clone(),
                implementation: name(imp),
                visibility,
                overrides: overrides.cloned(),
            }
        };

        let base = types.object(name("Base"));
        let derived = types.object(name("Derived"));
        let gauge = types.protocol_self(name("Gauge"));
        let in_base = DeclContext::Class(name("Base"));
        let in_derived = DeclContext::Class(name("Derived"));
        let in_gauge = DeclContext::Protocol(name("Gauge"));

        let sum = method(in_base, "sum", sig(Ordinary, base, vec![TypeId::I32, TypeId::I8], TypeId::I64));
        let fetch = method(
            in_base,
            "fetch",
            throwing(sig(Asynchronous, base, vec![TypeId::I64], wide(6))),
        );
        let stream = method(in_base, "stream", sig(YieldingCoroutine, base, vec![TypeId::I64], TypeId::I64));
        let pack = method(in_base, "pack", throwing(sig(Ordinary, base, vec![wide(6)], wide(5))));
        let mut echo_sig = sig(Ordinary, base, vec![types.generic(0)], types.generic(0));
        echo_sig.generics = GenericSignature::new(1, 0);
        let echo = method(in_base, "echo", echo_sig);
        let hidden = method(in_base, "hidden", sig(Ordinary, base, vec![], TypeId::I64));
        let make = method(in_base, "make", sig(Ordinary, types.metatype(name("Base")), vec![], TypeId::I64));

        let derived_sum = method(
            in_derived,
            "sum",
            sig(Ordinary, derived, vec![TypeId::I32, TypeId::I8], TypeId::I64),
        );
        let extra = method(in_derived, "extra", sig(Ordinary, derived, vec![], TypeId::I64));

        let zero = method(in_gauge, "zero", sig(Ordinary, gauge, vec![], TypeId::I64));
        let one = method(in_gauge, "one", sig(Ordinary, gauge, vec![], TypeId::I64));
        let combine = method(
            in_gauge,
            "combine",
            sig(Ordinary, gauge, vec![TypeId::I64, TypeId::I64], TypeId::I64),
        );
        let tick = method(in_gauge, "tick", sig(Asynchronous, gauge, vec![TypeId::I64], TypeId::I64));
        let spin = method(in_gauge, "spin", sig(YieldingCoroutine, gauge, vec![TypeId::I64], TypeId::I64));
        let blob = method(in_gauge, "blob", sig(Ordinary, gauge, vec![wide(6)], wide(6)));

        let base_class = ClassDecl {
            name: name("Base"),
            superclass: None,
            resilient,
            methods: ordered(order, vec![
                decl(&sum, "base_sum", Visibility::Public, None),
                decl(&fetch, "base_fetch", Visibility::Public, None),
                decl(&stream, "base_stream", Visibility::Public, None),
                decl(&pack, "base_pack", Visibility::Public, None),
                decl(&echo, "base_echo", Visibility::Public, None),
                decl(&hidden, "base_hidden", Visibility::Internal, None),
                decl(&make, "base_make", Visibility::Public, None),
            ]),
        };
        let derived_class = ClassDecl {
            name: name("Derived"),
            superclass: Some(name("Base")),
            resilient: false,
            methods: ordered(order, vec![
                decl(&derived_sum, "derived_sum", Visibility::Public, Some(&sum)),
                decl(&extra, "derived_extra", Visibility::Public, None),
            ]),
        };

        let mut meta = ModuleMetadata::new(module, Arc::clone(&interner), Arc::clone(&types));
        for class in ordered(order, vec![base_class, derived_class]) {
            meta.add_class(class);
        }
        meta.add_protocol(ProtocolDecl {
            name: name("Gauge"),
            requirements: ordered(order, vec![
                zero.clone(),
                one.clone(),
                combine.clone(),
                tick.clone(),
                spin.clone(),
                blob.clone(),
            ]),
        });
        meta.add_conformance(Conformance {
            ty: name("Derived"),
            protocol: name("Gauge"),
            witnesses: ordered(
                order,
                [
                    "derived_zero",
                    "derived_one",
                    "derived_combine",
                    "derived_tick",
                    "derived_spin",
                    "derived_blob",
                ]
                .into_iter()
                .map(name)
                .collect(),
            ),
        })
        .unwrap();

        let meta = Arc::new(meta);
        let thunks = Arc::new(ThunkModule::new(
            Services {
                interner: Arc::clone(&interner),
                types: Arc::clone(&types),
                layout: Arc::new(TargetLayout::new(Arc::clone(&types), LayoutConfig::default())),
                metadata: meta.clone(),
            },
            options,
        ));
        let mut machine = Machine::new(Arc::clone(&thunks), meta).unwrap();
        install(&mut machine);

        Self {
            machine,
            module: thunks,
            interner,
            types,
            sum,
            fetch,
            stream,
            pack,
            echo,
            hidden,
            make,
            derived_sum,
            extra,
            zero,
            one,
            combine,
            tick,
            spin,
            blob,
        }
    }

    pub fn name(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    pub fn object(&mut self, class: &str) -> u64 {
        self.machine.new_object(class).unwrap()
    }

    pub fn metadata_of(&self, class: &str) -> u64 {
        self.machine.class_metadata(class).unwrap()
    }

    /// A `Derived` instance plus the metadata and witness table a
    /// `Gauge`-dispatched call needs.
    pub fn gauge(&mut self) -> (u64, u64, u64) {
        let object = self.object("Derived");
        let metadata = self.metadata_of("Derived");
        let table = self.machine.witness_table("Derived", "Gauge").unwrap();
        (object, metadata, table)
    }

    /// Every dispatched method, paired with the implementation a `Derived`
    /// receiver reaches.
    pub fn dispatched(&self) -> Vec<(MethodReference, &'static str)> {
        vec![
            (self.sum.clone(), "derived_sum"),
            (self.fetch.clone(), "base_fetch"),
            (self.stream.clone(), "base_stream"),
            (self.pack.clone(), "base_pack"),
            (self.echo.clone(), "base_echo"),
            (self.hidden.clone(), "base_hidden"),
            (self.make.clone(), "base_make"),
            (self.extra.clone(), "derived_extra"),
            (self.zero.clone(), "derived_zero"),
            (self.one.clone(), "derived_one"),
            (self.combine.clone(), "derived_combine"),
            (self.tick.clone(), "derived_tick"),
            (self.spin.clone(), "derived_spin"),
            (self.blob.clone(), "derived_blob"),
        ]
    }
}

fn ordered<T>(order: Order, mut items: Vec<T>) -> Vec<T> {
    if order == Order::Reversed {
        items.reverse();
    }
    items
}

fn scalar(args: &[ArgValue], index: usize) -> u64 {
    args[index].scalar()
}

fn install(machine: &mut Machine) {
    machine
        .implement("base_sum", |inv| Ok(vec![scalar(&inv.args, 0) + scalar(&inv.args, 1)]))
        .unwrap();
    machine
        .implement("derived_sum", |inv| Ok(vec![scalar(&inv.args, 0) * scalar(&inv.args, 1)]))
        .unwrap();
    machine
        .implement("base_fetch", |inv| match scalar(&inv.args, 0) {
            0 => Err(FETCH_ERROR),
            x => Ok((0..6).map(|i| x + i).collect()),
        })
        .unwrap();
    machine
        .implement("base_stream", |inv| Ok(vec![scalar(&inv.args, 0) * 3]))
        .unwrap();
    machine
        .implement("base_pack", |inv| {
            let v = inv.args[0].words();
            if v[0] == 0 {
                return Err(PACK_ERROR);
            }
            Ok(v[1..].iter().rev().copied().collect())
        })
        .unwrap();
    machine
        .implement("base_echo", |inv| {
            let ArgValue::Address(addr) = inv.args[0] else {
                return Err(0xBAD);
            };
            inv.memory.read_words(addr, 2).map_err(|_| 0xBAD)
        })
        .unwrap();
    machine.implement("base_hidden", |_| Ok(vec![13])).unwrap();
    machine.implement("base_make", |_| Ok(vec![77])).unwrap();
    machine.implement("derived_extra", |_| Ok(vec![21])).unwrap();

    machine.implement("derived_zero", |_| Ok(vec![0])).unwrap();
    machine.implement("derived_one", |_| Ok(vec![1])).unwrap();
    machine
        .implement("derived_combine", |inv| {
            Ok(vec![scalar(&inv.args, 0) * 10 + scalar(&inv.args, 1)])
        })
        .unwrap();
    machine
        .implement("derived_tick", |inv| Ok(vec![scalar(&inv.args, 0) + 1]))
        .unwrap();
    machine
        .implement("derived_spin", |inv| Ok(vec![scalar(&inv.args, 0) ^ 0xff]))
        .unwrap();
    machine
        .implement("derived_blob", |inv| {
            Ok(inv.args[0].words().iter().map(|w| w.wrapping_add(1)).collect())
        })
        .unwrap();
}
