//! Async context frames: advertised sizes cover every field, and a thunk
//! suspends exactly once per call.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use relay_abi::{
    ClassDecl, LayoutConfig, MethodDecl, ModuleMetadata, TargetLayout, CONTEXT_HEADER_SIZE,
};
use relay_eval::{call_implementation, call_thunk, LogicalCall, Machine};
use relay_ir::{
    CallingConventionKind, DeclContext, FunctionSignature, GenericSignature, MethodKind,
    MethodReference, StringInterner, TypeId, TypePool, Visibility,
};
use relay_thunk::{GlobalDefinition, Services, ThunkModule};

use crate::common::{serial, Lab};

/// A single class whose async `load(i64)` returns `width` words, inline
/// when `layout` allows that many direct words and by address otherwise.
fn store(width: usize, layout: LayoutConfig) -> (Machine, MethodReference) {
    let interner = StringInterner::shared();
    let types = Arc::new(TypePool::new());
    let name = |s: &str| interner.intern(s);
    let module = name("store");
    let object = types.object(name("Store"));
    let load = MethodReference::new(
        module,
        DeclContext::Class(name("Store")),
        name("load"),
        MethodKind::Instance,
        FunctionSignature {
            convention: CallingConventionKind::Asynchronous,
            generics: GenericSignature::EMPTY,
            self_ty: object,
            params: vec![TypeId::I64],
            result: types.tuple(vec![TypeId::I64; width]),
            error: None,
        },
    );

    let mut meta = ModuleMetadata::new(module, Arc::clone(&interner), Arc::clone(&types));
    meta.add_class(ClassDecl {
        name: name("Store"),
        superclass: None,
        resilient: false,
        methods: vec![MethodDecl {
            method: load.clone(),
            implementation: name("store_load"),
            visibility: Visibility::Public,
            overrides: None,
        }],
    });
    let meta = Arc::new(meta);
    let thunks = Arc::new(ThunkModule::new(
        Services {
            interner: Arc::clone(&interner),
            types: Arc::clone(&types),
            layout: Arc::new(TargetLayout::new(Arc::clone(&types), layout)),
            metadata: meta.clone(),
        },
        serial(),
    ));
    let mut machine = Machine::new(thunks, meta).unwrap();
    machine
        .implement("store_load", move |inv| {
            let x = inv.args[0].scalar();
            Ok((0..width as u64).map(|i| x + i).collect())
        })
        .unwrap();
    (machine, load)
}

fn advertised_size(machine: &Machine, method: &MethodReference) -> u32 {
    let module = machine.module();
    module.declare_dispatch_thunk(method);
    match module.global(module.async_function_pointer(method)) {
        Some(GlobalDefinition::AsyncFunctionPointer { context_size, .. }) => context_size,
        other => panic!("expected an async function pointer, found {other:?}"),
    }
}

#[test]
fn advertised_sizes_cover_every_field() {
    for width in 5..=12 {
        let layout = LayoutConfig::default().with_max_direct_words(16);
        let (mut machine, load) = store(width, layout);
        let size = advertised_size(&machine, &load);
        // Header, argument, receiver, then the inline results.
        let fields = 8 + 8 + 8 * width as u32;
        assert!(
            size >= CONTEXT_HEADER_SIZE + fields,
            "width {width}: {size} bytes"
        );

        let object = machine.new_object("Store").unwrap();
        let call = LogicalCall::on(object).arg([100]);
        let thunk = call_thunk(&mut machine, &load, &call).unwrap();
        let direct = call_implementation(&mut machine, "store_load", &call).unwrap();
        let expected: Vec<u64> = (100..100 + width as u64).collect();
        assert_eq!(thunk.result, Ok(expected), "width {width}");
        assert_eq!(thunk.result, direct.result);
        assert_eq!(thunk.indirect_return, None);
    }
}

/// One argument plus a result too wide for registers.
#[test]
fn advertised_sizes_cover_the_indirect_return() {
    for width in 5..=12 {
        let (mut machine, load) = store(width, LayoutConfig::default());
        let size = advertised_size(&machine, &load);
        // Result address, argument, receiver.
        assert!(
            size >= CONTEXT_HEADER_SIZE + 8 + 8 + 8,
            "width {width}: {size} bytes"
        );

        let object = machine.new_object("Store").unwrap();
        let call = LogicalCall::on(object).arg([100]);
        let thunk = call_thunk(&mut machine, &load, &call).unwrap();
        let direct = call_implementation(&mut machine, "store_load", &call).unwrap();
        let expected: Vec<u64> = (100..100 + width as u64).collect();
        assert_eq!(thunk.result, Ok(expected.clone()), "width {width}");
        assert_eq!(thunk.result, direct.result);

        let destination = thunk.indirect_return.unwrap();
        assert_eq!(
            machine.memory().read_words(destination, width).unwrap(),
            expected
        );
    }
}

#[test]
fn frames_are_allocated_at_the_advertised_size() {
    let (mut machine, load) = store(7, LayoutConfig::default());
    let size = advertised_size(&machine, &load);
    let object = machine.new_object("Store").unwrap();
    let report = call_thunk(&mut machine, &load, &LogicalCall::on(object).arg([1])).unwrap();
    let frame = report.frame.unwrap();
    assert_eq!(machine.memory().region_size(frame), Some(size));
}

#[test]
fn thunks_suspend_once_per_call() {
    let mut lab = Lab::new(serial());
    let (object, metadata, table) = lab.gauge();
    let tick = lab.tick.clone();
    let call = LogicalCall::on(object).arg([41]).with_witness(metadata, table);

    let before = lab.machine.suspensions();
    let report = call_thunk(&mut lab.machine, &tick, &call).unwrap();
    assert_eq!(report.result, Ok(vec![42]));
    assert_eq!(lab.machine.suspensions(), before + 1);

    let before = lab.machine.suspensions();
    call_implementation(&mut lab.machine, "derived_tick", &call).unwrap();
    assert_eq!(lab.machine.suspensions(), before);
}

#[test]
fn class_async_thunks_suspend_once_per_call() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let fetch = lab.fetch.clone();
    for round in 1..=3 {
        call_thunk(&mut lab.machine, &fetch, &LogicalCall::on(base).arg([round])).unwrap();
        assert_eq!(lab.machine.suspensions(), round as usize);
    }
}
