//! A call through a dispatch thunk is indistinguishable from calling the
//! implementation the receiver's tables select.

use pretty_assertions::assert_eq;

use relay_abi::PointerAuthSchema;
use relay_eval::{call_implementation, call_thunk, LogicalCall};
use relay_ir::{MethodReference, PtrAuthKey};
use relay_thunk::ThunkOptions;

use crate::common::{serial, Lab};

/// A representative call of `method` on a `Derived` receiver and the
/// result it should produce.
fn typical(lab: &mut Lab, method: &MethodReference) -> (LogicalCall, Vec<u64>) {
    let (object, metadata, table) = lab.gauge();
    let selector = lab.interner.lookup(method.selector);
    let on = LogicalCall::on(object);
    let witness = |call: LogicalCall| call.with_witness(metadata, table);
    match selector {
        "sum" => (on.arg([6]).arg([7]), vec![42]),
        "fetch" => (on.arg([10]), (10..16).collect()),
        "stream" => (on.arg([5]), vec![15]),
        "pack" => (on.arg([1, 2, 3, 4, 5, 6]), vec![6, 5, 4, 3, 2]),
        "echo" => {
            let value = lab.machine.memory_mut().alloc(16);
            lab.machine.memory_mut().write_words(value, &[8, 9]).unwrap();
            (on.arg_address(value).binding(0x5EED).with_result_words(2), vec![8, 9])
        }
        "hidden" => (on, vec![13]),
        "make" => (LogicalCall::on(metadata), vec![77]),
        "extra" => (on, vec![21]),
        "zero" => (witness(on), vec![0]),
        "one" => (witness(on), vec![1]),
        "combine" => (witness(on.arg([4]).arg([2])), vec![42]),
        "tick" => (witness(on.arg([9])), vec![10]),
        "spin" => (witness(on.arg([1])), vec![0xfe]),
        "blob" => (witness(on.arg([1, 2, 3, 4, 5, 6])), vec![2, 3, 4, 5, 6, 7]),
        other => panic!("no typical call for `{other}`"),
    }
}

fn check_every_method(options: ThunkOptions, resilient: bool) {
    let mut lab = if resilient {
        Lab::resilient(options)
    } else {
        Lab::new(options)
    };
    for (method, implementation) in lab.dispatched() {
        let (call, expected) = typical(&mut lab, &method);
        let through_thunk = call_thunk(&mut lab.machine, &method, &call).unwrap();
        let direct = call_implementation(&mut lab.machine, implementation, &call).unwrap();

        assert_eq!(through_thunk.result, Ok(expected), "{implementation} via thunk");
        assert_eq!(through_thunk.result, direct.result, "{implementation}");
        assert_eq!(
            through_thunk.continuation.is_some(),
            method.convention().is_coroutine(),
            "{implementation}"
        );
        assert_eq!(through_thunk.continuation, through_thunk.resume_buffer);
        assert_eq!(direct.continuation, direct.resume_buffer);
    }
}

#[test]
fn fixed_tables() {
    check_every_method(serial(), false);
}

#[test]
fn resilient_tables() {
    check_every_method(serial(), true);
}

#[test]
fn signed_tables() {
    for key in [PtrAuthKey::IA, PtrAuthKey::IB, PtrAuthKey::DA, PtrAuthKey::DB] {
        let options = serial().with_pointer_auth(PointerAuthSchema::new(key));
        check_every_method(options, false);
        check_every_method(options, true);
    }
}

#[test]
fn parallel_emission_forwards_the_same() {
    let mut lab = Lab::new(ThunkOptions::default());
    let methods: Vec<_> = lab.dispatched().into_iter().map(|(m, _)| m).collect();
    lab.module.emit_dispatch_thunks(&methods);
    for (method, implementation) in lab.dispatched() {
        let (call, expected) = typical(&mut lab, &method);
        let report = call_thunk(&mut lab.machine, &method, &call).unwrap();
        assert_eq!(report.result, Ok(expected), "{implementation}");
    }
}

#[test]
fn class_thunks_follow_the_receiver() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let derived = lab.object("Derived");
    let sum = lab.sum.clone();

    let on_base = call_thunk(&mut lab.machine, &sum, &LogicalCall::on(base).arg([6]).arg([7])).unwrap();
    let on_derived =
        call_thunk(&mut lab.machine, &sum, &LogicalCall::on(derived).arg([6]).arg([7])).unwrap();
    assert_eq!(on_base.result, Ok(vec![13]));
    assert_eq!(on_derived.result, Ok(vec![42]));
}

#[test]
fn static_methods_dispatch_on_the_metatype() {
    let mut lab = Lab::new(serial());
    let base = lab.metadata_of("Base");
    let derived = lab.metadata_of("Derived");
    let make = lab.make.clone();
    for metadata in [base, derived] {
        let report = call_thunk(&mut lab.machine, &make, &LogicalCall::on(metadata)).unwrap();
        assert_eq!(report.result, Ok(vec![77]));
    }
}

/// A protocol method with two plain arguments in witness slot 3.
#[test]
fn witness_slot_three_with_two_arguments() {
    use relay_abi::MetadataService;

    let mut lab = Lab::new(serial());
    assert_eq!(lab.machine.metadata().witness_index(&lab.combine).unwrap(), 3);

    let (object, metadata, table) = lab.gauge();
    let combine = lab.combine.clone();
    for (a, b) in [(0, 0), (1, 2), (7, 9), (u64::MAX / 20, 3)] {
        let call = LogicalCall::on(object)
            .arg([a])
            .arg([b])
            .with_witness(metadata, table);
        let thunk = call_thunk(&mut lab.machine, &combine, &call).unwrap();
        let direct = call_implementation(&mut lab.machine, "derived_combine", &call).unwrap();
        assert_eq!(thunk.result, Ok(vec![a * 10 + b]));
        assert_eq!(thunk.result, direct.result);
    }
}

#[test]
fn repeated_calls_reuse_one_body() {
    let mut lab = Lab::new(serial());
    let (object, ..) = lab.gauge();
    let extra = lab.extra.clone();
    call_thunk(&mut lab.machine, &extra, &LogicalCall::on(object)).unwrap();
    let emitted = lab.module.thunk_bodies_emitted();
    for _ in 0..3 {
        call_thunk(&mut lab.machine, &extra, &LogicalCall::on(object)).unwrap();
    }
    assert_eq!(lab.module.thunk_bodies_emitted(), emitted);
}
