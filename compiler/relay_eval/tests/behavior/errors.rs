//! Thrown errors reach the caller's slot untouched, and nothing else is
//! written on the failure path.

use pretty_assertions::assert_eq;

use relay_eval::{call_implementation, call_thunk, LogicalCall};

use crate::common::{serial, Lab, FETCH_ERROR, PACK_ERROR};

#[test]
fn thrown_errors_reach_the_caller_slot() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let pack = lab.pack.clone();
    let call = LogicalCall::on(base).arg([0, 1, 2, 3, 4, 5]);

    let report = call_thunk(&mut lab.machine, &pack, &call).unwrap();
    assert_eq!(report.result, Err(PACK_ERROR));
    let slot = report.error_slot.unwrap();
    assert_eq!(lab.machine.memory().read(slot).unwrap(), PACK_ERROR);

    // The result destination stays untouched.
    let destination = report.indirect_return.unwrap();
    assert_eq!(lab.machine.memory().read_words(destination, 5).unwrap(), vec![0; 5]);
}

#[test]
fn thunk_and_direct_failures_agree() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let pack = lab.pack.clone();
    let call = LogicalCall::on(base).arg([0, 9, 9, 9, 9, 9]);

    let thunk = call_thunk(&mut lab.machine, &pack, &call).unwrap();
    let direct = call_implementation(&mut lab.machine, "base_pack", &call).unwrap();
    assert_eq!(thunk.result, direct.result);
    assert!(thunk.spills_drained(&lab.machine));
}

#[test]
fn async_errors_reach_the_caller_slot() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let fetch = lab.fetch.clone();

    let report = call_thunk(&mut lab.machine, &fetch, &LogicalCall::on(base).arg([0])).unwrap();
    assert_eq!(report.result, Err(FETCH_ERROR));
    assert!(report.frame.is_some());
    assert_eq!(
        lab.machine.memory().read(report.error_slot.unwrap()).unwrap(),
        FETCH_ERROR
    );
}

#[test]
fn success_leaves_the_slot_clear() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let (pack, fetch) = (lab.pack.clone(), lab.fetch.clone());

    let packed = call_thunk(&mut lab.machine, &pack, &LogicalCall::on(base).arg([1, 2, 3, 4, 5, 6]))
        .unwrap();
    assert_eq!(lab.machine.memory().read(packed.error_slot.unwrap()).unwrap(), 0);

    let fetched = call_thunk(&mut lab.machine, &fetch, &LogicalCall::on(base).arg([3])).unwrap();
    assert_eq!(fetched.result, Ok(vec![3, 4, 5, 6, 7, 8]));
    assert_eq!(lab.machine.memory().read(fetched.error_slot.unwrap()).unwrap(), 0);
}

#[test]
fn non_throwing_methods_have_no_slot() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let sum = lab.sum.clone();
    let report = call_thunk(&mut lab.machine, &sum, &LogicalCall::on(base).arg([1]).arg([2])).unwrap();
    assert_eq!(report.error_slot, None);
}
