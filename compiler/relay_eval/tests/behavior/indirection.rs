//! Values travel through registers, spilled memory and caller addresses
//! alike, and the thunk never changes what the implementation observes.

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use relay_eval::{call_implementation, call_thunk, LogicalCall};

use crate::common::{serial, Lab};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Small integers are truncated to their declared width on the way in.
    #[test]
    fn narrow_arguments_are_truncated(a in any::<u64>(), b in any::<u64>()) {
        let mut lab = Lab::new(serial());
        let base = lab.object("Base");
        let sum = lab.sum.clone();
        let call = LogicalCall::on(base).arg([a]).arg([b]);

        let thunk = call_thunk(&mut lab.machine, &sum, &call).unwrap();
        let direct = call_implementation(&mut lab.machine, "base_sum", &call).unwrap();
        let expected = (a & 0xffff_ffff) + (b & 0xff);
        prop_assert_eq!(&thunk.result, &Ok(vec![expected]));
        prop_assert_eq!(thunk.result, direct.result);
    }

    /// A six-word tuple exceeds the register budget both as argument and
    /// result.
    #[test]
    fn wide_values_round_trip_through_memory(
        head in 1u64..,
        tail in proptest::collection::vec(any::<u64>(), 5),
    ) {
        let mut lab = Lab::new(serial());
        let base = lab.object("Base");
        let pack = lab.pack.clone();
        let mut words = vec![head];
        words.extend(&tail);
        let call = LogicalCall::on(base).arg(words);

        let thunk = call_thunk(&mut lab.machine, &pack, &call).unwrap();
        let direct = call_implementation(&mut lab.machine, "base_pack", &call).unwrap();
        let expected: Vec<u64> = tail.iter().rev().copied().collect();
        prop_assert_eq!(&thunk.result, &Ok(expected));
        prop_assert_eq!(&thunk.result, &direct.result);
        prop_assert!(thunk.indirect_return.is_some());
        prop_assert!(thunk.spills_drained(&lab.machine));
        prop_assert!(direct.spills_drained(&lab.machine));
    }

    #[test]
    fn wide_witness_values_round_trip(words in proptest::collection::vec(any::<u64>(), 6)) {
        let mut lab = Lab::new(serial());
        let (object, metadata, table) = lab.gauge();
        let blob = lab.blob.clone();
        let call = LogicalCall::on(object).arg(words.clone()).with_witness(metadata, table);

        let thunk = call_thunk(&mut lab.machine, &blob, &call).unwrap();
        let expected: Vec<u64> = words.iter().map(|w| w.wrapping_add(1)).collect();
        prop_assert_eq!(&thunk.result, &Ok(expected));
        prop_assert!(thunk.spills_drained(&lab.machine));
    }
}

#[test]
fn spilled_arguments_are_consumed_once() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let pack = lab.pack.clone();
    let call = LogicalCall::on(base).arg([1, 2, 3, 4, 5, 6]);

    let report = call_thunk(&mut lab.machine, &pack, &call).unwrap();
    assert_eq!(report.spilled.len(), 6);
    for &addr in &report.spilled {
        assert!(lab.machine.memory().is_drained(addr));
    }
}

#[test]
fn address_only_values_are_left_in_place() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let echo = lab.echo.clone();
    let value = lab.machine.memory_mut().alloc(16);
    lab.machine.memory_mut().write_words(value, &[3, 4]).unwrap();
    let call = LogicalCall::on(base)
        .arg_address(value)
        .binding(0x5EED)
        .with_result_words(2);

    let report = call_thunk(&mut lab.machine, &echo, &call).unwrap();
    assert_eq!(report.result, Ok(vec![3, 4]));
    assert!(report.spilled.is_empty());
    assert_eq!(lab.machine.memory().read_words(value, 2).unwrap(), vec![3, 4]);
}

#[test]
fn generic_bindings_are_required() {
    let mut lab = Lab::new(serial());
    let base = lab.object("Base");
    let echo = lab.echo.clone();
    let value = lab.machine.memory_mut().alloc(16);
    let call = LogicalCall::on(base).arg_address(value).with_result_words(2);
    assert!(call_thunk(&mut lab.machine, &echo, &call).is_err());
}
