//! Method lookup functions answer exactly as the runtime does, taking the
//! fast path only for entries no subclass in the module replaces.

use pretty_assertions::assert_eq;

use relay_abi::{MetadataService, PointerAuthSchema};
use relay_eval::{call_lookup, runtime_lookup, LogicalCall};
use relay_ir::{MethodReference, PtrAuthKey, VTableOffset};
use relay_thunk::ThunkOptions;

use crate::common::{serial, Lab};

/// Byte offset of `method`'s entry in a non-resilient class's metadata.
fn entry_offset(lab: &Lab, method: &MethodReference) -> u64 {
    match lab.machine.metadata().vtable_offset(method).unwrap() {
        VTableOffset::Fixed { word } => u64::from(word) * 8,
        VTableOffset::Resilient { .. } => panic!("expected a fixed offset"),
    }
}

fn agrees_with_runtime(options: ThunkOptions, resilient: bool) {
    let mut lab = if resilient {
        Lab::resilient(options)
    } else {
        Lab::new(options)
    };
    let base_methods = [
        &lab.sum, &lab.fetch, &lab.stream, &lab.pack, &lab.echo, &lab.hidden, &lab.make,
    ]
    .map(Clone::clone);
    for class in ["Base", "Derived"] {
        let metadata = lab.metadata_of(class);
        for method in &base_methods {
            let fast = call_lookup(&mut lab.machine, "Base", metadata, method).unwrap();
            let slow = runtime_lookup(&mut lab.machine, "Base", metadata, method).unwrap();
            assert_eq!(
                lab.machine.symbol_at(fast),
                lab.machine.symbol_at(slow),
                "{class}"
            );
            assert_eq!(fast, slow, "{class}");
        }
    }

    let derived = lab.metadata_of("Derived");
    let extra = lab.extra.clone();
    let fast = call_lookup(&mut lab.machine, "Derived", derived, &extra).unwrap();
    assert_eq!(lab.machine.symbol_at(fast), Some("derived_extra"));
}

#[test]
fn fixed_tables_agree() {
    agrees_with_runtime(serial(), false);
}

#[test]
fn resilient_tables_agree() {
    agrees_with_runtime(serial(), true);
}

#[test]
fn signed_tables_agree() {
    for key in [PtrAuthKey::IA, PtrAuthKey::DB] {
        agrees_with_runtime(serial().with_pointer_auth(PointerAuthSchema::new(key)), false);
    }
}

#[test]
fn overridden_entries_follow_the_metadata() {
    let mut lab = Lab::new(serial());
    let derived = lab.metadata_of("Derived");
    let base = lab.metadata_of("Base");
    let sum = lab.sum.clone();

    let on_derived = call_lookup(&mut lab.machine, "Base", derived, &sum).unwrap();
    let on_base = call_lookup(&mut lab.machine, "Base", base, &sum).unwrap();
    assert_eq!(lab.machine.symbol_at(on_derived), Some("derived_sum"));
    assert_eq!(lab.machine.symbol_at(on_base), Some("base_sum"));
}

#[test]
fn non_candidates_read_the_live_table() {
    let mut lab = Lab::new(serial());
    let base = lab.metadata_of("Base");
    let forged = lab.machine.address_of_symbol("base_make");

    for method in [lab.hidden.clone(), lab.sum.clone()] {
        let slot = base + entry_offset(&lab, &method);
        let original = lab.machine.memory().read(slot).unwrap();
        lab.machine.memory_mut().write(slot, forged).unwrap();

        let found = call_lookup(&mut lab.machine, "Base", base, &method).unwrap();
        assert_eq!(found, forged);
        lab.machine.memory_mut().write(slot, original).unwrap();
    }
}

#[test]
fn candidates_ignore_the_live_table() {
    let mut lab = Lab::new(serial());
    let base = lab.metadata_of("Base");
    let forged = lab.machine.address_of_symbol("base_make");
    let fetch = lab.fetch.clone();
    let slot = base + entry_offset(&lab, &fetch);
    lab.machine.memory_mut().write(slot, forged).unwrap();

    let fast = call_lookup(&mut lab.machine, "Base", base, &fetch).unwrap();
    let slow = runtime_lookup(&mut lab.machine, "Base", base, &fetch).unwrap();
    assert_eq!(lab.machine.symbol_at(fast), Some("base_fetch"));
    assert_eq!(slow, forged);
}

#[test]
fn looked_up_entries_are_callable() {
    let mut lab = Lab::new(serial());
    let derived = lab.metadata_of("Derived");
    let object = lab.object("Derived");
    let sum = lab.sum.clone();

    let entry = call_lookup(&mut lab.machine, "Base", derived, &sum).unwrap();
    let symbol = lab.machine.symbol_at(entry).unwrap();
    let report = relay_eval::call_implementation(
        &mut lab.machine,
        symbol,
        &LogicalCall::on(object).arg([6]).arg([7]),
    )
    .unwrap();
    assert_eq!(report.result, Ok(vec![42]));
}
