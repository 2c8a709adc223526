// tests/property_channel.rs

use std::sync::atomic::{AtomicU32, Ordering};

use forkpool::channel::{SlotFlags, ShmChannel};
use forkpool::value::Value;
use forkpool_test_utils::unique_namespace;
use proptest::num::f64::{INFINITE, NEGATIVE, NORMAL, POSITIVE, SUBNORMAL, ZERO};
use proptest::prelude::*;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (POSITIVE | NEGATIVE | NORMAL | SUBNORMAL | ZERO).prop_map(Value::Float),
        any::<String>().prop_map(Value::Str),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    let nested = leaf().prop_recursive(3, 24, 6, |inner| {
        prop::collection::vec(inner, 0..6).prop_map(Value::Array)
    });
    prop_oneof![
        nested,
        (POSITIVE | NEGATIVE | NORMAL | SUBNORMAL | ZERO | INFINITE).prop_map(Value::Float),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn values_survive_the_channel(v in value(), offset in any::<u16>()) {
        let shm = ShmChannel::new(unique_namespace("prop"));
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);

        let written = shm.write(id, offset, &v, SlotFlags::empty()).unwrap();
        prop_assert!(written >= 16);

        let (read, read_offset) = shm.read(id, true).unwrap();
        prop_assert_eq!(read, v);
        prop_assert_eq!(read_offset, offset);
        prop_assert!(!shm.exists(id));
    }
}
