use std::cmp::Ordering;

use proptest::prelude::*;
use records_model::{
    compare_values, load_value, save_value, DataType, Number, TagType, TaggedValue, TypeId, Value,
};
use rust_decimal::Decimal;

fn number() -> impl Strategy<Value = Number> {
    prop_oneof![
        (-1_000i64..1_000).prop_map(Number::Int),
        (-100_000i64..100_000, 0u32..4)
            .prop_map(|(m, scale)| Number::Decimal(Decimal::new(m, scale))),
    ]
}

fn optional_number_type() -> DataType {
    DataType::Tagged {
        name: TypeId::new("Maybe").unwrap(),
        args: Vec::new(),
        tags: vec![
            TagType::new("Nothing", None),
            TagType::new("Just", Some(DataType::number())),
        ],
    }
}

/// Values of type `[Maybe]`, where `Maybe = Nothing | Just(Number)`.
fn list_value() -> impl Strategy<Value = Value> {
    let tagged = prop_oneof![
        Just(Value::Tagged(TaggedValue::bare(0))),
        number().prop_map(|n| Value::Tagged(TaggedValue::with_inner(1, Value::Number(n)))),
    ];
    prop::collection::vec(tagged, 0..5).prop_map(Value::list)
}

fn list_type() -> DataType {
    DataType::Array(Box::new(optional_number_type()))
}

proptest! {
    #[test]
    fn compare_is_reflexive_and_antisymmetric(a in list_value(), b in list_value()) {
        prop_assert_eq!(compare_values(&a, &a).unwrap(), Ordering::Equal);
        let ab = compare_values(&a, &b).unwrap();
        let ba = compare_values(&b, &a).unwrap();
        prop_assert_eq!(ab, ba.reverse());
    }

    #[test]
    fn compare_is_transitive(a in list_value(), b in list_value(), c in list_value()) {
        let mut sorted = vec![a, b, c];
        sorted.sort_by(|x, y| compare_values(x, y).unwrap());
        prop_assert_ne!(compare_values(&sorted[0], &sorted[1]).unwrap(), Ordering::Greater);
        prop_assert_ne!(compare_values(&sorted[1], &sorted[2]).unwrap(), Ordering::Greater);
        prop_assert_ne!(compare_values(&sorted[0], &sorted[2]).unwrap(), Ordering::Greater);
    }

    #[test]
    fn numeric_order_ignores_representation(i in -10_000i64..10_000, scale in 0u32..5) {
        let int = Value::Number(Number::Int(i));
        let dec = Value::Number(Number::Decimal(Decimal::new(i * 10i64.pow(scale), scale)));
        prop_assert_eq!(compare_values(&int, &dec).unwrap(), Ordering::Equal);
    }

    #[test]
    fn saved_values_reload_equal(value in list_value()) {
        let ty = list_type();
        let saved = save_value(&value, &ty).unwrap();
        let loaded = load_value(&ty, &saved).unwrap();
        prop_assert_eq!(compare_values(&value, &loaded).unwrap(), Ordering::Equal);
        prop_assert_eq!(save_value(&loaded, &ty).unwrap(), saved);
    }
}
