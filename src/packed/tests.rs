//! Property tests for the packed value conversions

use proptest::prelude::*;

use super::*;
use crate::errors::PackedError;

fn string_without_nul() -> impl Strategy<Value = String> {
    "[^\u{0}]{0,32}"
}

proptest! {
    #[test]
    fn prop_int_round_trip(value in any::<i64>()) {
        let slot = value.into_slot().unwrap();
        prop_assert_eq!(slot.as_arg().extract::<i64>().unwrap(), value);

        let mut ret = RetValue::new();
        ret.reset(value).unwrap();
        prop_assert_eq!(ret.get::<i64>().unwrap(), value);
    }

    #[test]
    fn prop_narrow_int_round_trip(value in any::<i16>()) {
        let slot = value.into_slot().unwrap();
        prop_assert_eq!(slot.as_arg().extract::<i16>().unwrap(), value);
        prop_assert_eq!(slot.as_arg().extract::<i64>().unwrap(), i64::from(value));
    }

    #[test]
    fn prop_float_round_trip(value in any::<f64>().prop_filter("NaN never compares equal", |v| !v.is_nan())) {
        let slot = value.into_slot().unwrap();
        prop_assert_eq!(slot.as_arg().extract::<f64>().unwrap(), value);
    }

    #[test]
    fn prop_string_round_trip(value in string_without_nul()) {
        let slot = value.as_str().into_slot().unwrap();
        prop_assert_eq!(slot.as_arg().extract::<String>().unwrap(), value.clone());

        let mut ret = RetValue::new();
        ret.reset(&value).unwrap();
        prop_assert_eq!(ret.get::<&str>().unwrap(), value.as_str());
    }

    #[test]
    fn prop_int_rejected_as_other_tags(value in any::<i64>()) {
        let arg = Arg::from_i64(value);
        prop_assert!(
            matches!(arg.extract::<f64>(), Err(PackedError::TypeMismatch { .. })),
            "Float64 accessor accepted an Int64 view"
        );
        prop_assert!(
            matches!(arg.extract::<&str>(), Err(PackedError::TypeMismatch { .. })),
            "String accessor accepted an Int64 view"
        );
        prop_assert!(
            matches!(arg.extract::<&PackedFunc>(), Err(PackedError::TypeMismatch { .. })),
            "Function accessor accepted an Int64 view"
        );
        prop_assert!(
            matches!(arg.extract::<Vec<i64>>(), Err(PackedError::TypeMismatch { .. })),
            "Sequence accessor accepted an Int64 view"
        );
    }

    #[test]
    fn prop_float_rejected_as_int(value in any::<f64>()) {
        let arg = Arg::from_f64(value);
        prop_assert!(
            matches!(
                arg.extract::<i64>(),
                Err(PackedError::TypeMismatch { expected: TypeTag::Int64, found: TypeTag::Float64 })
            ),
            "Int64 accessor accepted a Float64 view"
        );
    }

    #[test]
    fn prop_nested_sequence_round_trip(rows in prop::collection::vec(prop::collection::vec(any::<i64>(), 0..8), 0..8)) {
        let seq = ManagedSequence::from_slice(&rows).unwrap();
        prop_assert_eq!(seq.len(), rows.len());
        let back = Arg::from_sequence(&seq).extract::<Vec<Vec<i64>>>().unwrap();
        prop_assert_eq!(back, rows);
    }

    #[test]
    fn prop_string_sequence_round_trip(words in prop::collection::vec(string_without_nul(), 0..8)) {
        let mut ret = RetValue::new();
        ret.reset(&words).unwrap();
        prop_assert_eq!(ret.get::<Vec<String>>().unwrap(), words);
    }

    #[test]
    fn prop_triple_nesting_preserves_counts(
        cube in prop::collection::vec(
            prop::collection::vec(prop::collection::vec(any::<f64>().prop_filter("NaN", |v| !v.is_nan()), 0..4), 0..4),
            0..4,
        )
    ) {
        let seq = ManagedSequence::from_slice(&cube).unwrap();
        let back = seq.to_vec::<Vec<Vec<f64>>>().unwrap();
        prop_assert_eq!(back.len(), cube.len());
        for (outer, expected) in back.iter().zip(&cube) {
            prop_assert_eq!(outer.len(), expected.len());
        }
        prop_assert_eq!(back, cube);
    }
}
