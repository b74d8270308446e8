use proptest::prelude::*;
use records_expr::types::{TypeArena, UnitExp};
use records_model::Unit;

fn unit() -> impl Strategy<Value = Unit> {
    prop::collection::vec((prop::sample::select(vec!["m", "s", "kg"]), -3i32..=3), 0..4).prop_map(
        |factors| {
            factors.into_iter().fold(Unit::scalar(), |unit, (name, power)| {
                unit.multiply(&Unit::single(name).raised_to(power))
            })
        },
    )
}

proptest! {
    #[test]
    fn a_variable_times_a_unit_is_solved_by_division(a in unit(), b in unit()) {
        let mut arena = TypeArena::new();
        let x = arena.fresh_unit();
        let left = x.multiply(&UnitExp::concrete(a.clone()));
        arena.unify_units(&left, &UnitExp::concrete(b.clone())).unwrap();
        prop_assert_eq!(arena.concrete_unit(&x), Some(b.divide(&a)));
    }

    #[test]
    fn squared_variables_take_the_root(a in unit()) {
        let mut arena = TypeArena::new();
        let x = arena.fresh_unit();
        let squared = UnitExp::concrete(a.raised_to(2));
        arena.unify_units(&x.raised_to(2), &squared).unwrap();
        prop_assert_eq!(arena.concrete_unit(&x), Some(a));
    }

    #[test]
    fn concrete_units_unify_only_when_equal(a in unit(), b in unit()) {
        let mut arena = TypeArena::new();
        let unified =
            arena.unify_units(&UnitExp::concrete(a.clone()), &UnitExp::concrete(b.clone()));
        prop_assert_eq!(unified.is_ok(), a == b);
    }

    #[test]
    fn unification_is_symmetric(a in unit(), b in unit()) {
        let mut left_first = TypeArena::new();
        let x = left_first.fresh_unit();
        let y = left_first.fresh_unit();
        let left = x.multiply(&UnitExp::concrete(a.clone()));
        let right = y.multiply(&UnitExp::concrete(b.clone()));
        left_first.unify_units(&left, &right).unwrap();
        let forwards = left_first.resolve_unit(&x.divide(&y));

        let mut right_first = TypeArena::new();
        let x = right_first.fresh_unit();
        let y = right_first.fresh_unit();
        let left = x.multiply(&UnitExp::concrete(a));
        let right = y.multiply(&UnitExp::concrete(b));
        right_first.unify_units(&right, &left).unwrap();
        let backwards = right_first.resolve_unit(&x.divide(&y));

        // Either way x/y must come out as the same concrete unit.
        prop_assert_eq!(forwards.as_concrete(), backwards.as_concrete());
        prop_assert!(forwards.as_concrete().is_some());
    }
}
