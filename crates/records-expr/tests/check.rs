mod common;

use common::{problems, type_of};
use pretty_assertions::assert_eq;
use records_expr::QuickFix;

#[test]
fn literal_and_column_types() {
    assert_eq!(type_of("@column Price"), "Number{USD}");
    assert_eq!(type_of("@entire Item"), "[Text]");
    assert_eq!(type_of("@column Paid"), "Optional(Boolean)");
    assert_eq!(type_of("@column Date"), "DateYMD");
    assert_eq!(type_of("(a: 1, b: \"x\")#b"), "Text");
    assert_eq!(type_of("type{Number{m}}"), "Type(Number{m})");
}

#[test]
fn units_flow_through_arithmetic() {
    assert_eq!(type_of("@column Price * @column Quantity"), "Number{USD}");
    assert_eq!(type_of("@column Price / 2{s}"), "Number{USD/s}");
    assert_eq!(type_of("sum(@entire Price) + 1{USD}"), "Number{USD}");
    assert_eq!(type_of("apply_each([1, 2], ? * 2{m})"), "[Number{m}]");
    assert_eq!(type_of("convert_unit(unit{km}, 1500{m})"), "Number{km}");

    let found = problems("@column Price + 1{m}");
    assert_eq!(found.len(), 1);
    assert!(found[0].message.contains("USD"), "{}", found[0].message);
}

#[test]
fn unit_powers_must_stay_in_range() {
    assert_eq!(type_of("(2{m} ^ 2) ^ 3"), "Number{m^6}");
    for src in [
        "(2{m} ^ 2) ^ 2000000000",
        "2{m} ^ 2000000000 * 2{m} ^ 2000000000",
        "2{m} ^ 2000000000 / 2{m} ^ -2000000000",
    ] {
        let found = problems(src);
        assert_eq!(found.len(), 1, "{src}: {found:?}");
        assert_eq!(found[0].message, "unit power too large");
    }
}

#[test]
fn result_types_can_come_from_context() {
    assert_eq!(type_of("from_text(\"12\") + 1"), "Number");
    assert_eq!(type_of("from_text(\"x\") :: type{Text}"), "Text");
    let found = problems("from_text(\"12\")");
    assert_eq!(found.len(), 1);
}

#[test]
fn unknown_columns_suggest_close_names() {
    let found = problems("@column Prise * 2");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].message, "unknown column: Prise");
    assert_eq!(
        found[0].quick_fixes,
        vec![QuickFix {
            title: "use Price".to_string(),
            replacement: "@column Price".to_string(),
        }]
    );
    assert_eq!(found[0].span.start, 0);
}

#[test]
fn shared_tags_need_their_type_named() {
    let found = problems("Red");
    assert_eq!(found.len(), 1);
    let replacements: Vec<_> = found[0]
        .quick_fixes
        .iter()
        .map(|fix| fix.replacement.as_str())
        .collect();
    assert_eq!(replacements, vec!["Colour\\Red", "Light\\Red"]);

    assert_eq!(type_of("Colour\\Red"), "Colour");
    assert_eq!(type_of("[Green, Colour\\Red]"), "[Colour]");
    assert_eq!(type_of("@if Amber = Light\\Red @then 1 @else 0 @endif"), "Number");
}

#[test]
fn type_classes_reject_functions() {
    assert_eq!(type_of("maximum(@entire Date)"), "DateYMD");
    problems("maximum([@function(x) x + 1 @endfunction])");
    problems("contains([abs], abs)");
    problems("@function(x) x @endfunction = @function(y) y @endfunction");
}

#[test]
fn patterns_bind_names_for_their_branch() {
    assert_eq!(
        type_of("@match @column Paid @case Is(_b) @then b @case None @then false @endmatch"),
        "Boolean"
    );
    assert_eq!(type_of("@if @column Paid =~ Is(_b) & b @then 1 @else 0 @endif"), "Number");
    // The binding is not visible in the other branch.
    problems("@if @column Paid =~ Is(_b) @then 1 @else @if b @then 2 @else 3 @endif @endif");
    problems("_x + 1");
    problems("1 + ?");
    let found = problems("apply_each([(a: 1, b: 0)], ?#a + 1)");
    assert!(
        found.iter().any(|problem| problem.message.contains("whole argument")),
        "{found:?}"
    );
}

#[test]
fn definitions_are_checked_in_order() {
    assert_eq!(
        type_of("@define x :: type{Number{m}}, x = 5{m}, y = x * x @then y @enddefine"),
        "Number{m^2}"
    );
    problems("@define x :: type{Text}, x = 5 @then x @enddefine");
    problems("@define y = x, x = 1 @then y @enddefine");
}

#[test]
fn every_problem_is_reported() {
    let found = problems("nonsense(1) + @column Nowhere + abs(\"a\")");
    assert_eq!(found.len(), 3, "{found:?}");
}
