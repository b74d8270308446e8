use proptest::prelude::*;
use std::sync::Arc;

use records_expr::{
    parse_expression, parse_type_expression, parse_unit_expression, save_expression,
    AddSubtractOp, ComparisonOp, Definition, ExprKind, Expression, MatchClause, Pattern,
};
use records_model::Number;

use pretty_assertions::assert_eq;

fn resave(src: &str) -> String {
    save_expression(&parse_expression(src).unwrap())
}

#[test]
fn canonical_text_saves_unchanged() {
    for src in [
        "abs(true + false - 632 + @column Date) - 62 + \"hi\"",
        "@column Price * 2{m/s} >= 3{m/s}",
        "@entire Sales\\Price",
        "math\\abs(-2) ; \"x^q\"",
        "[1, 2, 3]",
        "(a: 1, b: (2, \"x\"))#b",
        "@match x @case (_a, 1) @orcase (_a, _) @then a @endmatch",
        "convert_unit(unit{km}, 1500{m})",
        "from_text(\"12\") :: type{Number}",
        "any(@entire Quantity, ? > 0) | false",
    ] {
        assert_eq!(resave(src), src);
    }
}

#[test]
fn spacing_and_redundant_brackets_are_normalised() {
    assert_eq!(resave("@column \"Card\" <> \"xxx\""), "@column Card <> \"xxx\"");
    assert!(matches!(
        parse_expression("@column \"Card\" <> \"xxx\"").unwrap().kind,
        ExprKind::NotEqual(..)
    ));
    assert_eq!(resave("  ( 1 + 2 )  *  3 "), "(1 + 2) * 3");
    assert_eq!(resave("f( a ,b )"), "f(a, b)");
    assert_eq!(resave("@column \"Unit Price\""), "@column \"Unit Price\"");
}

#[test]
fn invalid_input_survives_a_save() {
    for src in ["1 + ", "a < b > c", "x !! y", "\"open"] {
        let saved = resave(src);
        assert_eq!(resave(&saved), saved, "resaving {src}");
    }
}

fn node(kind: ExprKind) -> Expression {
    Expression::unlocated(kind)
}

fn ident(name: &str) -> Expression {
    node(ExprKind::Ident {
        namespace: None,
        name: name.to_string(),
    })
}

fn number(n: i64) -> Expression {
    node(ExprKind::Number {
        value: Number::from(n),
        unit: None,
    })
}

#[test]
fn malformed_nodes_parse_back_from_their_markers() {
    let cases = [
        (
            node(ExprKind::InvalidOperator {
                operands: vec![ident("a"), ident("b"), ident("c")],
                operators: vec!["*".to_string(), "/".to_string()],
            }),
            "@invalidops(a, \"*\", b, \"/\", c)",
        ),
        (
            node(ExprKind::InvalidOperator {
                operands: vec![
                    node(ExprKind::AddSubtract {
                        operands: vec![number(1), number(-2)],
                        ops: vec![AddSubtractOp::Subtract],
                    }),
                    node(ExprKind::Tuple(vec![ident("x"), ident("y")])),
                ],
                operators: vec![String::new()],
            }),
            "@invalidops(1 - -2, \"\", (x, y))",
        ),
        (
            node(ExprKind::AddSubtract {
                operands: vec![number(1), node(ExprKind::InvalidIdent(String::new()))],
                ops: vec![AddSubtractOp::Add],
            }),
            "1 + @unfinished \"\"",
        ),
        (
            node(ExprKind::Call {
                function: Box::new(ident("f")),
                args: vec![node(ExprKind::InvalidIdent("@nosuch".to_string()))],
            }),
            "f(@unfinished \"^anosuch\")",
        ),
        (
            node(ExprKind::FieldAccess {
                record: Box::new(node(ExprKind::InvalidOperator {
                    operands: vec![ident("x"), ident("y")],
                    operators: vec!["!!".to_string()],
                })),
                field: "a".to_string(),
            }),
            "@invalidops(x, \"!!\", y)#a",
        ),
    ];
    for (expression, text) in cases {
        let saved = save_expression(&expression);
        assert_eq!(saved, text);
        assert_eq!(parse_expression(&saved).unwrap(), expression);
    }

    // Raw text with quotes, braces and carets survives through its escaped form.
    for raw in ["\"open", "date{31-02}", "^q", "{", "a b"] {
        let expression = node(ExprKind::InvalidIdent(raw.to_string()));
        let saved = save_expression(&expression);
        assert_eq!(parse_expression(&saved).unwrap(), expression, "saved as {saved}");
    }
}

fn parsed(src: &str) -> Expression {
    parse_expression(src).unwrap()
}

fn leaf() -> impl Strategy<Value = Expression> {
    prop_oneof![
        (-1000i64..1000).prop_map(number),
        (
            -1000i64..1000,
            prop::sample::select(vec!["m", "m/s", "km^2", "1"]),
        )
            .prop_map(|(n, unit)| node(ExprKind::Number {
                value: Number::from(n),
                unit: Some(parse_unit_expression(unit).unwrap()),
            })),
        "[a-z ^\"@]{0,6}".prop_map(|s| node(ExprKind::Text(s))),
        any::<bool>().prop_map(|b| node(ExprKind::Boolean(b))),
        prop::sample::select(vec!["a", "x", "abs", "total"]).prop_map(ident),
        "[a-z {}\"^@]{0,5}".prop_map(|raw| node(ExprKind::InvalidIdent(raw))),
        prop::sample::select(vec![
            "date{2024-02-29}",
            "time{12:30:00}",
            "unit{m/s}",
            "@column Price",
            "@entire Sales\\Price",
            "type{[Number{m}]}",
            "?",
            "_",
            "_r",
        ])
        .prop_map(parsed),
    ]
}

fn type_literal() -> impl Strategy<Value = Expression> {
    prop::sample::select(vec!["Number", "Number{m/s}", "Text", "[Boolean]", "(a: DateYMD)"])
        .prop_map(|src| node(ExprKind::TypeLiteral(parse_type_expression(src).unwrap())))
}

fn comparison_ops(count: usize) -> impl Strategy<Value = Vec<ComparisonOp>> {
    (any::<bool>(), prop::collection::vec(any::<bool>(), count)).prop_map(|(ascending, strict)| {
        strict
            .into_iter()
            .map(|strict| match (ascending, strict) {
                (true, true) => ComparisonOp::Less,
                (true, false) => ComparisonOp::LessEqual,
                (false, true) => ComparisonOp::Greater,
                (false, false) => ComparisonOp::GreaterEqual,
            })
            .collect()
    })
}

fn operators(inner: BoxedStrategy<Expression>) -> BoxedStrategy<Expression> {
    let pair = || (inner.clone(), inner.clone());
    prop_oneof![
        prop::collection::vec(inner.clone(), 2..4).prop_map(|operands| {
            let ops = (1..operands.len())
                .map(|i| {
                    if i % 2 == 0 {
                        AddSubtractOp::Add
                    } else {
                        AddSubtractOp::Subtract
                    }
                })
                .collect();
            node(ExprKind::AddSubtract { operands, ops })
        }),
        prop::collection::vec(inner.clone(), 2..4).prop_map(|items| node(ExprKind::Times(items))),
        pair().prop_map(|(a, b)| node(ExprKind::Divide(Box::new(a), Box::new(b)))),
        pair().prop_map(|(a, b)| node(ExprKind::Raise(Box::new(a), Box::new(b)))),
        prop::collection::vec(inner.clone(), 2..4)
            .prop_map(|items| node(ExprKind::Concat(items))),
        (prop::collection::vec(inner.clone(), 2..4), any::<bool>()).prop_map(
            |(operands, last_is_pattern)| {
                node(ExprKind::Equal {
                    operands,
                    last_is_pattern,
                })
            }
        ),
        prop::collection::vec(inner.clone(), 2..4)
            .prop_flat_map(|operands| {
                let count = operands.len() - 1;
                (Just(operands), comparison_ops(count))
            })
            .prop_map(|(operands, ops)| node(ExprKind::Comparison { operands, ops })),
        pair().prop_map(|(a, b)| node(ExprKind::NotEqual(Box::new(a), Box::new(b)))),
        prop::collection::vec(inner.clone(), 2..4).prop_map(|items| node(ExprKind::Or(items))),
        prop::collection::vec(inner.clone(), 2..4).prop_map(|items| node(ExprKind::And(items))),
    ]
    .boxed()
}

fn malformed(inner: BoxedStrategy<Expression>) -> BoxedStrategy<Expression> {
    prop::collection::vec(inner, 1..4)
        .prop_flat_map(|operands| {
            let symbols = prop::sample::select(vec!["", "!!", "*", "/", "=~", "~"]);
            let operators = prop::collection::vec(symbols, operands.len() - 1);
            (Just(operands), operators)
        })
        .prop_map(|(operands, operators)| {
            node(ExprKind::InvalidOperator {
                operands,
                operators: operators.into_iter().map(str::to_string).collect(),
            })
        })
        .boxed()
}

fn field_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "total"]).prop_map(str::to_string)
}

fn structures(inner: BoxedStrategy<Expression>) -> BoxedStrategy<Expression> {
    prop_oneof![
        prop::collection::vec(inner.clone(), 2..4).prop_map(|items| node(ExprKind::Tuple(items))),
        prop::collection::vec(inner.clone(), 0..3).prop_map(|items| node(ExprKind::Array(items))),
        prop::collection::vec((field_name(), inner.clone()), 1..3)
            .prop_map(|fields| node(ExprKind::Record(fields))),
        (inner.clone(), field_name()).prop_map(|(record, field)| {
            node(ExprKind::FieldAccess {
                record: Box::new(record),
                field,
            })
        }),
        prop::collection::vec(inner.clone(), 1..3).prop_map(|args| {
            node(ExprKind::Call {
                function: Box::new(ident("f")),
                args,
            })
        }),
        (inner, type_literal())
            .prop_map(|(a, ty)| node(ExprKind::HasType(Box::new(a), Box::new(ty)))),
    ]
    .boxed()
}

fn definition(inner: BoxedStrategy<Expression>) -> impl Strategy<Value = Definition> {
    prop_oneof![
        (field_name(), inner).prop_map(|(name, value)| Definition::Bind { name, value }),
        (field_name(), type_literal())
            .prop_map(|(name, type_expr)| Definition::Annotate { name, type_expr }),
    ]
}

fn clause(inner: BoxedStrategy<Expression>) -> impl Strategy<Value = MatchClause> {
    let pattern = (inner.clone(), prop::option::of(inner.clone()))
        .prop_map(|(pattern, guard)| Pattern { pattern, guard });
    (prop::collection::vec(pattern, 1..3), inner)
        .prop_map(|(patterns, outcome)| MatchClause { patterns, outcome })
}

fn keyword_forms(inner: BoxedStrategy<Expression>) -> BoxedStrategy<Expression> {
    prop_oneof![
        (inner.clone(), inner.clone(), inner.clone()).prop_map(|(c, t, e)| {
            node(ExprKind::IfThenElse {
                condition: Box::new(c),
                then_branch: Box::new(t),
                else_branch: Box::new(e),
            })
        }),
        (inner.clone(), prop::collection::vec(clause(inner.clone()), 1..3)).prop_map(
            |(scrutinee, clauses)| {
                node(ExprKind::Match {
                    scrutinee: Box::new(scrutinee),
                    clauses,
                })
            }
        ),
        (
            prop::sample::subsequence(vec!["x", "y"], 0..=2),
            inner.clone(),
        )
            .prop_map(|(params, body)| {
                node(ExprKind::Lambda {
                    params: params.into_iter().map(str::to_string).collect(),
                    body: Arc::new(body),
                })
            }),
        (prop::collection::vec(definition(inner.clone()), 1..3), inner).prop_map(
            |(definitions, body)| {
                node(ExprKind::Define {
                    definitions,
                    body: Box::new(body),
                })
            }
        ),
    ]
    .boxed()
}

fn expression() -> impl Strategy<Value = Expression> {
    leaf().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            4 => operators(inner.clone()),
            3 => structures(inner.clone()),
            2 => keyword_forms(inner.clone()),
            1 => malformed(inner),
        ]
    })
}

proptest! {
    #[test]
    fn saved_expressions_parse_back(expression in expression()) {
        let saved = save_expression(&expression);
        let parsed = parse_expression(&saved).unwrap();
        prop_assert_eq!(&parsed, &expression, "saved as {}", saved);
        prop_assert_eq!(save_expression(&parsed), saved);
    }
}
