//! Writes expressions, types and units back to source text.
//!
//! Saving is the inverse of parsing: `parse_expression(&save_expression(&e)) == e` for every
//! parsed `e`, and re-saving the result gives the same text. Brackets are added exactly where
//! the operator levels require them.

use records_model::escape::{quote, quoted_if_needed};
use records_model::{ColumnId, DataType, TableId};

use crate::ast::{AddSubtractOp, Definition, ExprKind, Expression, MatchClause};
use crate::type_expr::{TypeExpression, TypeExpressionArg, UnitExpression};

/// Supplies the current names of tables and columns when an expression is saved after a
/// rename.
pub trait ColumnRenames {
    fn table(&self, table: &TableId) -> TableId {
        table.clone()
    }

    fn column(&self, _table: Option<&TableId>, column: &ColumnId) -> ColumnId {
        column.clone()
    }
}

/// Saves every name as it was parsed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRenames;

impl ColumnRenames for NoRenames {}

pub fn save_expression(expression: &Expression) -> String {
    save_expression_with_renames(expression, &NoRenames)
}

pub fn save_expression_with_renames(
    expression: &Expression,
    renames: &dyn ColumnRenames,
) -> String {
    Saver { renames }.save(expression)
}

pub fn save_unit_expression(unit: &UnitExpression) -> String {
    let bracketed = |inner: &UnitExpression, needed: bool| {
        let text = save_unit_expression(inner);
        if needed {
            format!("({text})")
        } else {
            text
        }
    };
    match unit {
        UnitExpression::Scalar => "1".to_string(),
        UnitExpression::Single(name) => name.clone(),
        UnitExpression::Var(name) => format!("@unitvar {name}"),
        UnitExpression::Times(factors) => factors
            .iter()
            .map(|factor| {
                bracketed(
                    factor,
                    matches!(factor, UnitExpression::Times(_) | UnitExpression::Divide(..)),
                )
            })
            .collect::<Vec<_>>()
            .join("*"),
        UnitExpression::Divide(numerator, denominator) => format!(
            "{}/{}",
            bracketed(numerator, matches!(**numerator, UnitExpression::Divide(..))),
            bracketed(denominator, matches!(**denominator, UnitExpression::Divide(..)))
        ),
        UnitExpression::Raise(base, power) => format!(
            "{}^{power}",
            bracketed(
                base,
                matches!(
                    **base,
                    UnitExpression::Times(_)
                        | UnitExpression::Divide(..)
                        | UnitExpression::Raise(..)
                )
            )
        ),
    }
}

pub fn save_type_expression(ty: &TypeExpression) -> String {
    let join = |items: Vec<String>| items.join(", ");
    match ty {
        TypeExpression::Number(None) => "Number".to_string(),
        TypeExpression::Number(Some(unit)) => format!("Number{{{}}}", save_unit_expression(unit)),
        TypeExpression::Text => "Text".to_string(),
        TypeExpression::Boolean => "Boolean".to_string(),
        TypeExpression::Date(kind) => kind.type_name().to_string(),
        TypeExpression::Named { name, args } if args.is_empty() => quoted_if_needed(name),
        TypeExpression::Named { name, args } => format!(
            "{}({})",
            quoted_if_needed(name),
            join(
                args.iter()
                    .map(|arg| match arg {
                        TypeExpressionArg::Type(t) => save_type_expression(t),
                        TypeExpressionArg::Unit(u) => format!("{{{}}}", save_unit_expression(u)),
                    })
                    .collect()
            )
        ),
        TypeExpression::TypeVar(name) => format!("@typevar {name}"),
        TypeExpression::Tuple(members) => format!(
            "({})",
            join(members.iter().map(save_type_expression).collect())
        ),
        TypeExpression::Record(fields) => format!(
            "({})",
            join(
                fields
                    .iter()
                    .map(|(name, t)| {
                        format!("{}: {}", quoted_if_needed(name), save_type_expression(t))
                    })
                    .collect()
            )
        ),
        TypeExpression::Array(element) => format!("[{}]", save_type_expression(element)),
    }
}

/// The type expression text of a concrete type, as written in documents.
pub fn save_data_type(data_type: &DataType) -> String {
    save_type_expression(&TypeExpression::from_data_type(data_type))
}

struct Saver<'r> {
    renames: &'r dyn ColumnRenames,
}

impl Saver<'_> {
    /// `child` as an operand of an operator at `parent_level`.
    fn operand(&self, child: &Expression, parent_level: u8) -> String {
        let text = self.save(child);
        match child.kind.operator_level() {
            Some(level) if level <= parent_level => format!("({text})"),
            _ => text,
        }
    }

    /// `child` followed by a call or field access.
    fn postfix_target(&self, child: &Expression) -> String {
        let text = self.save(child);
        if child.kind.operator_level().is_some() {
            format!("({text})")
        } else {
            text
        }
    }

    fn join_operands(&self, operands: &[Expression], level: u8, separator: &str) -> String {
        operands
            .iter()
            .map(|operand| self.operand(operand, level))
            .collect::<Vec<_>>()
            .join(separator)
    }

    fn join_items(&self, items: &[Expression]) -> String {
        items
            .iter()
            .map(|item| self.save(item))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn chain<'o>(
        &self,
        operands: &[Expression],
        level: u8,
        mut separator: impl FnMut(usize) -> &'o str,
    ) -> String {
        let mut out = String::new();
        for (i, operand) in operands.iter().enumerate() {
            if i > 0 {
                out.push(' ');
                out.push_str(separator(i - 1));
                out.push(' ');
            }
            out.push_str(&self.operand(operand, level));
        }
        out
    }

    fn save_column(&self, table: Option<&TableId>, column: &ColumnId, whole: bool) -> String {
        let keyword = if whole { "@entire" } else { "@column" };
        let column_name = self.renames.column(table, column);
        match table {
            Some(table) => format!(
                "{keyword} {}\\{}",
                quoted_if_needed(self.renames.table(table).raw()),
                quoted_if_needed(column_name.raw())
            ),
            None => format!("{keyword} {}", quoted_if_needed(column_name.raw())),
        }
    }

    fn save_clause(&self, clause: &MatchClause) -> String {
        let mut out = String::from("@case");
        for (i, pattern) in clause.patterns.iter().enumerate() {
            if i > 0 {
                out.push_str(" @orcase");
            }
            out.push(' ');
            out.push_str(&self.save(&pattern.pattern));
            if let Some(guard) = &pattern.guard {
                out.push_str(" @given ");
                out.push_str(&self.save(guard));
            }
        }
        out.push_str(" @then ");
        out.push_str(&self.save(&clause.outcome));
        out
    }

    fn save_definition(&self, definition: &Definition) -> String {
        match definition {
            Definition::Bind { name, value } => format!("{name} = {}", self.operand(value, 3)),
            Definition::Annotate { name, type_expr } => {
                format!("{name} :: {}", self.operand(type_expr, 0))
            }
        }
    }

    fn save(&self, expression: &Expression) -> String {
        match &expression.kind {
            ExprKind::Number { value, unit: None } => value.to_string(),
            ExprKind::Number {
                value,
                unit: Some(unit),
            } => format!("{value}{{{}}}", save_unit_expression(unit)),
            ExprKind::Text(text) => quote(text),
            ExprKind::Boolean(b) => b.to_string(),
            ExprKind::Temporal(value) => {
                format!("{}{{{value}}}", value.kind().literal_keyword())
            }
            ExprKind::TypeLiteral(ty) => format!("type{{{}}}", save_type_expression(ty)),
            ExprKind::UnitLiteral(unit) => format!("unit{{{}}}", save_unit_expression(unit)),
            ExprKind::Column {
                table,
                column,
                whole,
            } => self.save_column(table.as_ref(), column, *whole),
            ExprKind::Ident {
                namespace: Some(namespace),
                name,
            } => format!("{namespace}\\{name}"),
            ExprKind::Ident {
                namespace: None,
                name,
            } => name.clone(),

            ExprKind::AddSubtract { operands, ops } => self.chain(operands, 5, |i| {
                match ops.get(i) {
                    Some(AddSubtractOp::Subtract) => "-",
                    _ => "+",
                }
            }),
            ExprKind::Times(operands) => self.join_operands(operands, 6, " * "),
            ExprKind::Divide(a, b) => format!("{} / {}", self.operand(a, 6), self.operand(b, 6)),
            ExprKind::Raise(a, b) => format!("{} ^ {}", self.operand(a, 7), self.operand(b, 7)),
            ExprKind::Comparison { operands, ops } => {
                self.chain(operands, 3, |i| ops.get(i).map_or("<", |op| op.symbol()))
            }
            ExprKind::Equal {
                operands,
                last_is_pattern,
            } => {
                let last = operands.len().saturating_sub(2);
                self.chain(operands, 3, |i| {
                    if *last_is_pattern && i == last {
                        "=~"
                    } else {
                        "="
                    }
                })
            }
            ExprKind::NotEqual(a, b) => {
                format!("{} <> {}", self.operand(a, 3), self.operand(b, 3))
            }
            ExprKind::And(operands) => self.join_operands(operands, 2, " & "),
            ExprKind::Or(operands) => self.join_operands(operands, 1, " | "),
            ExprKind::Concat(operands) => self.join_operands(operands, 4, " ; "),
            ExprKind::HasType(a, b) => format!("{} :: {}", self.operand(a, 0), self.operand(b, 0)),

            ExprKind::IfThenElse {
                condition,
                then_branch,
                else_branch,
            } => format!(
                "@if {} @then {} @else {} @endif",
                self.save(condition),
                self.save(then_branch),
                self.save(else_branch)
            ),
            ExprKind::Match { scrutinee, clauses } => {
                let mut out = format!("@match {}", self.save(scrutinee));
                for clause in clauses {
                    out.push(' ');
                    out.push_str(&self.save_clause(clause));
                }
                out.push_str(" @endmatch");
                out
            }
            ExprKind::Lambda { params, body } => format!(
                "@function({}) {} @endfunction",
                params.join(", "),
                self.save(body)
            ),
            ExprKind::Call { function, args } => {
                format!("{}({})", self.postfix_target(function), self.join_items(args))
            }
            ExprKind::Define { definitions, body } => format!(
                "@define {} @then {} @enddefine",
                definitions
                    .iter()
                    .map(|definition| self.save_definition(definition))
                    .collect::<Vec<_>>()
                    .join(", "),
                self.save(body)
            ),

            ExprKind::Record(fields) => format!(
                "({})",
                fields
                    .iter()
                    .map(|(name, value)| {
                        format!("{}: {}", quoted_if_needed(name), self.save(value))
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            ExprKind::Tuple(items) => format!("({})", self.join_items(items)),
            ExprKind::FieldAccess { record, field } => {
                format!("{}#{}", self.postfix_target(record), quoted_if_needed(field))
            }
            ExprKind::Array(items) => format!("[{}]", self.join_items(items)),

            ExprKind::ImplicitLambdaArg => "?".to_string(),
            ExprKind::MatchAnything => "_".to_string(),
            ExprKind::VarDecl(name) => format!("_{name}"),
            ExprKind::InvalidIdent(raw) => format!("@unfinished {}", quote(raw)),
            ExprKind::InvalidOperator {
                operands,
                operators,
            } => {
                let mut parts = Vec::with_capacity(operands.len() + operators.len());
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        parts.push(quote(operators.get(i - 1).map_or("", String::as_str)));
                    }
                    parts.push(self.save(operand));
                }
                format!("@invalidops({})", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_expression, parse_type_expression, parse_unit_expression};
    use pretty_assertions::assert_eq;

    fn resave(src: &str) -> String {
        save_expression(&parse_expression(src).unwrap())
    }

    #[test]
    fn brackets_only_where_levels_require() {
        assert_eq!(resave("(a + b) * c"), "(a + b) * c");
        assert_eq!(resave("a + (b * c)"), "a + b * c");
        assert_eq!(resave("(a * b) * c"), "(a * b) * c");
        assert_eq!(resave("(a = b) = c"), "(a = b) = c");
        assert_eq!(resave("(x / y)#field"), "(x / y)#field");
    }

    #[test]
    fn invalid_nodes_use_explicit_markers() {
        assert_eq!(resave("a * b / c"), "@invalidops(a, \"*\", b, \"/\", c)");
        assert_eq!(resave("1 +"), "1 + @unfinished \"\"");
        assert_eq!(resave("x !! y"), "@invalidops(x, \"!!\", y)");
        assert_eq!(resave("\"open"), "@unfinished \"^qopen\"");
    }

    #[test]
    fn column_names_are_quoted_when_needed_and_renamed() {
        struct Renamed;
        impl ColumnRenames for Renamed {
            fn column(&self, _table: Option<&TableId>, column: &ColumnId) -> ColumnId {
                if column.raw() == "Old" {
                    ColumnId::new("New Name").unwrap()
                } else {
                    column.clone()
                }
            }
        }
        let parsed = parse_expression("@column Old + @entire T\\Other").unwrap();
        assert_eq!(
            save_expression_with_renames(&parsed, &Renamed),
            "@column \"New Name\" + @entire T\\Other"
        );
    }

    #[test]
    fn units_and_types_resave_canonically() {
        let unit = parse_unit_expression("( m * s ) * kg / s ^ -2").unwrap();
        assert_eq!(save_unit_expression(&unit), "(m*s)*kg/s^-2");
        let ty = parse_type_expression("( a : [ Number{m} ] , \"b c\" : Optional( Text ) )")
            .unwrap();
        assert_eq!(
            save_type_expression(&ty),
            "(a: [Number{m}], \"b c\": Optional(Text))"
        );
    }

    #[test]
    fn keyword_forms_resave() {
        for src in [
            "@if x > 1 @then \"big\" @else \"small\" @endif",
            "@match v @case Is(_x) @given _x > 2 @orcase _ @then 1 @case None @then 0 @endmatch",
            "@function(x, y) x + y @endfunction(1, 2)",
            "@define x :: type{Number{m}}, x = 5{m}, y = (x = x) @then y @enddefine",
            "apply_each([1, 2], abs(?))",
            "(a: date{2020-01-02}, b: time{12:30:00})#a",
        ] {
            assert_eq!(resave(src), src);
        }
    }
}
