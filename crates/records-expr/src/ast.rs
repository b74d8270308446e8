use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use records_model::{ColumnId, Number, Span, TableId, TemporalValue};

use crate::type_expr::{TypeExpression, UnitExpression};

/// Identity of one parsed node. Fresh for every parse, so it never takes part in equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(0);

impl NodeId {
    pub fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A node of the expression tree. Trees are immutable once parsed; replacing a sub-expression
/// means building a new tree.
#[derive(Clone, Debug)]
pub struct Expression {
    pub kind: ExprKind,
    pub span: Span,
    pub id: NodeId,
}

impl Expression {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            id: NodeId::fresh(),
        }
    }

    /// Synthesised node with no source location.
    pub fn unlocated(kind: ExprKind) -> Self {
        Self::new(kind, Span::point(0))
    }

    /// Calls `visit` on each direct child, in source order.
    pub fn for_each_child<'a>(&'a self, visit: &mut dyn FnMut(&'a Expression)) {
        match &self.kind {
            ExprKind::Number { .. }
            | ExprKind::Text(_)
            | ExprKind::Boolean(_)
            | ExprKind::Temporal(_)
            | ExprKind::TypeLiteral(_)
            | ExprKind::UnitLiteral(_)
            | ExprKind::Column { .. }
            | ExprKind::Ident { .. }
            | ExprKind::ImplicitLambdaArg
            | ExprKind::MatchAnything
            | ExprKind::VarDecl(_)
            | ExprKind::InvalidIdent(_) => {}
            ExprKind::AddSubtract { operands, .. }
            | ExprKind::Comparison { operands, .. }
            | ExprKind::Equal { operands, .. }
            | ExprKind::InvalidOperator { operands, .. } => operands.iter().for_each(visit),
            ExprKind::Times(items)
            | ExprKind::And(items)
            | ExprKind::Or(items)
            | ExprKind::Concat(items)
            | ExprKind::Tuple(items)
            | ExprKind::Array(items) => items.iter().for_each(visit),
            ExprKind::Divide(a, b)
            | ExprKind::Raise(a, b)
            | ExprKind::NotEqual(a, b)
            | ExprKind::HasType(a, b) => {
                visit(a);
                visit(b);
            }
            ExprKind::IfThenElse {
                condition,
                then_branch,
                else_branch,
            } => {
                visit(condition);
                visit(then_branch);
                visit(else_branch);
            }
            ExprKind::Match { scrutinee, clauses } => {
                visit(scrutinee);
                for clause in clauses {
                    for pattern in &clause.patterns {
                        visit(&pattern.pattern);
                        if let Some(guard) = &pattern.guard {
                            visit(guard);
                        }
                    }
                    visit(&clause.outcome);
                }
            }
            ExprKind::Lambda { body, .. } => visit(body),
            ExprKind::Call { function, args } => {
                visit(function);
                args.iter().for_each(visit);
            }
            ExprKind::Define { definitions, body } => {
                for definition in definitions {
                    match definition {
                        Definition::Bind { value, .. } => visit(value),
                        Definition::Annotate { type_expr, .. } => visit(type_expr),
                    }
                }
                visit(body);
            }
            ExprKind::Record(fields) => fields.iter().for_each(|(_, value)| visit(value)),
            ExprKind::FieldAccess { record, .. } => visit(record),
        }
    }
}

/// Structural equality; spans and node ids are ignored.
impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddSubtractOp {
    Add,
    Subtract,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl ComparisonOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Less => "<",
            ComparisonOp::LessEqual => "<=",
            ComparisonOp::Greater => ">",
            ComparisonOp::GreaterEqual => ">=",
        }
    }

    pub fn is_ascending(self) -> bool {
        matches!(self, ComparisonOp::Less | ComparisonOp::LessEqual)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub pattern: Expression,
    pub guard: Option<Expression>,
}

/// `@case p1 @given g @orcase p2 @then outcome`
#[derive(Clone, Debug, PartialEq)]
pub struct MatchClause {
    pub patterns: Vec<Pattern>,
    pub outcome: Expression,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Definition {
    /// `name = value`
    Bind { name: String, value: Expression },
    /// `name :: type{...}`; applies to the next binding of `name`.
    Annotate { name: String, type_expr: Expression },
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::Bind { name, .. } | Definition::Annotate { name, .. } => name,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Number {
        value: Number,
        unit: Option<UnitExpression>,
    },
    Text(String),
    Boolean(bool),
    Temporal(TemporalValue),
    TypeLiteral(TypeExpression),
    UnitLiteral(UnitExpression),
    /// `@column Name`, or `@entire Name` when `whole` is set.
    Column {
        table: Option<TableId>,
        column: ColumnId,
        whole: bool,
    },
    /// A variable, function or tag name, optionally namespaced: `math\abs`.
    Ident {
        namespace: Option<String>,
        name: String,
    },

    /// One operator fewer than operands.
    AddSubtract {
        operands: Vec<Expression>,
        ops: Vec<AddSubtractOp>,
    },
    Times(Vec<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Raise(Box<Expression>, Box<Expression>),
    /// A chain that is all ascending (`<`, `<=`) or all descending (`>`, `>=`).
    Comparison {
        operands: Vec<Expression>,
        ops: Vec<ComparisonOp>,
    },
    /// `a = b = c`, or `a =~ pattern` when `last_is_pattern` is set.
    Equal {
        operands: Vec<Expression>,
        last_is_pattern: bool,
    },
    NotEqual(Box<Expression>, Box<Expression>),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Concat(Vec<Expression>),
    HasType(Box<Expression>, Box<Expression>),

    IfThenElse {
        condition: Box<Expression>,
        then_branch: Box<Expression>,
        else_branch: Box<Expression>,
    },
    Match {
        scrutinee: Box<Expression>,
        clauses: Vec<MatchClause>,
    },
    Lambda {
        params: Vec<String>,
        body: Arc<Expression>,
    },
    Call {
        function: Box<Expression>,
        args: Vec<Expression>,
    },
    Define {
        definitions: Vec<Definition>,
        body: Box<Expression>,
    },

    /// Fields in written order.
    Record(Vec<(String, Expression)>),
    Tuple(Vec<Expression>),
    FieldAccess {
        record: Box<Expression>,
        field: String,
    },
    Array(Vec<Expression>),

    /// `?`
    ImplicitLambdaArg,
    /// `_`
    MatchAnything,
    /// `_name`
    VarDecl(String),
    /// Unrecognised text, kept verbatim.
    InvalidIdent(String),
    /// Operators that cannot be combined, or unknown operator text. `operands` is one longer
    /// than `operators`.
    InvalidOperator {
        operands: Vec<Expression>,
        operators: Vec<String>,
    },
}

impl ExprKind {
    /// Operator level used for bracketing when saving: lower binds looser.
    pub fn operator_level(&self) -> Option<u8> {
        Some(match self {
            ExprKind::HasType(..) => 0,
            ExprKind::Or(_) => 1,
            ExprKind::And(_) => 2,
            ExprKind::Comparison { .. } | ExprKind::Equal { .. } | ExprKind::NotEqual(..) => 3,
            ExprKind::Concat(_) => 4,
            ExprKind::AddSubtract { .. } => 5,
            ExprKind::Times(_) | ExprKind::Divide(..) => 6,
            ExprKind::Raise(..) => 7,
            _ => return None,
        })
    }
}
