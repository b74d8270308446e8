//! Type and unit checking of expression trees.
//!
//! Every node gets a [`TypeExp`] whose variables live in one [`TypeArena`] for the whole pass.
//! A node that cannot be typed records a [`TypeProblem`] and yields `None`; its parent carries
//! on with its other children so that one pass reports every independent problem.
//!
//! Checking also settles what each identifier refers to and which concrete types each standard
//! function is used at. The evaluator reads both from [`CheckInfo`] instead of working them out
//! again.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use records_model::{DataType, Span, TypeId, TypeManager, TYPE_TYPE, UNIT_TYPE};
use serde::{Deserialize, Serialize};

use crate::ast::{Definition, ExprKind, Expression, NodeId, Pattern};
use crate::column::{ColumnLookup, ColumnReference};
use crate::functions::{FunctionDefinition, FunctionLookup, TypeBindings};
use crate::resolve::{resolve_global, Resolution, ResolveError};
use crate::scope::Scope;
use crate::types::{InstantiatedVars, TypeArena, TypeClass, TypeExp, TypeExpArg, UnitExp};

/// A suggested edit that would fix a problem: replace the problem's span with `replacement`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickFix {
    pub title: String,
    pub replacement: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeProblem {
    pub span: Span,
    pub message: String,
    pub quick_fixes: Vec<QuickFix>,
}

/// Receives problems as the checker finds them.
pub trait ErrorRecorder {
    fn record(&mut self, problem: TypeProblem);
}

#[derive(Clone, Debug, Default)]
pub struct CollectingRecorder {
    pub problems: Vec<TypeProblem>,
}

impl ErrorRecorder for CollectingRecorder {
    fn record(&mut self, problem: TypeProblem) {
        self.problems.push(problem);
    }
}

/// The registries an expression is checked and evaluated against. Owned by one document.
#[derive(Clone)]
pub struct CheckContext {
    pub types: Arc<TypeManager>,
    pub columns: Arc<dyn ColumnLookup>,
    pub functions: Arc<FunctionLookup>,
}

impl CheckContext {
    pub fn new(
        types: Arc<TypeManager>,
        columns: Arc<dyn ColumnLookup>,
        functions: Arc<FunctionLookup>,
    ) -> Self {
        Self {
            types,
            columns,
            functions,
        }
    }
}

/// What checking learnt about individual nodes.
#[derive(Clone, Debug, Default)]
pub struct CheckInfo {
    pub(crate) resolutions: HashMap<NodeId, Resolution>,
    /// Keyed by the node naming the function.
    pub(crate) bindings: HashMap<NodeId, TypeBindings>,
    /// Operator and call nodes that take `?` operands, with the ids of those operands in order.
    pub(crate) implicit_lambdas: HashMap<NodeId, Vec<NodeId>>,
    /// Pattern nodes that match a tag, `Tag` or `Tag(inner)`.
    pub(crate) tag_patterns: HashSet<NodeId>,
}

impl CheckInfo {
    pub fn resolution(&self, node: NodeId) -> Option<&Resolution> {
        self.resolutions.get(&node)
    }

    pub fn bindings(&self, node: NodeId) -> Option<&TypeBindings> {
        self.bindings.get(&node)
    }
}

/// An expression that checked cleanly, ready to evaluate.
#[derive(Clone, Debug)]
pub struct TypedExpression {
    pub expression: Arc<Expression>,
    pub data_type: DataType,
    pub info: Arc<CheckInfo>,
}

/// Checks `expression` and works out its concrete type. Returns `None` when any problem was
/// recorded.
pub fn check_expression(
    expression: &Expression,
    ctx: &CheckContext,
    recorder: &mut dyn ErrorRecorder,
) -> Option<TypedExpression> {
    let mut checker = Checker::new(ctx, recorder);
    let ty = checker.check(expression, &Scope::new());
    checker.settle_bindings();
    let ty = ty?;
    if checker.failed {
        return None;
    }
    match checker.arena.to_concrete(&ty, &ctx.types) {
        Ok(data_type) => Some(TypedExpression {
            expression: Arc::new(expression.clone()),
            data_type,
            info: Arc::new(checker.info),
        }),
        Err(err) => {
            checker.problem(expression.span, err.message);
            None
        }
    }
}

/// Scope key for the value of the `?` operand `id`.
pub(crate) fn implicit_key(id: NodeId) -> String {
    format!("?{id}")
}

/// The `?` operands that turn `expression` into a function.
fn implicit_args(expression: &Expression) -> Vec<NodeId> {
    let is_placeholder = |e: &Expression| matches!(e.kind, ExprKind::ImplicitLambdaArg);
    match &expression.kind {
        ExprKind::Call { args, .. } => args
            .iter()
            .filter(|arg| is_placeholder(*arg))
            .map(|arg| arg.id)
            .collect(),
        kind if kind.operator_level().is_some() => {
            let mut ids = Vec::new();
            expression.for_each_child(&mut |child| {
                if is_placeholder(child) {
                    ids.push(child.id);
                }
            });
            ids
        }
        _ => Vec::new(),
    }
}

fn builtin_type(name: &str) -> TypeId {
    TypeId::new(name).unwrap_or_else(|_| unreachable!("builtin type name"))
}

/// The type of `type{...}` literals whose type is `of`.
fn type_of_type(of: TypeExp) -> TypeExp {
    TypeExp::Tagged {
        name: builtin_type(TYPE_TYPE),
        args: vec![TypeExpArg::Type(of)],
    }
}

fn type_of_unit(of: UnitExp) -> TypeExp {
    TypeExp::Tagged {
        name: builtin_type(UNIT_TYPE),
        args: vec![TypeExpArg::Unit(of)],
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Up to three available references spelled like `wanted`, closest first.
fn similar_columns(
    wanted: &ColumnReference,
    available: Vec<ColumnReference>,
) -> Vec<ColumnReference> {
    let wanted_text = wanted.to_string().to_lowercase();
    let limit = (wanted_text.chars().count() / 3).max(2);
    let mut scored: Vec<(usize, ColumnReference)> = available
        .into_iter()
        .map(|candidate| {
            let distance = edit_distance(&wanted_text, &candidate.to_string().to_lowercase());
            (distance, candidate)
        })
        .filter(|(distance, _)| *distance <= limit)
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    scored.into_iter().take(3).map(|(_, c)| c).collect()
}

/// A standard function use whose type variables are read back once the pass is over.
struct PendingBindings {
    node: NodeId,
    span: Span,
    function: String,
    vars: InstantiatedVars,
    required: Vec<&'static str>,
}

struct Checker<'a> {
    ctx: &'a CheckContext,
    recorder: &'a mut dyn ErrorRecorder,
    arena: TypeArena,
    info: CheckInfo,
    pending: Vec<PendingBindings>,
    failed: bool,
}

impl<'a> Checker<'a> {
    fn new(ctx: &'a CheckContext, recorder: &'a mut dyn ErrorRecorder) -> Self {
        Self {
            ctx,
            recorder,
            arena: TypeArena::new(),
            info: CheckInfo::default(),
            pending: Vec::new(),
            failed: false,
        }
    }

    fn problem_with(
        &mut self,
        span: Span,
        message: impl Into<String>,
        quick_fixes: Vec<QuickFix>,
    ) -> Option<TypeExp> {
        self.failed = true;
        self.recorder.record(TypeProblem {
            span,
            message: message.into(),
            quick_fixes,
        });
        None
    }

    fn problem(&mut self, span: Span, message: impl Into<String>) -> Option<TypeExp> {
        self.problem_with(span, message, Vec::new())
    }

    /// Unifies and records a problem at `span` on failure.
    fn unify_at(&mut self, span: Span, expected: &TypeExp, found: &TypeExp) -> bool {
        match self.arena.unify(expected, found) {
            Ok(()) => true,
            Err(err) => {
                self.problem(span, err.to_string());
                false
            }
        }
    }

    fn require_at(&mut self, span: Span, ty: &TypeExp, class: TypeClass) -> bool {
        match self.arena.require_class(ty, class) {
            Ok(()) => true,
            Err(err) => {
                self.problem(span, err.to_string());
                false
            }
        }
    }

    fn expect(
        &mut self,
        expression: &Expression,
        expected: &TypeExp,
        found: Option<TypeExp>,
    ) -> bool {
        match found {
            Some(found) => self.unify_at(expression.span, expected, &found),
            None => false,
        }
    }

    fn check(&mut self, expression: &Expression, scope: &Scope<TypeExp>) -> Option<TypeExp> {
        let args = implicit_args(expression);
        if args.is_empty() {
            return self.check_kind(expression, scope);
        }
        let mut inner = scope.clone();
        let mut params = Vec::with_capacity(args.len());
        for id in &args {
            let param = self.arena.fresh();
            inner = inner.with(implicit_key(*id), param.clone());
            params.push(param);
        }
        self.info.implicit_lambdas.insert(expression.id, args);
        let result = self.check_kind(expression, &inner)?;
        Some(TypeExp::function(params, result))
    }

    fn check_kind(&mut self, expression: &Expression, scope: &Scope<TypeExp>) -> Option<TypeExp> {
        let ctx = self.ctx;
        let span = expression.span;
        match &expression.kind {
            ExprKind::Number { unit: None, .. } => Some(TypeExp::number()),
            ExprKind::Number {
                unit: Some(unit), ..
            } => match unit.to_unit(ctx.types.unit_manager()) {
                Ok(unit) => Some(TypeExp::Number(UnitExp::concrete(unit))),
                Err(err) => self.problem(span, err.message()),
            },
            ExprKind::Text(_) => Some(TypeExp::Text),
            ExprKind::Boolean(_) => Some(TypeExp::Boolean),
            ExprKind::Temporal(value) => Some(TypeExp::Date(value.kind())),
            ExprKind::TypeLiteral(type_expr) => match type_expr.to_data_type(&ctx.types) {
                Ok(data_type) => Some(type_of_type(TypeExp::from_data_type(&data_type))),
                Err(err) => self.problem(span, err.message()),
            },
            ExprKind::UnitLiteral(unit) => match unit.to_unit(ctx.types.unit_manager()) {
                Ok(unit) => Some(type_of_unit(UnitExp::concrete(unit))),
                Err(err) => self.problem(span, err.message()),
            },
            ExprKind::Column {
                table,
                column,
                whole,
            } => match ctx.columns.get_column(table.as_ref(), column) {
                Some(found) => {
                    let ty = TypeExp::from_data_type(found.data_type());
                    Some(if *whole { TypeExp::array(ty) } else { ty })
                }
                None => {
                    let wanted = ColumnReference {
                        table: table.clone(),
                        column: column.clone(),
                    };
                    let keyword = if *whole { "@entire" } else { "@column" };
                    let fixes = similar_columns(&wanted, ctx.columns.available_column_references())
                        .into_iter()
                        .map(|reference| QuickFix {
                            title: format!("use {reference}"),
                            replacement: format!("{keyword} {reference}"),
                        })
                        .collect();
                    self.problem_with(span, format!("unknown column: {wanted}"), fixes)
                }
            },
            ExprKind::Ident { namespace, name } => {
                self.check_ident(expression, namespace.as_deref(), name, scope)
            }

            ExprKind::AddSubtract { operands, .. } => {
                let number = TypeExp::Number(self.arena.fresh_unit());
                let mut ok = true;
                for operand in operands {
                    let found = self.check(operand, scope);
                    ok &= self.expect(operand, &number, found);
                }
                ok.then_some(number)
            }
            ExprKind::Times(items) => {
                let mut unit = Some(UnitExp::scalar());
                let mut ok = true;
                for item in items {
                    let factor = self.arena.fresh_unit();
                    let found = self.check(item, scope);
                    ok &= self.expect(item, &TypeExp::Number(factor.clone()), found);
                    let factor = self.arena.resolve_unit(&factor);
                    unit = unit.and_then(|unit| unit.checked_multiply(&factor));
                }
                if !ok {
                    return None;
                }
                self.number_with(span, unit)
            }
            ExprKind::Divide(numerator, denominator) => {
                let top = self.arena.fresh_unit();
                let bottom = self.arena.fresh_unit();
                let found = self.check(numerator, scope);
                let ok = self.expect(numerator, &TypeExp::Number(top.clone()), found);
                let found = self.check(denominator, scope);
                let ok = self.expect(denominator, &TypeExp::Number(bottom.clone()), found) && ok;
                if !ok {
                    return None;
                }
                let top = self.arena.resolve_unit(&top);
                let bottom = self.arena.resolve_unit(&bottom);
                self.number_with(span, top.checked_divide(&bottom))
            }
            ExprKind::Raise(base, exponent) => self.check_raise(span, base, exponent, scope),
            ExprKind::Comparison { operands, .. } => {
                let operand_type = self.arena.fresh_with(TypeClass::Comparable);
                let mut ok = true;
                for operand in operands {
                    let found = self.check(operand, scope);
                    ok &= self.expect(operand, &operand_type, found);
                }
                ok.then_some(TypeExp::Boolean)
            }
            ExprKind::Equal {
                operands,
                last_is_pattern: false,
            } => self.check_all_equal(operands, scope),
            ExprKind::Equal { .. } | ExprKind::And(_) => self.condition_kind(expression, scope).0,
            ExprKind::NotEqual(a, b) => self.check_all_equal([a.as_ref(), b.as_ref()], scope),
            ExprKind::Or(items) => {
                let mut ok = true;
                for item in items {
                    let found = self.check(item, scope);
                    ok &= self.expect(item, &TypeExp::Boolean, found);
                }
                ok.then_some(TypeExp::Boolean)
            }
            ExprKind::Concat(items) => {
                let mut ok = true;
                for item in items {
                    let found = self.check(item, scope);
                    ok &= self.expect(item, &TypeExp::Text, found);
                }
                ok.then_some(TypeExp::Text)
            }
            ExprKind::HasType(value, type_expr) => {
                let declared = self.arena.fresh();
                let found = self.check(type_expr, scope);
                let ok = self.expect(type_expr, &type_of_type(declared.clone()), found);
                let found = self.check(value, scope);
                let ok = self.expect(value, &declared, found) && ok;
                ok.then_some(declared)
            }

            ExprKind::IfThenElse {
                condition,
                then_branch,
                else_branch,
            } => {
                let (condition_type, then_scope) = self.condition(condition, scope);
                let result = self.arena.fresh();
                let found = self.check(then_branch, &then_scope);
                let ok = self.expect(then_branch, &result, found);
                let found = self.check(else_branch, scope);
                let ok = self.expect(else_branch, &result, found) && ok;
                (ok && condition_type.is_some()).then_some(result)
            }
            ExprKind::Match { scrutinee, clauses } => {
                let found = self.check(scrutinee, scope);
                let mut ok = found.is_some();
                let subject = found.unwrap_or_else(|| self.arena.fresh());
                let result = self.arena.fresh();
                for clause in clauses {
                    let (clause_ok, outcome_scope) =
                        self.check_alternatives(&clause.patterns, &subject, scope);
                    let found = self.check(&clause.outcome, &outcome_scope);
                    ok &= self.expect(&clause.outcome, &result, found) && clause_ok;
                }
                ok.then_some(result)
            }
            ExprKind::Lambda { params, body } => {
                let mut inner = scope.clone();
                let mut param_types = Vec::with_capacity(params.len());
                for param in params {
                    let ty = self.arena.fresh();
                    inner = inner.with(param.clone(), ty.clone());
                    param_types.push(ty);
                }
                let result = self.check(body, &inner)?;
                Some(TypeExp::function(param_types, result))
            }
            ExprKind::Call { function, args } => self.check_call(expression, function, args, scope),
            ExprKind::Define { definitions, body } => self.check_define(definitions, body, scope),

            ExprKind::Record(fields) => {
                let mut types = BTreeMap::new();
                let mut ok = true;
                for (name, value) in fields {
                    match self.check(value, scope) {
                        Some(ty) => {
                            if types.insert(name.clone(), ty).is_some() {
                                ok = false;
                                self.problem(value.span, format!("duplicate field: {name}"));
                            }
                        }
                        None => ok = false,
                    }
                }
                ok.then_some(TypeExp::Record(types))
            }
            ExprKind::Tuple(items) => {
                let members: Vec<Option<TypeExp>> =
                    items.iter().map(|item| self.check(item, scope)).collect();
                members.into_iter().collect::<Option<Vec<_>>>().map(TypeExp::Tuple)
            }
            ExprKind::FieldAccess { record, field } => {
                let found = self.check(record, scope)?;
                match self.arena.shallow(&found) {
                    TypeExp::Record(fields) => match fields.get(field) {
                        Some(ty) => Some(ty.clone()),
                        None => {
                            let known: Vec<&str> = fields.keys().map(String::as_str).collect();
                            self.problem(
                                span,
                                format!(
                                    "unknown field {field}; the record has {}",
                                    known.join(", ")
                                ),
                            )
                        }
                    },
                    TypeExp::Var(_) => self.problem(
                        span,
                        format!(
                            "the record type must be known before using #{field}; \
                             add a type annotation with ::"
                        ),
                    ),
                    other => {
                        let head = other.describe_head();
                        self.problem(span, format!("{head} is not a record"))
                    }
                }
            }
            ExprKind::Array(items) => {
                let element = self.arena.fresh();
                let mut ok = true;
                for item in items {
                    let found = self.check(item, scope);
                    ok &= self.expect(item, &element, found);
                }
                ok.then(|| TypeExp::array(element))
            }

            ExprKind::ImplicitLambdaArg => match scope.lookup(&implicit_key(expression.id)) {
                Some(ty) => Some(ty.clone()),
                None => self.problem(
                    span,
                    "? can only stand for a whole argument of a function call or operator",
                ),
            },
            ExprKind::MatchAnything | ExprKind::VarDecl(_) => {
                self.problem(span, "_ can only be used in a @case pattern")
            }
            ExprKind::InvalidIdent(raw) if raw.is_empty() => {
                self.problem(span, "missing expression")
            }
            ExprKind::InvalidIdent(raw) => self.problem(span, format!("unrecognised text: {raw}")),
            ExprKind::InvalidOperator {
                operands,
                operators,
            } => {
                for operand in operands {
                    self.check(operand, scope);
                }
                let written: Vec<&str> = operators
                    .iter()
                    .map(|op| if op.is_empty() { "(nothing)" } else { op.as_str() })
                    .collect();
                self.problem(
                    span,
                    format!(
                        "these operators cannot be combined without brackets: {}",
                        written.join(" ")
                    ),
                )
            }
        }
    }

    fn check_ident(
        &mut self,
        expression: &Expression,
        namespace: Option<&str>,
        name: &str,
        scope: &Scope<TypeExp>,
    ) -> Option<TypeExp> {
        if namespace.is_none() {
            if let Some(ty) = scope.lookup(name) {
                self.info
                    .resolutions
                    .insert(expression.id, Resolution::Local(name.to_string()));
                return Some(ty.clone());
            }
        }
        let ctx = self.ctx;
        match resolve_global(namespace, name, &ctx.functions, &ctx.types) {
            Ok(resolution) => {
                let ty = match &resolution {
                    Resolution::Function { namespace, name } => {
                        let Some(definition) = ctx.functions.lookup(Some(*namespace), name)
                        else {
                            return self.problem(
                                expression.span,
                                format!("unknown function: {namespace}\\{name}"),
                            );
                        };
                        self.function_type(expression, definition)
                    }
                    Resolution::Tag {
                        type_name,
                        tag_index,
                    } => {
                        let (whole, inner) = self.tag_types(type_name, *tag_index)?;
                        match inner {
                            Some(inner) => TypeExp::function(vec![inner], whole),
                            None => whole,
                        }
                    }
                    Resolution::Local(name) => {
                        return self.problem(expression.span, format!("unknown name: {name}"))
                    }
                };
                self.info.resolutions.insert(expression.id, resolution);
                Some(ty)
            }
            Err(ResolveError::AmbiguousTag { name, candidates }) => {
                let fixes = candidates
                    .iter()
                    .map(|candidate| QuickFix {
                        title: format!("use {candidate}"),
                        replacement: candidate.clone(),
                    })
                    .collect();
                let message = ResolveError::AmbiguousTag { name, candidates }.to_string();
                self.problem_with(expression.span, message, fixes)
            }
            Err(err) => self.problem(expression.span, err.to_string()),
        }
    }

    /// A fresh instance of a standard function's signature.
    fn function_type(&mut self, node: &Expression, definition: &FunctionDefinition) -> TypeExp {
        let mut vars = InstantiatedVars::default();
        let ty = self.arena.instantiate(&definition.signature(), &mut vars);
        for (var, class) in &definition.constraints {
            if let Some(constrained) = vars.types.get(*var).cloned() {
                self.require_at(node.span, &constrained, *class);
            }
        }
        self.pending.push(PendingBindings {
            node: node.id,
            span: node.span,
            function: definition.qualified_name(),
            vars,
            required: definition.runtime_vars.clone(),
        });
        ty
    }

    /// The type a tag belongs to, and the type of its inner value if it has one, sharing
    /// fresh variables.
    fn tag_types(
        &mut self,
        type_name: &TypeId,
        tag_index: usize,
    ) -> Option<(TypeExp, Option<TypeExp>)> {
        let ctx = self.ctx;
        let definition = ctx.types.lookup_definition(type_name)?;
        let mut vars = InstantiatedVars::default();
        let whole = self.arena.instantiate(&definition.self_term(), &mut vars);
        let inner = definition
            .tags
            .get(tag_index)?
            .inner
            .as_ref()
            .map(|inner| self.arena.instantiate(inner, &mut vars));
        Some((whole, inner))
    }

    fn check_all_equal<'e>(
        &mut self,
        operands: impl IntoIterator<Item = &'e Expression>,
        scope: &Scope<TypeExp>,
    ) -> Option<TypeExp> {
        let operand_type = self.arena.fresh_with(TypeClass::Equatable);
        let mut ok = true;
        for operand in operands {
            let found = self.check(operand, scope);
            ok &= self.expect(operand, &operand_type, found);
        }
        ok.then_some(TypeExp::Boolean)
    }

    /// `a ^ b`: the exponent has no unit. A whole-number literal exponent raises the unit
    /// too; any other exponent needs a unitless base.
    fn check_raise(
        &mut self,
        span: Span,
        base: &Expression,
        exponent: &Expression,
        scope: &Scope<TypeExp>,
    ) -> Option<TypeExp> {
        let found = self.check(exponent, scope);
        let exponent_ok = self.expect(exponent, &TypeExp::number(), found);
        let literal_power = match &exponent.kind {
            ExprKind::Number { value, unit: None } => {
                value.as_i64().and_then(|n| i32::try_from(n).ok())
            }
            _ => None,
        };
        let base_unit = match literal_power {
            Some(_) => self.arena.fresh_unit(),
            None => UnitExp::scalar(),
        };
        let found = self.check(base, scope);
        let base_ok = self.expect(base, &TypeExp::Number(base_unit.clone()), found);
        if !(exponent_ok && base_ok) {
            return None;
        }
        let unit = match literal_power {
            Some(power) => self.arena.resolve_unit(&base_unit).checked_raised_to(power),
            None => Some(base_unit),
        };
        self.number_with(span, unit)
    }

    /// A number of `unit`, or a problem at `span` when computing the unit overflowed.
    fn number_with(&mut self, span: Span, unit: Option<UnitExp>) -> Option<TypeExp> {
        match unit {
            Some(unit) => Some(TypeExp::Number(unit)),
            None => self.problem(span, "unit power too large"),
        }
    }

    fn check_call(
        &mut self,
        call: &Expression,
        function: &Expression,
        args: &[Expression],
        scope: &Scope<TypeExp>,
    ) -> Option<TypeExp> {
        let function_type = self.check(function, scope);
        let arg_types: Vec<Option<TypeExp>> =
            args.iter().map(|arg| self.check(arg, scope)).collect();
        let function_type = function_type?;
        match self.arena.shallow(&function_type) {
            TypeExp::Function { params, result } => {
                if params.len() != args.len() {
                    return self.problem(
                        call.span,
                        format!(
                            "expected {} argument(s) but found {}",
                            params.len(),
                            args.len()
                        ),
                    );
                }
                let mut ok = true;
                for ((param, arg), found) in params.iter().zip(args).zip(arg_types) {
                    ok &= self.expect(arg, param, found);
                }
                ok.then_some(*result)
            }
            TypeExp::Var(_) => {
                let arg_types = arg_types.into_iter().collect::<Option<Vec<_>>>()?;
                let result = self.arena.fresh();
                let expected = TypeExp::function(arg_types, result.clone());
                self.unify_at(function.span, &expected, &function_type)
                    .then_some(result)
            }
            other => {
                let head = other.describe_head();
                self.problem(function.span, format!("{head} is not a function"))
            }
        }
    }

    /// Definitions are checked in order; each sees the ones before it. An annotation applies to
    /// the next binding of the same name.
    fn check_define(
        &mut self,
        definitions: &[Definition],
        body: &Expression,
        scope: &Scope<TypeExp>,
    ) -> Option<TypeExp> {
        let mut current = scope.clone();
        let mut annotations: Vec<(String, TypeExp, Span)> = Vec::new();
        let mut ok = true;
        for definition in definitions {
            match definition {
                Definition::Annotate { name, type_expr } => {
                    let declared = self.arena.fresh();
                    let found = self.check(type_expr, &current);
                    ok &= self.expect(type_expr, &type_of_type(declared.clone()), found);
                    annotations.push((name.clone(), declared, type_expr.span));
                }
                Definition::Bind { name, value } => {
                    let found = self.check(value, &current);
                    let declared = annotations
                        .iter()
                        .position(|(annotated, ..)| annotated == name)
                        .map(|index| annotations.remove(index).1);
                    let ty = match (found, declared) {
                        (Some(found), Some(declared)) => {
                            ok &= self.unify_at(value.span, &declared, &found);
                            declared
                        }
                        (Some(found), None) => found,
                        (None, declared) => {
                            ok = false;
                            declared.unwrap_or_else(|| self.arena.fresh())
                        }
                    };
                    current = current.with(name.clone(), ty);
                }
            }
        }
        for (name, _, span) in annotations {
            ok = false;
            self.problem(span, format!("{name} has a type annotation but no definition"));
        }
        let result = self.check(body, &current);
        if ok {
            result
        } else {
            None
        }
    }

    /// A condition of `@if`, `@given` or `&`. Variables bound by `=~` patterns are in scope
    /// for whatever the condition guards.
    fn condition(
        &mut self,
        expression: &Expression,
        scope: &Scope<TypeExp>,
    ) -> (Option<TypeExp>, Scope<TypeExp>) {
        if implicit_args(expression).is_empty() {
            return self.condition_kind(expression, scope);
        }
        let found = self.check(expression, scope);
        let ok = self.expect(expression, &TypeExp::Boolean, found);
        (ok.then_some(TypeExp::Boolean), scope.clone())
    }

    fn condition_kind(
        &mut self,
        expression: &Expression,
        scope: &Scope<TypeExp>,
    ) -> (Option<TypeExp>, Scope<TypeExp>) {
        match &expression.kind {
            ExprKind::Equal {
                operands,
                last_is_pattern: true,
            } => {
                let Some((pattern, values)) = operands.split_last() else {
                    return (None, scope.clone());
                };
                let subject = self.arena.fresh();
                let mut ok = true;
                for value in values {
                    let found = self.check(value, scope);
                    ok &= self.expect(value, &subject, found);
                }
                if values.len() > 1 {
                    ok &= self.require_at(expression.span, &subject, TypeClass::Equatable);
                }
                match self.check_pattern(pattern, &subject, scope) {
                    Some(bound) if ok => (Some(TypeExp::Boolean), bound),
                    _ => (None, scope.clone()),
                }
            }
            ExprKind::And(items) => {
                let mut current = scope.clone();
                let mut ok = true;
                for item in items {
                    let (found, next) = self.condition(item, &current);
                    ok &= found.is_some();
                    current = next;
                }
                (ok.then_some(TypeExp::Boolean), current)
            }
            _ => {
                let found = self.check(expression, scope);
                let ok = self.expect(expression, &TypeExp::Boolean, found);
                (ok.then_some(TypeExp::Boolean), scope.clone())
            }
        }
    }

    /// The `@orcase` alternatives of one clause. All of them must bind the same names at
    /// unifiable types; the outcome sees the first alternative's bindings.
    fn check_alternatives(
        &mut self,
        patterns: &[Pattern],
        subject: &TypeExp,
        scope: &Scope<TypeExp>,
    ) -> (bool, Scope<TypeExp>) {
        let mut ok = true;
        let mut first: Option<(Vec<String>, Scope<TypeExp>)> = None;
        for alternative in patterns {
            let Some(mut bound) = self.check_pattern(&alternative.pattern, subject, scope) else {
                ok = false;
                continue;
            };
            if let Some(guard) = &alternative.guard {
                let (found, guarded) = self.condition(guard, &bound);
                ok &= found.is_some();
                bound = guarded;
            }
            let mut names: Vec<String> =
                bound.names_since(scope).into_iter().map(str::to_string).collect();
            names.sort();
            match first.take() {
                None => first = Some((names, bound)),
                Some((first_names, first_scope)) => {
                    if first_names == names {
                        for name in &names {
                            let first_type = first_scope.lookup(name).cloned();
                            let this_type = bound.lookup(name).cloned();
                            if let (Some(a), Some(b)) = (first_type, this_type) {
                                ok &= self.unify_at(alternative.pattern.span, &a, &b);
                            }
                        }
                    } else {
                        ok = false;
                        self.problem(
                            alternative.pattern.span,
                            "every @orcase alternative must bind the same variables",
                        );
                    }
                    first = Some((first_names, first_scope));
                }
            }
        }
        let outcome_scope = first.map_or_else(|| scope.clone(), |(_, bound)| bound);
        (ok, outcome_scope)
    }

    /// The tag an identifier names, unless it is a local variable or something else.
    fn tag_named(
        &self,
        expression: &Expression,
        scope: &Scope<TypeExp>,
    ) -> Option<(TypeId, usize)> {
        let ExprKind::Ident { namespace, name } = &expression.kind else {
            return None;
        };
        if namespace.is_none() && scope.lookup(name).is_some() {
            return None;
        }
        match resolve_global(namespace.as_deref(), name, &self.ctx.functions, &self.ctx.types) {
            Ok(Resolution::Tag {
                type_name,
                tag_index,
            }) => Some((type_name, tag_index)),
            _ => None,
        }
    }

    /// Checks `pattern` against values of type `subject` and returns the scope extended with
    /// the variables it binds.
    fn check_pattern(
        &mut self,
        pattern: &Expression,
        subject: &TypeExp,
        scope: &Scope<TypeExp>,
    ) -> Option<Scope<TypeExp>> {
        let span = pattern.span;
        match &pattern.kind {
            ExprKind::MatchAnything => Some(scope.clone()),
            ExprKind::VarDecl(name) => Some(scope.with(name.clone(), subject.clone())),
            ExprKind::Ident { .. } if self.tag_named(pattern, scope).is_some() => {
                let (type_name, tag_index) = self.tag_named(pattern, scope)?;
                let (whole, inner) = self.tag_types(&type_name, tag_index)?;
                if inner.is_some() {
                    self.problem(span, "this tag has an inner value; match it with Tag(_)");
                    return None;
                }
                self.record_tag_pattern(pattern.id, pattern.id, type_name, tag_index);
                self.unify_at(span, subject, &whole).then(|| scope.clone())
            }
            ExprKind::Call { function, args } if self.tag_named(function, scope).is_some() => {
                let (type_name, tag_index) = self.tag_named(function, scope)?;
                let (whole, inner) = self.tag_types(&type_name, tag_index)?;
                let (Some(inner), [inner_pattern]) = (inner, args.as_slice()) else {
                    self.problem(span, "a tag pattern takes exactly one inner pattern");
                    return None;
                };
                self.record_tag_pattern(pattern.id, function.id, type_name, tag_index);
                if !self.unify_at(span, subject, &whole) {
                    return None;
                }
                self.check_pattern(inner_pattern, &inner, scope)
            }
            ExprKind::Tuple(items) => {
                let members: Vec<TypeExp> = items.iter().map(|_| self.arena.fresh()).collect();
                if !self.unify_at(span, subject, &TypeExp::Tuple(members.clone())) {
                    return None;
                }
                let mut current = scope.clone();
                for (item, member) in items.iter().zip(&members) {
                    current = self.check_pattern(item, member, &current)?;
                }
                Some(current)
            }
            ExprKind::Record(fields) => {
                let types: BTreeMap<String, TypeExp> = fields
                    .iter()
                    .map(|(name, _)| (name.clone(), self.arena.fresh()))
                    .collect();
                if !self.unify_at(span, subject, &TypeExp::Record(types.clone())) {
                    return None;
                }
                let mut current = scope.clone();
                for (name, field_pattern) in fields {
                    let field_type = types.get(name)?.clone();
                    current = self.check_pattern(field_pattern, &field_type, &current)?;
                }
                Some(current)
            }
            ExprKind::Array(items) => {
                let element = self.arena.fresh();
                if !self.unify_at(span, subject, &TypeExp::array(element.clone())) {
                    return None;
                }
                let mut current = scope.clone();
                for item in items {
                    current = self.check_pattern(item, &element, &current)?;
                }
                Some(current)
            }
            _ => {
                let found = self.check(pattern, scope)?;
                if !self.unify_at(span, subject, &found) {
                    return None;
                }
                self.require_at(span, subject, TypeClass::Equatable)
                    .then(|| scope.clone())
            }
        }
    }

    fn record_tag_pattern(
        &mut self,
        pattern: NodeId,
        name_node: NodeId,
        type_name: TypeId,
        tag_index: usize,
    ) {
        self.info.tag_patterns.insert(pattern);
        self.info.resolutions.insert(
            name_node,
            Resolution::Tag {
                type_name,
                tag_index,
            },
        );
    }

    /// Reads back the concrete types of every standard function use. A function that needs a
    /// type at run time is a problem if that type is still unknown.
    fn settle_bindings(&mut self) {
        let types = self.ctx.types.clone();
        for pending in std::mem::take(&mut self.pending) {
            let mut bindings = TypeBindings::default();
            for (var, ty) in &pending.vars.types {
                match self.arena.to_concrete(ty, &types) {
                    Ok(data_type) => {
                        bindings.types.insert(var.clone(), data_type);
                    }
                    Err(err) if pending.required.contains(&var.as_str()) => {
                        self.problem(pending.span, format!("{}: {}", pending.function, err));
                    }
                    Err(_) => {}
                }
            }
            for (var, unit) in &pending.vars.units {
                match self.arena.concrete_unit(unit) {
                    Some(unit) => {
                        bindings.units.insert(var.clone(), unit);
                    }
                    None if pending.required.contains(&var.as_str()) => {
                        self.problem(
                            pending.span,
                            format!("{}: cannot work out the unit here", pending.function),
                        );
                    }
                    None => {}
                }
            }
            self.info.bindings.insert(pending.node, bindings);
        }
    }
}
