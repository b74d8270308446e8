//! Evaluation of checked expressions, one row at a time.
//!
//! The evaluator walks the tree from the root. Local bindings live in a [`Scope`], so a lambda
//! captures its scope by sharing it and sibling branches never see each other's variables.
//! Every function value takes all of its per-call state as arguments, which makes recursive
//! and repeated calls of one value safe.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use records_model::{
    compare_values, values_equal, ExplanationLocation, FunctionValue, LocationRecorder, Number,
    RecordsError, RecordsResult, TaggedValue, Value,
};
use serde::{Deserialize, Serialize};

use crate::ast::{AddSubtractOp, ComparisonOp, Definition, ExprKind, Expression};
use crate::check::{implicit_key, CheckContext, CheckInfo, TypedExpression};
use crate::column::ColumnList;
use crate::functions::{FunctionCall, TypeBindings};
use crate::resolve::Resolution;
use crate::save::save_expression;
use crate::scope::Scope;

/// Evaluation runs against the same registries the expression was checked with.
pub type EvaluationContext = CheckContext;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateOptions {
    /// Record which cells each call and column reference used.
    pub record_explanation: bool,
}

/// How one call or column reference came to its result.
#[derive(Clone, Debug)]
pub struct Explanation {
    /// The sub-expression, in saved form.
    pub expression: String,
    pub result: Value,
    pub locations: Vec<ExplanationLocation>,
    pub children: Vec<Explanation>,
}

#[derive(Clone, Debug)]
pub struct Evaluated {
    pub value: Value,
    /// Empty unless explanations were requested.
    pub explanations: Vec<Explanation>,
}

/// A failed cell of a materialised column.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CellError {
    pub message: String,
    /// Set when the failure came from a broken invariant rather than the user's data.
    pub internal: bool,
}

/// Told about progress between rows; returning `false` stops the computation.
pub trait ProgressListener {
    fn row_done(&mut self, done: usize, total: usize) -> bool;
}

/// Never cancels.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn row_done(&mut self, _done: usize, _total: usize) -> bool {
        true
    }
}

#[derive(Clone, Debug)]
pub struct ColumnValues {
    pub rows: Vec<Result<Value, CellError>>,
    /// Set when the listener stopped the computation before the last row.
    pub cancelled: bool,
}

pub fn evaluate(
    typed: &TypedExpression,
    ctx: &EvaluationContext,
    row: Option<usize>,
) -> RecordsResult<Value> {
    Ok(evaluate_with_options(typed, ctx, row, &EvaluateOptions::default())?.value)
}

pub fn evaluate_with_options(
    typed: &TypedExpression,
    ctx: &EvaluationContext,
    row: Option<usize>,
    options: &EvaluateOptions,
) -> RecordsResult<Evaluated> {
    let env = Arc::new(Env {
        ctx: ctx.clone(),
        info: typed.info.clone(),
        row,
    });
    let mut evaluator = Evaluator::new(env, options.record_explanation);
    let mut locations = LocationRecorder::new(options.record_explanation);
    let value = evaluator.eval(&typed.expression, &Scope::new(), &mut locations)?;
    let explanations = evaluator
        .frames
        .and_then(|mut frames| frames.pop())
        .unwrap_or_default();
    Ok(Evaluated {
        value,
        explanations,
    })
}

/// Evaluates `typed` for rows `0..row_count`. A failing row becomes a [`CellError`] and the
/// remaining rows are still computed.
pub fn evaluate_column(
    typed: &TypedExpression,
    ctx: &EvaluationContext,
    row_count: usize,
    listener: &mut dyn ProgressListener,
) -> ColumnValues {
    let mut rows = Vec::with_capacity(row_count);
    for row in 0..row_count {
        rows.push(evaluate(typed, ctx, Some(row)).map_err(|err| cell_error(row, &err)));
        if !listener.row_done(row + 1, row_count) && row + 1 < row_count {
            log::warn!(
                "column evaluation cancelled after {} of {} rows",
                row + 1,
                row_count
            );
            return ColumnValues {
                rows,
                cancelled: true,
            };
        }
    }
    ColumnValues {
        rows,
        cancelled: false,
    }
}

fn cell_error(row: usize, err: &RecordsError) -> CellError {
    if err.is_internal() {
        log::error!("internal error in row {}: {}", row + 1, err.message());
    }
    CellError {
        message: err.message().to_string(),
        internal: err.is_internal(),
    }
}

/// What every evaluation of one expression for one row shares.
struct Env {
    ctx: EvaluationContext,
    info: Arc<CheckInfo>,
    row: Option<usize>,
}

/// A lambda, or an operator or call with `?` operands, closed over its scope.
struct Closure {
    params: Vec<String>,
    body: Arc<Expression>,
    /// The body is the node that took the `?` operands; evaluate it without turning it into a
    /// function again.
    implicit: bool,
    scope: Scope<Value>,
    env: Arc<Env>,
}

impl FunctionValue for Closure {
    fn call(&self, args: Vec<Value>, locations: &mut LocationRecorder) -> RecordsResult<Value> {
        if args.len() != self.params.len() {
            return Err(RecordsError::internal(format!(
                "function expects {} argument(s) but was given {}",
                self.params.len(),
                args.len()
            )));
        }
        let mut scope = self.scope.clone();
        for (param, arg) in self.params.iter().zip(args) {
            scope = scope.with(param.clone(), arg);
        }
        let mut evaluator = Evaluator::new(self.env.clone(), locations.is_enabled());
        if self.implicit {
            evaluator.eval_kind(&self.body, &scope, locations)
        } else {
            evaluator.eval(&self.body, &scope, locations)
        }
    }
}

/// A standard function used as a value, with the types it was checked at.
struct StandardFunction {
    namespace: &'static str,
    name: &'static str,
    bindings: TypeBindings,
    env: Arc<Env>,
}

impl FunctionValue for StandardFunction {
    fn call(&self, args: Vec<Value>, locations: &mut LocationRecorder) -> RecordsResult<Value> {
        let ctx = &self.env.ctx;
        let definition = ctx
            .functions
            .lookup(Some(self.namespace), self.name)
            .ok_or_else(|| {
                let name = format!("{}\\{}", self.namespace, self.name);
                RecordsError::internal(format!("unknown function {name}"))
            })?;
        let mut call = FunctionCall {
            types: &ctx.types,
            bindings: &self.bindings,
            locations,
        };
        definition.call(&mut call, args)
    }
}

/// A tag with an inner value, used as a function that wraps its argument.
struct TagConstructor {
    tag_index: usize,
}

impl FunctionValue for TagConstructor {
    fn call(&self, args: Vec<Value>, _: &mut LocationRecorder) -> RecordsResult<Value> {
        let [inner] = <[Value; 1]>::try_from(args)
            .map_err(|_| RecordsError::internal("a tag takes exactly one inner value"))?;
        Ok(Value::Tagged(TaggedValue::with_inner(self.tag_index, inner)))
    }
}

fn unchecked(what: &str) -> RecordsError {
    RecordsError::internal(format!("{what} should have been rejected by the type checker"))
}

struct Evaluator {
    env: Arc<Env>,
    /// Explanations under construction, innermost call last. `None` when not explaining.
    frames: Option<Vec<Vec<Explanation>>>,
}

impl Evaluator {
    fn new(env: Arc<Env>, explain: bool) -> Self {
        Self {
            env,
            frames: explain.then(|| vec![Vec::new()]),
        }
    }

    fn eval(
        &mut self,
        expression: &Expression,
        scope: &Scope<Value>,
        locations: &mut LocationRecorder,
    ) -> RecordsResult<Value> {
        if let Some(args) = self.env.info.implicit_lambdas.get(&expression.id) {
            return Ok(Value::Function(Arc::new(Closure {
                params: args.iter().map(|id| implicit_key(*id)).collect(),
                body: Arc::new(expression.clone()),
                implicit: true,
                scope: scope.clone(),
                env: self.env.clone(),
            })));
        }
        match expression.kind {
            ExprKind::Column { .. } | ExprKind::Call { .. } if self.frames.is_some() => {
                self.explained(expression, scope, locations)
            }
            _ => self.eval_kind(expression, scope, locations),
        }
    }

    /// Evaluates with its own location recorder and explanation frame, then reports both to
    /// the enclosing call.
    fn explained(
        &mut self,
        expression: &Expression,
        scope: &Scope<Value>,
        outer: &mut LocationRecorder,
    ) -> RecordsResult<Value> {
        if let Some(frames) = &mut self.frames {
            frames.push(Vec::new());
        }
        let mut inner = LocationRecorder::new(true);
        let result = self.eval_kind(expression, scope, &mut inner);
        let children = self.frames.as_mut().and_then(Vec::pop).unwrap_or_default();
        let value = result?;
        let locations = inner.take();
        for location in &locations {
            outer.record(location.clone());
        }
        if let Some(frame) = self.frames.as_mut().and_then(|frames| frames.last_mut()) {
            frame.push(Explanation {
                expression: save_expression(expression),
                result: value.clone(),
                locations,
                children,
            });
        }
        Ok(value)
    }

    fn eval_kind(
        &mut self,
        expression: &Expression,
        scope: &Scope<Value>,
        locations: &mut LocationRecorder,
    ) -> RecordsResult<Value> {
        match &expression.kind {
            ExprKind::Number { value, .. } => Ok(Value::Number(*value)),
            ExprKind::Text(text) => Ok(Value::Text(text.clone())),
            ExprKind::Boolean(b) => Ok(Value::Boolean(*b)),
            ExprKind::Temporal(value) => Ok(Value::Temporal(*value)),
            ExprKind::TypeLiteral(_) | ExprKind::UnitLiteral(_) => {
                Ok(Value::Tagged(TaggedValue::bare(0)))
            }
            ExprKind::Column {
                table,
                column,
                whole,
            } => {
                let found = self
                    .env
                    .ctx
                    .columns
                    .get_column(table.as_ref(), column)
                    .ok_or_else(|| RecordsError::user(format!("unknown column: {column}")))?;
                if *whole {
                    return Ok(Value::Array(Arc::new(ColumnList::new(found))));
                }
                let row = self.env.row.ok_or_else(|| {
                    RecordsError::user(format!(
                        "@column {column} needs a row; use @entire for the whole column"
                    ))
                })?;
                locations.record(found.location(row));
                found.get(row)
            }
            ExprKind::Ident { .. } => self.eval_ident(expression, scope),

            ExprKind::AddSubtract { operands, ops } => {
                let Some((first, rest)) = operands.split_first() else {
                    return Err(unchecked("an empty sum"));
                };
                let mut total = self.eval(first, scope, locations)?.as_number()?;
                for (op, operand) in ops.iter().zip(rest) {
                    let value = self.eval(operand, scope, locations)?.as_number()?;
                    total = match op {
                        AddSubtractOp::Add => total.checked_add(value)?,
                        AddSubtractOp::Subtract => total.checked_sub(value)?,
                    };
                }
                Ok(Value::Number(total))
            }
            ExprKind::Times(items) => {
                let mut product = Number::ONE;
                for item in items {
                    product = product.checked_mul(self.eval(item, scope, locations)?.as_number()?)?;
                }
                Ok(Value::Number(product))
            }
            ExprKind::Divide(numerator, denominator) => {
                let top = self.eval(numerator, scope, locations)?.as_number()?;
                let bottom = self.eval(denominator, scope, locations)?.as_number()?;
                Ok(Value::Number(top.checked_div(bottom)?))
            }
            ExprKind::Raise(base, exponent) => {
                let base = self.eval(base, scope, locations)?.as_number()?;
                let exponent = self.eval(exponent, scope, locations)?.as_number()?;
                Ok(Value::Number(base.pow(exponent)?))
            }
            ExprKind::Comparison { operands, ops } => {
                let Some((first, rest)) = operands.split_first() else {
                    return Err(unchecked("an empty comparison"));
                };
                let mut left = self.eval(first, scope, locations)?;
                for (op, operand) in ops.iter().zip(rest) {
                    let right = self.eval(operand, scope, locations)?;
                    let ordering = compare_values(&left, &right)?;
                    let holds = match op {
                        ComparisonOp::Less => ordering == Ordering::Less,
                        ComparisonOp::LessEqual => ordering != Ordering::Greater,
                        ComparisonOp::Greater => ordering == Ordering::Greater,
                        ComparisonOp::GreaterEqual => ordering != Ordering::Less,
                    };
                    if !holds {
                        return Ok(Value::Boolean(false));
                    }
                    left = right;
                }
                Ok(Value::Boolean(true))
            }
            ExprKind::Equal {
                operands,
                last_is_pattern: false,
            } => {
                let Some((first, rest)) = operands.split_first() else {
                    return Err(unchecked("an empty equality"));
                };
                let first = self.eval(first, scope, locations)?;
                for operand in rest {
                    if !values_equal(&first, &self.eval(operand, scope, locations)?)? {
                        return Ok(Value::Boolean(false));
                    }
                }
                Ok(Value::Boolean(true))
            }
            ExprKind::Equal { .. } | ExprKind::And(_) => Ok(Value::Boolean(
                self.condition(expression, scope, locations)?.is_some(),
            )),
            ExprKind::NotEqual(a, b) => {
                let a = self.eval(a, scope, locations)?;
                let b = self.eval(b, scope, locations)?;
                Ok(Value::Boolean(!values_equal(&a, &b)?))
            }
            ExprKind::Or(items) => {
                for item in items {
                    if self.eval(item, scope, locations)?.as_boolean()? {
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(Value::Boolean(false))
            }
            ExprKind::Concat(items) => {
                let mut joined = String::new();
                for item in items {
                    joined.push_str(self.eval(item, scope, locations)?.as_text()?);
                }
                Ok(Value::Text(joined))
            }
            ExprKind::HasType(value, _) => self.eval(value, scope, locations),

            ExprKind::IfThenElse {
                condition,
                then_branch,
                else_branch,
            } => match self.condition(condition, scope, locations)? {
                Some(bound) => self.eval(then_branch, &bound, locations),
                None => self.eval(else_branch, scope, locations),
            },
            ExprKind::Match { scrutinee, clauses } => {
                let subject = self.eval(scrutinee, scope, locations)?;
                for clause in clauses {
                    for alternative in &clause.patterns {
                        let Some(bound) =
                            self.match_pattern(&alternative.pattern, &subject, scope, locations)?
                        else {
                            continue;
                        };
                        let bound = match &alternative.guard {
                            Some(guard) => self.condition(guard, &bound, locations)?,
                            None => Some(bound),
                        };
                        if let Some(bound) = bound {
                            return self.eval(&clause.outcome, &bound, locations);
                        }
                    }
                }
                Err(RecordsError::user("no @case matched the value"))
            }
            ExprKind::Lambda { params, body } => Ok(Value::Function(Arc::new(Closure {
                params: params.clone(),
                body: body.clone(),
                implicit: false,
                scope: scope.clone(),
                env: self.env.clone(),
            }))),
            ExprKind::Call { function, args } => {
                let function = self.eval(function, scope, locations)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, scope, locations))
                    .collect::<RecordsResult<Vec<_>>>()?;
                function.as_function()?.call(args, locations)
            }
            ExprKind::Define { definitions, body } => {
                let mut current = scope.clone();
                for definition in definitions {
                    if let Definition::Bind { name, value } = definition {
                        let value = self.eval(value, &current, locations)?;
                        current = current.with(name.clone(), value);
                    }
                }
                self.eval(body, &current, locations)
            }

            ExprKind::Record(fields) => {
                let mut values = BTreeMap::new();
                for (name, value) in fields {
                    values.insert(name.clone(), self.eval(value, scope, locations)?);
                }
                Ok(Value::Record(values))
            }
            ExprKind::Tuple(items) => Ok(Value::Tuple(
                items
                    .iter()
                    .map(|item| self.eval(item, scope, locations))
                    .collect::<RecordsResult<_>>()?,
            )),
            ExprKind::FieldAccess { record, field } => self
                .eval(record, scope, locations)?
                .as_record()?
                .get(field)
                .cloned()
                .ok_or_else(|| RecordsError::internal(format!("record has no field {field}"))),
            ExprKind::Array(items) => Ok(Value::list(
                items
                    .iter()
                    .map(|item| self.eval(item, scope, locations))
                    .collect::<RecordsResult<_>>()?,
            )),

            ExprKind::ImplicitLambdaArg => scope
                .lookup(&implicit_key(expression.id))
                .cloned()
                .ok_or_else(|| unchecked("a ? outside a function argument")),
            ExprKind::MatchAnything | ExprKind::VarDecl(_) => {
                Err(unchecked("a pattern outside @case"))
            }
            ExprKind::InvalidIdent(_) | ExprKind::InvalidOperator { .. } => {
                Err(unchecked("an invalid expression"))
            }
        }
    }

    fn eval_ident(&self, expression: &Expression, scope: &Scope<Value>) -> RecordsResult<Value> {
        let ctx = &self.env.ctx;
        match self.env.info.resolution(expression.id) {
            Some(Resolution::Local(name)) => scope
                .lookup(name)
                .cloned()
                .ok_or_else(|| RecordsError::internal(format!("variable {name} is not bound"))),
            Some(Resolution::Function { namespace, name }) => {
                Ok(Value::Function(Arc::new(StandardFunction {
                    namespace,
                    name,
                    bindings: self
                        .env
                        .info
                        .bindings(expression.id)
                        .cloned()
                        .unwrap_or_default(),
                    env: self.env.clone(),
                })))
            }
            Some(Resolution::Tag {
                type_name,
                tag_index,
            }) => {
                let has_inner = ctx
                    .types
                    .lookup_definition(type_name)
                    .and_then(|definition| definition.tags.get(*tag_index))
                    .ok_or_else(|| RecordsError::internal(format!("unknown tag of {type_name}")))?
                    .inner
                    .is_some();
                Ok(if has_inner {
                    Value::Function(Arc::new(TagConstructor {
                        tag_index: *tag_index,
                    }))
                } else {
                    Value::Tagged(TaggedValue::bare(*tag_index))
                })
            }
            None => Err(unchecked("an unresolved name")),
        }
    }

    /// Evaluates a condition. `Some` holds the scope extended with any `=~` pattern variables;
    /// `None` means the condition is false.
    fn condition(
        &mut self,
        expression: &Expression,
        scope: &Scope<Value>,
        locations: &mut LocationRecorder,
    ) -> RecordsResult<Option<Scope<Value>>> {
        match &expression.kind {
            ExprKind::Equal {
                operands,
                last_is_pattern: true,
            } => {
                let Some((pattern, values)) = operands.split_last() else {
                    return Err(unchecked("an empty pattern match"));
                };
                let mut subject: Option<Value> = None;
                for value in values {
                    let value = self.eval(value, scope, locations)?;
                    match &subject {
                        Some(first) if !values_equal(first, &value)? => return Ok(None),
                        Some(_) => {}
                        None => subject = Some(value),
                    }
                }
                let subject = subject.ok_or_else(|| unchecked("a pattern match with no value"))?;
                self.match_pattern(pattern, &subject, scope, locations)
            }
            ExprKind::And(items) => {
                let mut current = scope.clone();
                for item in items {
                    match self.condition(item, &current, locations)? {
                        Some(next) => current = next,
                        None => return Ok(None),
                    }
                }
                Ok(Some(current))
            }
            _ => Ok(self
                .eval(expression, scope, locations)?
                .as_boolean()?
                .then(|| scope.clone())),
        }
    }

    /// Matches `value` against `pattern`, returning the scope with the pattern's variables.
    fn match_pattern(
        &mut self,
        pattern: &Expression,
        value: &Value,
        scope: &Scope<Value>,
        locations: &mut LocationRecorder,
    ) -> RecordsResult<Option<Scope<Value>>> {
        let env = self.env.clone();
        match &pattern.kind {
            ExprKind::MatchAnything => Ok(Some(scope.clone())),
            ExprKind::VarDecl(name) => Ok(Some(scope.with(name.clone(), value.clone()))),
            _ if env.info.tag_patterns.contains(&pattern.id) => {
                let (name_node, inner_pattern) = match &pattern.kind {
                    ExprKind::Call { function, args } => (function.id, args.first()),
                    _ => (pattern.id, None),
                };
                let Some(Resolution::Tag { tag_index, .. }) = env.info.resolution(name_node) else {
                    return Err(unchecked("an unresolved tag pattern"));
                };
                let tagged = value.as_tagged()?;
                if tagged.tag_index != *tag_index {
                    return Ok(None);
                }
                match (inner_pattern, &tagged.inner) {
                    (Some(inner_pattern), Some(inner)) => {
                        self.match_pattern(inner_pattern, inner, scope, locations)
                    }
                    (None, _) => Ok(Some(scope.clone())),
                    (Some(_), None) => Err(RecordsError::internal("tag value has no inner value")),
                }
            }
            ExprKind::Tuple(items) => {
                let members = value.as_tuple()?;
                if members.len() != items.len() {
                    return Err(unchecked("a tuple pattern of the wrong size"));
                }
                let mut current = scope.clone();
                for (item, member) in items.iter().zip(members) {
                    match self.match_pattern(item, member, &current, locations)? {
                        Some(next) => current = next,
                        None => return Ok(None),
                    }
                }
                Ok(Some(current))
            }
            ExprKind::Record(fields) => {
                let values = value.as_record()?;
                let mut current = scope.clone();
                for (name, field_pattern) in fields {
                    let field = values.get(name).ok_or_else(|| {
                        RecordsError::internal(format!("record has no field {name}"))
                    })?;
                    match self.match_pattern(field_pattern, field, &current, locations)? {
                        Some(next) => current = next,
                        None => return Ok(None),
                    }
                }
                Ok(Some(current))
            }
            ExprKind::Array(items) => {
                let list = value.as_list()?;
                if list.size()? != items.len() {
                    return Ok(None);
                }
                let mut current = scope.clone();
                for (index, item) in items.iter().enumerate() {
                    let element = list.get(index)?;
                    match self.match_pattern(item, &element, &current, locations)? {
                        Some(next) => current = next,
                        None => return Ok(None),
                    }
                }
                Ok(Some(current))
            }
            _ => {
                let expected = self.eval(pattern, scope, locations)?;
                Ok(values_equal(value, &expected)?.then(|| scope.clone()))
            }
        }
    }
}
