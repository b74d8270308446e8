//! Runtime values.
//!
//! A [`Value`] carries no type information of its own; it is always interpreted against the
//! [`crate::DataType`] it was produced for.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::compare::compare_values;
use crate::data_type::DateTimeKind;
use crate::error::{RecordsError, RecordsResult};
use crate::ids::{ColumnId, TableId};

/// A number is either a machine integer or an exact decimal.
///
/// The split is a storage optimisation only: equality, ordering, hashing and display all go
/// through the normalised decimal value, so `Int(2)` and `Decimal(2.00)` are indistinguishable.
#[derive(Clone, Copy, Debug)]
pub enum Number {
    Int(i64),
    Decimal(Decimal),
}

fn overflow() -> RecordsError {
    RecordsError::user("number is too large")
}

impl Number {
    pub const ZERO: Number = Number::Int(0);
    pub const ONE: Number = Number::Int(1);

    pub fn to_decimal(self) -> Decimal {
        match self {
            Number::Int(i) => Decimal::from(i),
            Number::Decimal(d) => d,
        }
    }

    /// Collapses integral decimals back to `Int`.
    pub fn normalised(self) -> Number {
        match self {
            Number::Int(_) => self,
            Number::Decimal(d) => {
                let d = d.normalize();
                if d.scale() == 0 {
                    d.to_i64().map_or(Number::Decimal(d), Number::Int)
                } else {
                    Number::Decimal(d)
                }
            }
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self.normalised() {
            Number::Int(i) => Some(i),
            Number::Decimal(_) => None,
        }
    }

    pub fn is_zero(self) -> bool {
        self.to_decimal().is_zero()
    }

    pub fn checked_add(self, other: Number) -> RecordsResult<Number> {
        if let (Number::Int(a), Number::Int(b)) = (self, other) {
            if let Some(sum) = a.checked_add(b) {
                return Ok(Number::Int(sum));
            }
        }
        self.to_decimal()
            .checked_add(other.to_decimal())
            .map(|d| Number::Decimal(d).normalised())
            .ok_or_else(overflow)
    }

    pub fn checked_sub(self, other: Number) -> RecordsResult<Number> {
        self.checked_add(other.negate()?)
    }

    pub fn checked_mul(self, other: Number) -> RecordsResult<Number> {
        if let (Number::Int(a), Number::Int(b)) = (self, other) {
            if let Some(product) = a.checked_mul(b) {
                return Ok(Number::Int(product));
            }
        }
        self.to_decimal()
            .checked_mul(other.to_decimal())
            .map(|d| Number::Decimal(d).normalised())
            .ok_or_else(overflow)
    }

    pub fn checked_div(self, other: Number) -> RecordsResult<Number> {
        if other.is_zero() {
            return Err(RecordsError::user("division by zero"));
        }
        self.to_decimal()
            .checked_div(other.to_decimal())
            .map(|d| Number::Decimal(d).normalised())
            .ok_or_else(overflow)
    }

    pub fn negate(self) -> RecordsResult<Number> {
        match self {
            Number::Int(i) => Ok(i
                .checked_neg()
                .map_or_else(|| Number::Decimal(-Decimal::from(i)), Number::Int)),
            Number::Decimal(d) => Ok(Number::Decimal(-d)),
        }
    }

    pub fn abs(self) -> Number {
        match self {
            Number::Int(i) => i
                .checked_abs()
                .map_or_else(|| Number::Decimal(Decimal::from(i).abs()), Number::Int),
            Number::Decimal(d) => Number::Decimal(d.abs()),
        }
    }

    /// Integer powers are exact; fractional powers go through `f64`.
    pub fn pow(self, exponent: Number) -> RecordsResult<Number> {
        if let Some(power) = exponent.as_i64() {
            if power >= 0 {
                return self.powi(power.unsigned_abs());
            }
            return match self.powi(power.unsigned_abs()) {
                Ok(raised) if raised.is_zero() && !self.is_zero() => Err(overflow()),
                Ok(raised) => Number::ONE.checked_div(raised),
                // Past the largest decimal, the reciprocal rounds to zero.
                Err(_) => Ok(Number::ZERO),
            };
        }
        let base = self.to_decimal().to_f64().ok_or_else(overflow)?;
        let exp = exponent.to_decimal().to_f64().ok_or_else(overflow)?;
        let raised = base.powf(exp);
        if raised.is_nan() {
            return Err(RecordsError::user(format!(
                "cannot raise {self} to the power {exponent}"
            )));
        }
        Decimal::from_f64(raised)
            .map(|d| Number::Decimal(d).normalised())
            .ok_or_else(overflow)
    }

    /// Square-and-multiply, so the step count grows with the bit length of `power`.
    fn powi(self, power: u64) -> RecordsResult<Number> {
        let mut result = Number::ONE;
        let mut base = self;
        let mut remaining = power;
        while remaining > 0 {
            if remaining & 1 == 1 {
                result = result.checked_mul(base)?;
            }
            remaining >>= 1;
            if remaining > 0 {
                base = base.checked_mul(base)?;
            }
        }
        Ok(result)
    }

    /// Rounds half away from zero to `dp` decimal places.
    pub fn round_dp(self, dp: u32) -> Number {
        match self {
            Number::Int(_) => self,
            Number::Decimal(d) => Number::Decimal(d.round_dp_with_strategy(
                dp,
                rust_decimal::RoundingStrategy::MidpointAwayFromZero,
            ))
            .normalised(),
        }
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<Decimal> for Number {
    fn from(value: Decimal) -> Self {
        Number::Decimal(value).normalised()
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(b),
            _ => self.to_decimal().cmp(&other.to_decimal()),
        }
    }
}

impl Hash for Number {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.normalised() {
            Number::Int(i) => i.hash(state),
            Number::Decimal(d) => d.normalize().hash(state),
        }
    }
}

/// Plain decimal notation, never exponent form, without trailing zeros.
impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.normalised() {
            Number::Int(i) => write!(f, "{i}"),
            Number::Decimal(d) => write!(f, "{}", d.normalize()),
        }
    }
}

/// Accepts an optional sign, digits and an optional fractional part. Exponents are rejected.
impl FromStr for Number {
    type Err = RecordsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RecordsError::user(format!("invalid number: {s:?}"));
        let unsigned = s.strip_prefix(&['+', '-'][..]).unwrap_or(s);
        let (whole, fraction) = match unsigned.split_once('.') {
            Some((whole, fraction)) => (whole, Some(fraction)),
            None => (unsigned, None),
        };
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(whole) || fraction.is_some_and(|f| !digits(f)) {
            return Err(invalid());
        }
        let text = s.strip_prefix('+').unwrap_or(s);
        if fraction.is_none() {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Number::Int(i));
            }
        }
        Decimal::from_str_exact(text)
            .map(Number::Decimal)
            .map_err(|_| invalid())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemporalValue {
    YearMonthDay(NaiveDate),
    YearMonth { year: i32, month: u32 },
    TimeOfDay(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeZoned(DateTime<FixedOffset>),
}

impl TemporalValue {
    pub fn kind(&self) -> DateTimeKind {
        match self {
            TemporalValue::YearMonthDay(_) => DateTimeKind::YearMonthDay,
            TemporalValue::YearMonth { .. } => DateTimeKind::YearMonth,
            TemporalValue::TimeOfDay(_) => DateTimeKind::TimeOfDay,
            TemporalValue::DateTime(_) => DateTimeKind::DateTime,
            TemporalValue::DateTimeZoned(_) => DateTimeKind::DateTimeZoned,
        }
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            TemporalValue::YearMonthDay(d) => Some(d.year()),
            TemporalValue::YearMonth { year, .. } => Some(*year),
            TemporalValue::TimeOfDay(_) => None,
            TemporalValue::DateTime(dt) => Some(dt.year()),
            TemporalValue::DateTimeZoned(dt) => Some(dt.year()),
        }
    }

    pub fn month(&self) -> Option<u32> {
        match self {
            TemporalValue::YearMonthDay(d) => Some(d.month()),
            TemporalValue::YearMonth { month, .. } => Some(*month),
            TemporalValue::TimeOfDay(_) => None,
            TemporalValue::DateTime(dt) => Some(dt.month()),
            TemporalValue::DateTimeZoned(dt) => Some(dt.month()),
        }
    }

    pub fn day(&self) -> Option<u32> {
        match self {
            TemporalValue::YearMonthDay(d) => Some(d.day()),
            TemporalValue::YearMonth { .. } | TemporalValue::TimeOfDay(_) => None,
            TemporalValue::DateTime(dt) => Some(dt.day()),
            TemporalValue::DateTimeZoned(dt) => Some(dt.day()),
        }
    }
}

/// ISO-style text, the same form the temporal literals and value loaders accept.
impl fmt::Display for TemporalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalValue::YearMonthDay(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            TemporalValue::YearMonth { year, month } => write!(f, "{year:04}-{month:02}"),
            TemporalValue::TimeOfDay(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            TemporalValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            TemporalValue::DateTimeZoned(dt) => {
                write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f%:z"))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct TaggedValue {
    pub tag_index: usize,
    pub inner: Option<Box<Value>>,
}

impl TaggedValue {
    pub fn bare(tag_index: usize) -> Self {
        Self {
            tag_index,
            inner: None,
        }
    }

    pub fn with_inner(tag_index: usize, inner: Value) -> Self {
        Self {
            tag_index,
            inner: Some(Box::new(inner)),
        }
    }
}

/// A cell that a computed value depended on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExplanationLocation {
    pub table: Option<TableId>,
    pub column: ColumnId,
    pub row: Option<usize>,
}

/// Collects the locations used while computing one result. Disabled recorders ignore
/// everything so that evaluation without explanations does no bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct LocationRecorder {
    enabled: bool,
    used: Vec<ExplanationLocation>,
}

impl LocationRecorder {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            used: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, location: ExplanationLocation) {
        if self.enabled && !self.used.contains(&location) {
            self.used.push(location);
        }
    }

    pub fn take(&mut self) -> Vec<ExplanationLocation> {
        std::mem::take(&mut self.used)
    }
}

/// An indexed sequence of values that may be computed lazily.
pub trait ListEx: Send + Sync {
    fn size(&self) -> RecordsResult<usize>;

    /// Fails with a user error when `index` is out of range.
    fn get(&self, index: usize) -> RecordsResult<Value>;

    /// Where element `index` came from, for lists backed by a column.
    fn location(&self, _index: usize) -> Option<ExplanationLocation> {
        None
    }
}

pub type ListRef = Arc<dyn ListEx>;

pub fn check_index(index: usize, size: usize) -> RecordsResult<()> {
    if index < size {
        Ok(())
    } else {
        Err(RecordsError::user(format!(
            "index {} is out of range for a list of {size} item(s)",
            index + 1
        )))
    }
}

#[derive(Clone, Debug, Default)]
pub struct EagerList {
    items: Vec<Value>,
}

impl EagerList {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

impl ListEx for EagerList {
    fn size(&self) -> RecordsResult<usize> {
        Ok(self.items.len())
    }

    fn get(&self, index: usize) -> RecordsResult<Value> {
        check_index(index, self.items.len())?;
        Ok(self.items[index].clone())
    }
}

/// A callable runtime value: a lambda, a standard function used as a value, or a tag
/// constructor. Calls take all of their state as arguments, so one instance may be called
/// recursively or from several places.
pub trait FunctionValue: Send + Sync {
    fn call(&self, args: Vec<Value>, locations: &mut LocationRecorder) -> RecordsResult<Value>;
}

pub type FunctionRef = Arc<dyn FunctionValue>;

#[derive(Clone)]
pub enum Value {
    Number(Number),
    Text(String),
    Boolean(bool),
    Temporal(TemporalValue),
    Tagged(TaggedValue),
    Tuple(Vec<Value>),
    Record(BTreeMap<String, Value>),
    Array(ListRef),
    /// Runtime only; never stored in a column.
    Function(FunctionRef),
}

fn mismatch(expected: &str, actual: &Value) -> RecordsError {
    RecordsError::internal(format!(
        "expected a {expected} value but found {}",
        actual.variant_name()
    ))
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(EagerList::new(items)))
    }

    pub fn text(text: impl Into<String>) -> Value {
        Value::Text(text.into())
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::Temporal(_) => "temporal",
            Value::Tagged(_) => "tagged",
            Value::Tuple(_) => "tuple",
            Value::Record(_) => "record",
            Value::Array(_) => "array",
            Value::Function(_) => "function",
        }
    }

    pub fn as_number(&self) -> RecordsResult<Number> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(mismatch("number", other)),
        }
    }

    pub fn as_text(&self) -> RecordsResult<&str> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("text", other)),
        }
    }

    pub fn as_boolean(&self) -> RecordsResult<bool> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(mismatch("boolean", other)),
        }
    }

    pub fn as_temporal(&self) -> RecordsResult<&TemporalValue> {
        match self {
            Value::Temporal(t) => Ok(t),
            other => Err(mismatch("temporal", other)),
        }
    }

    pub fn as_tagged(&self) -> RecordsResult<&TaggedValue> {
        match self {
            Value::Tagged(t) => Ok(t),
            other => Err(mismatch("tagged", other)),
        }
    }

    pub fn as_tuple(&self) -> RecordsResult<&[Value]> {
        match self {
            Value::Tuple(members) => Ok(members),
            other => Err(mismatch("tuple", other)),
        }
    }

    pub fn as_record(&self) -> RecordsResult<&BTreeMap<String, Value>> {
        match self {
            Value::Record(fields) => Ok(fields),
            other => Err(mismatch("record", other)),
        }
    }

    pub fn as_list(&self) -> RecordsResult<&ListRef> {
        match self {
            Value::Array(list) => Ok(list),
            other => Err(mismatch("array", other)),
        }
    }

    pub fn as_function(&self) -> RecordsResult<&FunctionRef> {
        match self {
            Value::Function(function) => Ok(function),
            other => Err(mismatch("function", other)),
        }
    }

    /// Reads every element of an array value.
    pub fn list_items(&self) -> RecordsResult<Vec<Value>> {
        let list = self.as_list()?;
        (0..list.size()?).map(|i| list.get(i)).collect()
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Number::Int(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<TemporalValue> for Value {
    fn from(value: TemporalValue) -> Self {
        Value::Temporal(value)
    }
}

impl From<TaggedValue> for Value {
    fn from(value: TaggedValue) -> Self {
        Value::Tagged(value)
    }
}

/// Structural equality through [`compare_values`]; values that cannot be compared (functions,
/// mismatched variants) are never equal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        matches!(compare_values(self, other), Ok(Ordering::Equal))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Value::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            Value::Temporal(t) => write!(f, "Temporal({t})"),
            Value::Tagged(t) => f.debug_tuple("Tagged").field(t).finish(),
            Value::Tuple(members) => f.debug_tuple("Tuple").field(members).finish(),
            Value::Record(fields) => f.debug_tuple("Record").field(fields).finish(),
            Value::Array(_) => match self.list_items() {
                Ok(items) => f.debug_tuple("Array").field(&items).finish(),
                Err(err) => write!(f, "Array(<{err}>)"),
            },
            Value::Function(_) => f.write_str("Function"),
        }
    }
}
