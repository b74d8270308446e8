use chrono::{Datelike, NaiveDate};
use records_model::{DateTimeKind, RecordsError, RecordsResult, TemporalValue, TypeTerm, Value};

use super::{number_of, take_args, FunctionCall, FunctionDefinition};

pub(super) fn definitions() -> Vec<FunctionDefinition> {
    let date = || TypeTerm::Date(DateTimeKind::YearMonthDay);
    vec![
        FunctionDefinition::new("datetime", "year", vec![date()], TypeTerm::number(), year),
        FunctionDefinition::new("datetime", "month", vec![date()], TypeTerm::number(), month),
        FunctionDefinition::new("datetime", "day", vec![date()], TypeTerm::number(), day),
        FunctionDefinition::new(
            "datetime",
            "date_from_ymd",
            vec![TypeTerm::number(), TypeTerm::number(), TypeTerm::number()],
            date(),
            date_from_ymd,
        ),
        FunctionDefinition::new(
            "datetime",
            "days_between",
            vec![date(), date()],
            number_of("day"),
            days_between,
        ),
    ]
}

fn ymd(value: &Value) -> RecordsResult<NaiveDate> {
    match value.as_temporal()? {
        TemporalValue::YearMonthDay(date) => Ok(*date),
        other => Err(RecordsError::internal(format!(
            "expected a {} but found a {}",
            DateTimeKind::YearMonthDay.type_name(),
            other.kind().type_name()
        ))),
    }
}

fn year(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [date] = take_args(args)?;
    Ok(Value::from(i64::from(ymd(&date)?.year())))
}

fn month(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [date] = take_args(args)?;
    Ok(Value::from(i64::from(ymd(&date)?.month())))
}

fn day(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [date] = take_args(args)?;
    Ok(Value::from(i64::from(ymd(&date)?.day())))
}

fn whole<T: TryFrom<i64>>(value: &Value, what: &str) -> RecordsResult<T> {
    let number = value.as_number()?;
    number
        .as_i64()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| RecordsError::user(format!("{what} must be a whole number, not {number}")))
}

fn date_from_ymd(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [y, m, d] = take_args(args)?;
    let (year, month, day) = (whole::<i32>(&y, "year")?, whole(&m, "month")?, whole(&d, "day")?);
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|date| Value::Temporal(TemporalValue::YearMonthDay(date)))
        .ok_or_else(|| RecordsError::user(format!("{year}-{month}-{day} is not a valid date")))
}

/// Whole days from the first date to the second; negative when the second is earlier.
fn days_between(_: &mut FunctionCall<'_>, args: Vec<Value>) -> RecordsResult<Value> {
    let [from, to] = take_args(args)?;
    Ok(Value::from((ymd(&to)? - ymd(&from)?).num_days()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::call;
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Temporal(TemporalValue::YearMonthDay(NaiveDate::from_ymd_opt(y, m, d).unwrap()))
    }

    #[test]
    fn parts_and_construction() {
        let leap = date(2024, 2, 29);
        assert_eq!(call("year", vec![leap.clone()]).unwrap(), 2024.into());
        assert_eq!(call("month", vec![leap.clone()]).unwrap(), 2.into());
        assert_eq!(call("day", vec![leap.clone()]).unwrap(), 29.into());
        let built = call("date_from_ymd", vec![2024.into(), 2.into(), 29.into()]).unwrap();
        assert_eq!(built, leap);
    }

    #[test]
    fn impossible_dates_are_user_errors() {
        let err = call("date_from_ymd", vec![2023.into(), 2.into(), 29.into()]).unwrap_err();
        assert!(!err.is_internal());
        let half = Value::Number("1.5".parse().unwrap());
        assert!(call("date_from_ymd", vec![2023.into(), half, 1.into()]).is_err());
    }

    #[test]
    fn days_between_is_signed() {
        let a = date(2024, 1, 1);
        let b = date(2024, 3, 1);
        assert_eq!(call("days_between", vec![a.clone(), b.clone()]).unwrap(), 60.into());
        assert_eq!(call("days_between", vec![b, a]).unwrap(), (-60).into());
    }
}
