use std::cmp::Ordering;

use crate::error::{RecordsError, RecordsResult};
use crate::value::{ListRef, Value};

/// Total order over two values of the same data type.
///
/// Numbers compare by value regardless of representation, text by code point, tagged values
/// by tag index and then inner value, and tuples, records and arrays lexicographically (a
/// shorter array that is a prefix of a longer one sorts first). Values of different variants
/// or functions cannot be compared and produce an internal error, since the type checker
/// never lets them meet.
pub fn compare_values(a: &Value, b: &Value) -> RecordsResult<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Ok(x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Ok(x.cmp(y)),
        (Value::Temporal(x), Value::Temporal(y)) => {
            if x.kind() != y.kind() {
                return Err(RecordsError::internal(format!(
                    "cannot compare {:?} with {:?}",
                    x.kind(),
                    y.kind()
                )));
            }
            Ok(x.cmp(y))
        }
        (Value::Tagged(x), Value::Tagged(y)) => {
            let by_tag = x.tag_index.cmp(&y.tag_index);
            if by_tag != Ordering::Equal {
                return Ok(by_tag);
            }
            match (&x.inner, &y.inner) {
                (Some(xi), Some(yi)) => compare_values(xi, yi),
                (None, None) => Ok(Ordering::Equal),
                (None, Some(_)) => Ok(Ordering::Less),
                (Some(_), None) => Ok(Ordering::Greater),
            }
        }
        (Value::Tuple(xs), Value::Tuple(ys)) => compare_sequences(xs.iter(), ys.iter()),
        (Value::Record(xs), Value::Record(ys)) => {
            for ((xk, xv), (yk, yv)) in xs.iter().zip(ys.iter()) {
                let by_key = xk.cmp(yk);
                if by_key != Ordering::Equal {
                    return Ok(by_key);
                }
                let by_value = compare_values(xv, yv)?;
                if by_value != Ordering::Equal {
                    return Ok(by_value);
                }
            }
            Ok(xs.len().cmp(&ys.len()))
        }
        (Value::Array(xs), Value::Array(ys)) => compare_lists(xs, ys),
        (Value::Function(_), _) | (_, Value::Function(_)) => {
            Err(RecordsError::internal("function values cannot be compared"))
        }
        (x, y) => Err(RecordsError::internal(format!(
            "cannot compare {} value with {} value",
            x.variant_name(),
            y.variant_name()
        ))),
    }
}

fn compare_sequences<'a>(
    xs: impl ExactSizeIterator<Item = &'a Value>,
    ys: impl ExactSizeIterator<Item = &'a Value>,
) -> RecordsResult<Ordering> {
    let (x_len, y_len) = (xs.len(), ys.len());
    for (x, y) in xs.zip(ys) {
        let ord = compare_values(x, y)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(x_len.cmp(&y_len))
}

fn compare_lists(xs: &ListRef, ys: &ListRef) -> RecordsResult<Ordering> {
    let (x_len, y_len) = (xs.size()?, ys.size()?);
    for i in 0..x_len.min(y_len) {
        let ord = compare_values(&xs.get(i)?, &ys.get(i)?)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(x_len.cmp(&y_len))
}

/// Equality as used by `=` and `<>`.
pub fn values_equal(a: &Value, b: &Value) -> RecordsResult<bool> {
    Ok(compare_values(a, b)? == Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Number, TaggedValue};
    use std::collections::BTreeMap;

    #[test]
    fn numbers_compare_across_representations() {
        let int = Value::from(2);
        let dec = Value::Number("2.0".parse::<Number>().unwrap());
        assert_eq!(compare_values(&int, &dec).unwrap(), Ordering::Equal);
        let half = Value::Number("0.5".parse::<Number>().unwrap());
        assert_eq!(compare_values(&half, &int).unwrap(), Ordering::Less);
    }

    #[test]
    fn tagged_values_order_by_tag_then_inner() {
        let none = Value::Tagged(TaggedValue::bare(0));
        let is_one = Value::Tagged(TaggedValue::with_inner(1, Value::from(1)));
        let is_two = Value::Tagged(TaggedValue::with_inner(1, Value::from(2)));
        assert_eq!(compare_values(&none, &is_one).unwrap(), Ordering::Less);
        assert_eq!(compare_values(&is_two, &is_one).unwrap(), Ordering::Greater);
    }

    #[test]
    fn arrays_compare_elementwise_then_by_length() {
        let short = Value::list(vec![Value::from(1), Value::from(2)]);
        let long = Value::list(vec![Value::from(1), Value::from(2), Value::from(0)]);
        let bigger = Value::list(vec![Value::from(3)]);
        assert_eq!(compare_values(&short, &long).unwrap(), Ordering::Less);
        assert_eq!(compare_values(&bigger, &long).unwrap(), Ordering::Greater);
    }

    #[test]
    fn records_compare_in_key_order() {
        let record = |a: i64, b: i64| {
            let mut fields = BTreeMap::new();
            fields.insert("b".to_string(), Value::from(b));
            fields.insert("a".to_string(), Value::from(a));
            Value::Record(fields)
        };
        assert_eq!(
            compare_values(&record(1, 9), &record(2, 0)).unwrap(),
            Ordering::Less
        );
        assert!(values_equal(&record(1, 1), &record(1, 1)).unwrap());
    }

    #[test]
    fn mismatched_variants_are_internal_errors() {
        let err = compare_values(&Value::from(1), &Value::from("x")).unwrap_err();
        assert!(err.is_internal());
    }
}
