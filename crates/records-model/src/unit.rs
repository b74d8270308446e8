//! Measurement units.
//!
//! A [`Unit`] is a product of integer powers of named single units. Factors are kept in a
//! sorted map with zero powers removed, so structural equality is equality of the normalised
//! product (`m*s/s == m`).

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{RecordsError, RecordsResult};

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Unit {
    factors: BTreeMap<String, i32>,
}

impl Unit {
    /// The multiplicative identity.
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn single(name: impl Into<String>) -> Self {
        let mut factors = BTreeMap::new();
        factors.insert(name.into(), 1);
        Self { factors }
    }

    pub fn is_scalar(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn factors(&self) -> impl Iterator<Item = (&str, i32)> + '_ {
        self.factors.iter().map(|(name, power)| (name.as_str(), *power))
    }

    /// Powers saturate at the `i32` bounds. Use [`Unit::checked_multiply`] where the powers
    /// come from user input.
    #[must_use]
    pub fn multiply(&self, other: &Unit) -> Unit {
        let mut factors = self.factors.clone();
        for (name, power) in &other.factors {
            let entry = factors.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_add(*power);
        }
        factors.retain(|_, power| *power != 0);
        Unit { factors }
    }

    /// `None` if a power leaves the `i32` range.
    pub fn checked_multiply(&self, other: &Unit) -> Option<Unit> {
        let mut factors = self.factors.clone();
        for (name, power) in &other.factors {
            let entry = factors.entry(name.clone()).or_insert(0);
            *entry = entry.checked_add(*power)?;
        }
        factors.retain(|_, power| *power != 0);
        Some(Unit { factors })
    }

    #[must_use]
    pub fn invert(&self) -> Unit {
        self.raised_to(-1)
    }

    #[must_use]
    pub fn divide(&self, other: &Unit) -> Unit {
        self.multiply(&other.invert())
    }

    pub fn checked_divide(&self, other: &Unit) -> Option<Unit> {
        self.checked_multiply(&other.checked_raised_to(-1)?)
    }

    /// Powers saturate at the `i32` bounds, like [`Unit::multiply`].
    #[must_use]
    pub fn raised_to(&self, power: i32) -> Unit {
        if power == 0 {
            return Unit::scalar();
        }
        Unit {
            factors: self
                .factors
                .iter()
                .map(|(name, p)| (name.clone(), p.saturating_mul(power)))
                .collect(),
        }
    }

    pub fn checked_raised_to(&self, power: i32) -> Option<Unit> {
        if power == 0 {
            return Some(Unit::scalar());
        }
        let factors = self
            .factors
            .iter()
            .map(|(name, p)| Some((name.clone(), p.checked_mul(power)?)))
            .collect::<Option<_>>()?;
        Some(Unit { factors })
    }
}

fn write_factor(f: &mut fmt::Formatter<'_>, name: &str, power: i32) -> fmt::Result {
    if power == 1 {
        f.write_str(name)
    } else {
        write!(f, "{name}^{power}")
    }
}

/// Writes the unit in the unit expression grammar: `kg*m/s^2`, `1/s`, `1` for scalar.
///
/// Everything after the single `/` is the denominator, matching the parser where `*` binds
/// tighter than `/`.
impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numerator: Vec<(&str, i32)> = self.factors().filter(|(_, p)| *p > 0).collect();
        let denominator: Vec<(&str, i32)> = self
            .factors()
            .filter(|(_, p)| *p < 0)
            .map(|(name, p)| (name, -p))
            .collect();

        if numerator.is_empty() {
            f.write_str("1")?;
        }
        for (i, (name, power)) in numerator.iter().enumerate() {
            if i > 0 {
                f.write_str("*")?;
            }
            write_factor(f, name, *power)?;
        }
        if !denominator.is_empty() {
            f.write_str("/")?;
            for (i, (name, power)) in denominator.iter().enumerate() {
                if i > 0 {
                    f.write_str("*")?;
                }
                write_factor(f, name, *power)?;
            }
        }
        Ok(())
    }
}

/// A named unit known to the [`UnitManager`].
///
/// `equivalent` defines this unit as `scale` times another unit (`km = 1000 m`). The
/// category is only used to group units in pickers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitDeclaration {
    pub name: String,
    pub description: String,
    pub prefix: String,
    pub suffix: String,
    pub equivalent: Option<(Decimal, Unit)>,
    pub category: String,
}

impl UnitDeclaration {
    pub fn base(name: &str, description: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            prefix: String::new(),
            suffix: String::new(),
            equivalent: None,
            category: category.to_string(),
        }
    }

    pub fn derived(
        name: &str,
        description: &str,
        category: &str,
        scale: Decimal,
        unit: Unit,
    ) -> Self {
        Self {
            equivalent: Some((scale, unit)),
            ..Self::base(name, description, category)
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    #[must_use]
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = suffix.to_string();
        self
    }
}

/// Registry of unit declarations for one document.
#[derive(Clone, Debug)]
pub struct UnitManager {
    declarations: BTreeMap<String, UnitDeclaration>,
    builtin: Vec<String>,
}

impl Default for UnitManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitManager {
    pub fn new() -> Self {
        let mut manager = Self {
            declarations: BTreeMap::new(),
            builtin: Vec::new(),
        };
        for declaration in builtin_units() {
            manager.builtin.push(declaration.name.clone());
            manager
                .declarations
                .insert(declaration.name.clone(), declaration);
        }
        manager
    }

    /// Resolves a single unit name for use in an expression.
    pub fn load_use(&self, name: &str) -> RecordsResult<Unit> {
        if self.declarations.contains_key(name) {
            Ok(Unit::single(name))
        } else {
            Err(RecordsError::user(format!("unknown unit: {name}")))
        }
    }

    pub fn declaration(&self, name: &str) -> Option<&UnitDeclaration> {
        self.declarations.get(name)
    }

    pub fn declarations(&self) -> impl Iterator<Item = &UnitDeclaration> {
        self.declarations.values()
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.iter().any(|b| b == name)
    }

    /// User-declared units, in name order.
    pub fn user_declarations(&self) -> impl Iterator<Item = &UnitDeclaration> {
        self.declarations
            .values()
            .filter(|decl| !self.is_builtin(&decl.name))
    }

    pub fn add_user_unit(&mut self, declaration: UnitDeclaration) -> RecordsResult<()> {
        if !crate::ids::is_valid_ident(&declaration.name) {
            return Err(RecordsError::user(format!(
                "invalid unit name: {:?}",
                declaration.name
            )));
        }
        if self.declarations.contains_key(&declaration.name) {
            return Err(RecordsError::user(format!(
                "duplicate unit: {}",
                declaration.name
            )));
        }
        if let Some((scale, unit)) = &declaration.equivalent {
            if scale.is_zero() {
                return Err(RecordsError::user(format!(
                    "unit {} cannot be defined as zero times another unit",
                    declaration.name
                )));
            }
            // Only previously declared units may appear, which also rules out cycles.
            for (name, _) in unit.factors() {
                if !self.declarations.contains_key(name) {
                    return Err(RecordsError::user(format!(
                        "unit {} is defined in terms of unknown unit {name}",
                        declaration.name
                    )));
                }
            }
        }
        log::debug!("registering unit {}", declaration.name);
        self.declarations
            .insert(declaration.name.clone(), declaration);
        Ok(())
    }

    /// Expresses `unit` as `scale * base` where `base` only contains units without an
    /// equivalent definition.
    pub fn canonicalise(&self, unit: &Unit) -> RecordsResult<(Decimal, Unit)> {
        let mut scale = Decimal::ONE;
        let mut base = Unit::scalar();
        for (name, power) in unit.factors() {
            let declaration = self
                .declarations
                .get(name)
                .ok_or_else(|| RecordsError::user(format!("unknown unit: {name}")))?;
            let (factor_scale, factor_base) = match &declaration.equivalent {
                Some((s, u)) => {
                    let (inner_scale, inner_base) = self.canonicalise(u)?;
                    let combined = s
                        .checked_mul(inner_scale)
                        .ok_or_else(|| RecordsError::user("unit scale overflow"))?;
                    (combined, inner_base)
                }
                None => (Decimal::ONE, Unit::single(name)),
            };
            scale = multiply_power(scale, factor_scale, power)?;
            base = base.multiply(&factor_base.raised_to(power));
        }
        Ok((scale, base))
    }

    /// Multiplier converting a quantity in `from` into `to`.
    pub fn conversion_factor(&self, from: &Unit, to: &Unit) -> RecordsResult<Decimal> {
        let (from_scale, from_base) = self.canonicalise(from)?;
        let (to_scale, to_base) = self.canonicalise(to)?;
        if from_base != to_base {
            return Err(RecordsError::user(format!(
                "cannot convert {from} to {to}: units are not compatible"
            )));
        }
        from_scale
            .checked_div(to_scale)
            .ok_or_else(|| RecordsError::user("unit scale overflow"))
    }
}

fn multiply_power(acc: Decimal, factor: Decimal, power: i32) -> RecordsResult<Decimal> {
    let mut acc = acc;
    for _ in 0..power.unsigned_abs() {
        acc = if power > 0 {
            acc.checked_mul(factor)
        } else {
            acc.checked_div(factor)
        }
        .ok_or_else(|| RecordsError::user("unit scale overflow"))?;
    }
    Ok(acc)
}

fn builtin_units() -> Vec<UnitDeclaration> {
    let m = Unit::single("m");
    let s = Unit::single("s");
    vec![
        UnitDeclaration::base("m", "metre", "Distance"),
        UnitDeclaration::derived("cm", "centimetre", "Distance", Decimal::new(1, 2), m.clone()),
        UnitDeclaration::derived("mm", "millimetre", "Distance", Decimal::new(1, 3), m.clone()),
        UnitDeclaration::derived("km", "kilometre", "Distance", Decimal::new(1000, 0), m.clone()),
        UnitDeclaration::derived("inch", "inch", "Distance", Decimal::new(254, 4), m),
        UnitDeclaration::derived(
            "ft",
            "foot",
            "Distance",
            Decimal::new(12, 0),
            Unit::single("inch"),
        ),
        UnitDeclaration::base("s", "second", "Time"),
        UnitDeclaration::derived("min", "minute", "Time", Decimal::new(60, 0), s),
        UnitDeclaration::derived(
            "hour",
            "hour",
            "Time",
            Decimal::new(60, 0),
            Unit::single("min"),
        ),
        UnitDeclaration::derived(
            "day",
            "day",
            "Time",
            Decimal::new(24, 0),
            Unit::single("hour"),
        ),
        UnitDeclaration::base("g", "gram", "Mass"),
        UnitDeclaration::derived(
            "kg",
            "kilogram",
            "Mass",
            Decimal::new(1000, 0),
            Unit::single("g"),
        ),
        UnitDeclaration::base("USD", "US dollar", "Currency").with_prefix("$"),
        UnitDeclaration::base("EUR", "euro", "Currency").with_prefix("€"),
        UnitDeclaration::base("GBP", "pound sterling", "Currency").with_prefix("£"),
        UnitDeclaration::base("percent", "percent", "Other").with_suffix("%"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalisation_cancels_opposite_powers() {
        let m = Unit::single("m");
        let s = Unit::single("s");
        let speed = m.divide(&s);
        assert_eq!(speed.multiply(&s), m);
        assert!(speed.divide(&speed).is_scalar());
        assert_eq!(speed.raised_to(0), Unit::scalar());
    }

    #[test]
    fn powers_out_of_range_are_caught() {
        let big = Unit::single("m").raised_to(2_000_000_000);
        assert_eq!(big.checked_raised_to(2), None);
        assert_eq!(big.checked_multiply(&big), None);
        assert_eq!(big.checked_divide(&big), Some(Unit::scalar()));
        assert_eq!(
            big.checked_raised_to(-1),
            Some(Unit::single("m").raised_to(-2_000_000_000))
        );
        // The unchecked forms saturate rather than wrap.
        assert_eq!(big.multiply(&big), Unit::single("m").raised_to(i32::MAX));
    }

    #[test]
    fn display_uses_single_denominator() {
        let m = Unit::single("m");
        let s = Unit::single("s");
        let kg = Unit::single("kg");
        assert_eq!(Unit::scalar().to_string(), "1");
        assert_eq!(m.divide(&s.raised_to(2)).to_string(), "m/s^2");
        assert_eq!(kg.multiply(&m).to_string(), "kg*m");
        assert_eq!(s.invert().to_string(), "1/s");
        assert_eq!(m.divide(&s.multiply(&kg)).to_string(), "m/kg*s");
    }

    #[test]
    fn canonicalise_follows_equivalent_chains() {
        let units = UnitManager::new();
        let (scale, base) = units.canonicalise(&Unit::single("ft")).unwrap();
        assert_eq!(scale, Decimal::new(3048, 4));
        assert_eq!(base, Unit::single("m"));

        let per_hour = Unit::single("km").divide(&Unit::single("hour"));
        let factor = units
            .conversion_factor(&per_hour, &Unit::single("m").divide(&Unit::single("s")))
            .unwrap();
        assert_eq!(factor.round_dp(6), Decimal::new(277778, 6));
    }

    #[test]
    fn conversion_between_incompatible_units_fails() {
        let units = UnitManager::new();
        let err = units
            .conversion_factor(&Unit::single("m"), &Unit::single("s"))
            .unwrap_err();
        assert!(err.to_string().contains("not compatible"));
    }

    #[test]
    fn user_units_must_reference_known_units() {
        let mut units = UnitManager::new();
        let furlong = UnitDeclaration::derived(
            "furlong",
            "furlong",
            "Distance",
            Decimal::new(201168, 3),
            Unit::single("m"),
        );
        units.add_user_unit(furlong.clone()).unwrap();
        assert!(units.add_user_unit(furlong).is_err());

        let bad = UnitDeclaration::derived(
            "league",
            "league",
            "Distance",
            Decimal::new(3, 0),
            Unit::single("mile"),
        );
        assert!(units.add_user_unit(bad).is_err());
        assert_eq!(units.load_use("furlong").unwrap(), Unit::single("furlong"));
        assert!(units.load_use("mile").is_err());
        let user: Vec<&str> = units.user_declarations().map(|d| d.name.as_str()).collect();
        assert_eq!(user, vec!["furlong"]);
    }
}
