//! Fixed-point money helpers. Amounts carry two fractional digits.

use bigdecimal::{BigDecimal, RoundingMode};

/// Fractional digits of the settlement currency's minor unit
pub const MINOR_UNIT_SCALE: i64 = 2;

/// Positive and representable in minor units.
pub fn is_valid_amount(amount: &BigDecimal) -> bool {
    *amount > BigDecimal::from(0) && fits_minor_units(amount)
}

pub fn fits_minor_units(amount: &BigDecimal) -> bool {
    amount.with_scale(MINOR_UNIT_SCALE) == *amount
}

/// Round half-up to the minor unit.
pub fn round_minor(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(MINOR_UNIT_SCALE, RoundingMode::HalfUp)
}

/// Render with exactly two fractional digits, e.g. `900.00`.
pub fn format_amount(amount: &BigDecimal) -> String {
    round_minor(amount).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn validity() {
        assert!(is_valid_amount(&d("0.01")));
        assert!(is_valid_amount(&d("1000")));
        assert!(!is_valid_amount(&d("0")));
        assert!(!is_valid_amount(&d("-5")));
        assert!(!is_valid_amount(&d("1.001")));
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_minor(&d("0.125")), d("0.13"));
        assert_eq!(round_minor(&d("0.124")), d("0.12"));
        assert_eq!(format_amount(&d("900")), "900.00");
    }
}
