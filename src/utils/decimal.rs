//! Decimal arithmetic utilities for price comparisons.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Calculate basis points (1 bp = 0.01%), `None` on overflow.
pub fn to_basis_points(rate: Decimal) -> Option<Decimal> {
    rate.checked_mul(dec!(10000))
}

/// Relative gap between two prices in basis points, measured against the
/// lower of the two. Symmetric in its arguments.
///
/// Returns `None` when the gap is too large to represent, which happens
/// for prices many orders of magnitude apart.
pub fn deviation_bps(a: Decimal, b: Decimal) -> Option<Decimal> {
    let base = a.min(b);
    if base <= Decimal::ZERO {
        return Some(Decimal::ZERO);
    }
    to_basis_points((a - b).abs().checked_div(base)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_points() {
        assert_eq!(to_basis_points(dec!(0.0001)), Some(dec!(1))); // 0.01% = 1 bp
        assert_eq!(to_basis_points(dec!(0.05)), Some(dec!(500))); // 5% = 500 bp
        assert_eq!(to_basis_points(Decimal::MAX), None);
    }

    #[test]
    fn test_deviation_bps() {
        // 2000 vs 2120 = 6%
        assert_eq!(deviation_bps(dec!(2000), dec!(2120)), Some(dec!(600)));
        assert_eq!(deviation_bps(dec!(2120), dec!(2000)), Some(dec!(600)));

        // 1850 vs 2000 ~ 8.1%
        let dev = deviation_bps(dec!(1850), dec!(2000)).unwrap();
        assert!(dev > dec!(810) && dev < dec!(811));

        assert_eq!(deviation_bps(dec!(2000), dec!(2000)), Some(Decimal::ZERO));
        assert_eq!(deviation_bps(Decimal::ZERO, dec!(2000)), Some(Decimal::ZERO));
    }

    #[test]
    fn test_deviation_overflow_is_none() {
        let dust = Decimal::new(1, 25);
        assert_eq!(deviation_bps(dust, dec!(2000)), None);
        assert_eq!(deviation_bps(dec!(2000), dust), None);
        assert_eq!(deviation_bps(dust, Decimal::MAX), None);
    }
}
