//! Fixed-point receipt amounts

use serde::{Serialize, Serializer};
use std::fmt;

/// Receipt total in minor currency units (kopecks, tyiyn, tiyn)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Sum(i64);

impl Sum {
    pub const fn from_minor_units(units: i64) -> Self {
        Sum(units)
    }

    /// Parses a non-negative decimal amount (`1600`, `10.5`, `10.50`).
    ///
    /// Digits past the second fractional place must be zeros.
    pub fn parse_decimal(raw: &str) -> Option<Sum> {
        let (whole, frac) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if raw.contains('.') && frac.is_empty() {
            return None;
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if frac.len() > 2 && frac[2..].bytes().any(|b| b != b'0') {
            return None;
        }

        let whole: i64 = whole.parse().ok()?;
        let mut cents = 0i64;
        for (i, b) in frac.bytes().take(2).enumerate() {
            let digit = i64::from(b - b'0');
            cents += if i == 0 { digit * 10 } else { digit };
        }
        whole.checked_mul(100)?.checked_add(cents).map(Sum)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Sum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(Sum::parse_decimal("10.50"), Some(Sum(1050)));
        assert_eq!(Sum::parse_decimal("10.5"), Some(Sum(1050)));
        assert_eq!(Sum::parse_decimal("1600"), Some(Sum(160000)));
        assert_eq!(Sum::parse_decimal("1600.120"), Some(Sum(160012)));
        assert_eq!(Sum::parse_decimal("0.07"), Some(Sum(7)));
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        for raw in ["", ".5", "10.", "1,50", "-1.00", "1.005", "1e3", "abc", "1.2.3"] {
            assert_eq!(Sum::parse_decimal(raw), None, "accepted {:?}", raw);
        }
    }

    #[test]
    fn test_display_always_two_decimals() {
        assert_eq!(Sum(1050).to_string(), "10.50");
        assert_eq!(Sum(7).to_string(), "0.07");
        assert_eq!(Sum(12300).to_string(), "123.00");
        assert_eq!(Sum(-250).to_string(), "-2.50");
    }
}
