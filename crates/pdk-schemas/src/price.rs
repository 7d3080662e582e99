//! Integer minor-unit price representation.
//!
//! All prices inside the workspace are `i64` hundredths (kopecks, cents).
//! Decimal strings and JSON numbers are converted only at the edges: the
//! marketplace wire format, HTTP request bodies, and the database.
//!
//! | Direction                    | Function            |
//! |------------------------------|---------------------|
//! | decimal string → internal    | [`Price::parse`]    |
//! | JSON number → internal       | [`Price::from_f64`] |
//! | internal → decimal string    | `Display`           |

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Scale factor: 1 currency unit = 100 minor units.
pub const MINOR_PER_UNIT: i64 = 100;

/// One basis point is 1/10_000.
pub const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    Empty,
    Invalid(String),
    NotFinite,
    OutOfRange,
}

impl fmt::Display for PriceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceError::Empty => write!(f, "price: empty input"),
            PriceError::Invalid(raw) => write!(f, "price: not a decimal number: {raw:?}"),
            PriceError::NotFinite => write!(f, "price: non-finite input (NaN or Inf)"),
            PriceError::OutOfRange => write!(f, "price: out of i64 range after scaling"),
        }
    }
}

impl std::error::Error for PriceError {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(i64);

impl Price {
    pub const ZERO: Price = Price(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn from_units(units: i64) -> Option<Self> {
        units.checked_mul(MINOR_PER_UNIT).map(Self)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Parse a decimal string such as `"80"`, `"80.5"` or `"1234.0000"`.
    ///
    /// Digits beyond the second decimal place are rounded half-up (away from
    /// zero), which matches how the marketplace pads its price strings.
    pub fn parse(raw: &str) -> Result<Self, PriceError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(PriceError::Empty);
        }

        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(PriceError::Invalid(raw.to_string()));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(PriceError::Invalid(raw.to_string()));
        }

        let units: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| PriceError::OutOfRange)?
        };

        let frac = frac_part.as_bytes();
        let digit = |i: usize| frac.get(i).map(|b| i64::from(b - b'0')).unwrap_or(0);
        let mut cents = digit(0) * 10 + digit(1);
        if digit(2) >= 5 {
            cents += 1;
        }

        let minor = units
            .checked_mul(MINOR_PER_UNIT)
            .and_then(|v| v.checked_add(cents))
            .ok_or(PriceError::OutOfRange)?;

        Ok(Self(if negative { -minor } else { minor }))
    }

    /// Convert a JSON/float price. Only used when decoding loosely typed input.
    pub fn from_f64(value: f64) -> Result<Self, PriceError> {
        if !value.is_finite() {
            return Err(PriceError::NotFinite);
        }
        let scaled = (value * MINOR_PER_UNIT as f64).round();
        if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
            return Err(PriceError::OutOfRange);
        }
        Ok(Self(scaled as i64))
    }

    /// Apply a ratio expressed in basis points, rounding half-up.
    ///
    /// `Price::from_minor(10_000).scale_bps(7_200)` is `72.00`.
    pub fn scale_bps(self, bps: u32) -> Price {
        let num = i128::from(self.0) * i128::from(bps);
        let den = i128::from(BPS_DENOMINATOR);
        let half = den / 2;
        let rounded = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        Price(rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let unit = MINOR_PER_UNIT as u64;
        write!(f, "{sign}{}.{:02}", abs / unit, abs % unit)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct PriceVisitor;

impl<'de> Visitor<'de> for PriceVisitor {
    type Value = Price;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal price as string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Price, E> {
        Price::parse(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Price, E> {
        Price::from_units(v).ok_or_else(|| E::custom(PriceError::OutOfRange))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Price, E> {
        i64::try_from(v)
            .ok()
            .and_then(Price::from_units)
            .ok_or_else(|| E::custom(PriceError::OutOfRange))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Price, E> {
        Price::from_f64(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Price, D::Error> {
        deserializer.deserialize_any(PriceVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pads_and_rounds_marketplace_strings() {
        assert_eq!(Price::parse("80").unwrap(), Price::from_minor(8_000));
        assert_eq!(Price::parse("80.5").unwrap(), Price::from_minor(8_050));
        assert_eq!(Price::parse("1234.0000").unwrap(), Price::from_minor(123_400));
        assert_eq!(Price::parse("0.125").unwrap(), Price::from_minor(13));
        assert_eq!(Price::parse(" -3.10 ").unwrap(), Price::from_minor(-310));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(Price::parse("   "), Err(PriceError::Empty));
        assert!(matches!(Price::parse("12,50"), Err(PriceError::Invalid(_))));
        assert!(matches!(Price::parse("."), Err(PriceError::Invalid(_))));
        assert!(matches!(Price::parse("1e3"), Err(PriceError::Invalid(_))));
    }

    #[test]
    fn display_is_two_decimal_string() {
        assert_eq!(Price::from_minor(8_000).to_string(), "80.00");
        assert_eq!(Price::from_minor(7).to_string(), "0.07");
        assert_eq!(Price::from_minor(-150).to_string(), "-1.50");
    }

    #[test]
    fn scale_bps_rounds_half_up() {
        assert_eq!(Price::from_minor(10_000).scale_bps(7_200), Price::from_minor(7_200));
        // 99.99 * 0.72 = 71.9928 -> 71.99
        assert_eq!(Price::from_minor(9_999).scale_bps(7_200), Price::from_minor(7_199));
        // 0.25 * 0.5 = 0.125 -> 0.13
        assert_eq!(Price::from_minor(25).scale_bps(5_000), Price::from_minor(13));
    }

    #[test]
    fn deserializes_from_string_or_number() {
        let a: Price = serde_json::from_str("\"80.00\"").unwrap();
        let b: Price = serde_json::from_str("80").unwrap();
        let c: Price = serde_json::from_str("80.0").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"80.00\"");
    }

    #[test]
    fn from_f64_rejects_nan() {
        assert_eq!(Price::from_f64(f64::NAN), Err(PriceError::NotFinite));
    }
}
