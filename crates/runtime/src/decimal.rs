//! 128-bit decimal numbers
//!
//! The `decimal` kind uses the CLR bit layout so heap images are exactly
//! 16 bytes:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬───────────────────────────┐
//! │ lo (u32) │ mid(u32) │ hi (u32) │ flags (u32)               │
//! │          96-bit magnitude      │ bits 16..23 scale (0..=28)│
//! │                                │ bit 31 sign               │
//! └──────────┴──────────┴──────────┴───────────────────────────┘
//! ```
//!
//! Value = (-1)^sign * magnitude * 10^-scale. Arithmetic is exact within
//! the 96-bit envelope; anything that would leave it raises `Overflow`.
//! Rounding, where required, is round-half-to-even.

use sable_core::error::{ErrorKind, RunResult, err};

/// Largest representable magnitude: 2^96 - 1
const MAX_MAGNITUDE: u128 = (1u128 << 96) - 1;

/// Largest scale (digits right of the decimal point)
pub const MAX_SCALE: u8 = 28;

/// A 128-bit decimal value.
#[derive(Debug, Clone, Copy)]
pub struct Dec {
    magnitude: u128,
    scale: u8,
    negative: bool,
}

impl Dec {
    pub const ZERO: Dec = Dec {
        magnitude: 0,
        scale: 0,
        negative: false,
    };

    pub fn new(magnitude: u128, scale: u8, negative: bool) -> RunResult<Dec> {
        if magnitude > MAX_MAGNITUDE {
            return Err(err(ErrorKind::Overflow, "decimal magnitude overflow"));
        }
        if scale > MAX_SCALE {
            return Err(err(ErrorKind::Overflow, "decimal scale out of range"));
        }
        Ok(Dec {
            magnitude,
            scale,
            negative: negative && magnitude != 0,
        })
    }

    pub fn from_i64(v: i64) -> Dec {
        Dec {
            magnitude: v.unsigned_abs() as u128,
            scale: 0,
            negative: v < 0,
        }
    }

    pub fn from_u64(v: u64) -> Dec {
        Dec {
            magnitude: v as u128,
            scale: 0,
            negative: false,
        }
    }

    /// Lossy conversion from binary floating point, via the shortest
    /// decimal rendering (mirrors the CLR's double→decimal conversion
    /// closely enough for sandbox arithmetic).
    pub fn from_f64(v: f64) -> RunResult<Dec> {
        if !v.is_finite() {
            return Err(err(ErrorKind::Overflow, "cannot convert non-finite value to decimal"));
        }
        Self::parse(&format!("{v}")).map_err(|_| err(ErrorKind::Overflow, "double out of decimal range"))
    }

    pub fn to_f64(self) -> f64 {
        let m = self.magnitude as f64;
        let v = m / 10f64.powi(self.scale as i32);
        if self.negative { -v } else { v }
    }

    /// Truncate toward zero to a signed integer.
    pub fn trunc_i128(self) -> i128 {
        let whole = (self.magnitude / pow10(self.scale)) as i128;
        if self.negative { -whole } else { whole }
    }

    pub fn is_zero(self) -> bool {
        self.magnitude == 0
    }

    pub fn is_negative(self) -> bool {
        self.negative
    }

    pub fn neg(self) -> Dec {
        Dec {
            negative: !self.negative && self.magnitude != 0,
            ..self
        }
    }

    // ---- bit layout ----

    pub fn to_bits(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&(self.magnitude as u32).to_le_bytes());
        out[4..8].copy_from_slice(&((self.magnitude >> 32) as u32).to_le_bytes());
        out[8..12].copy_from_slice(&((self.magnitude >> 64) as u32).to_le_bytes());
        let flags = ((self.scale as u32) << 16) | ((self.negative as u32) << 31);
        out[12..16].copy_from_slice(&flags.to_le_bytes());
        out
    }

    pub fn from_bits(bits: [u8; 16]) -> RunResult<Dec> {
        let lo = u32::from_le_bytes(bits[0..4].try_into().unwrap()) as u128;
        let mid = u32::from_le_bytes(bits[4..8].try_into().unwrap()) as u128;
        let hi = u32::from_le_bytes(bits[8..12].try_into().unwrap()) as u128;
        let flags = u32::from_le_bytes(bits[12..16].try_into().unwrap());
        let scale = ((flags >> 16) & 0xFF) as u8;
        Dec::new(lo | (mid << 32) | (hi << 64), scale, flags & 0x8000_0000 != 0)
    }

    // ---- arithmetic ----

    /// Bring both operands to a common scale as signed 10^-scale units.
    fn align(self, other: Dec) -> RunResult<(i128, i128, u8)> {
        let scale = self.scale.max(other.scale);
        let a = self
            .magnitude
            .checked_mul(pow10(scale - self.scale))
            .ok_or_else(overflow)?;
        let b = other
            .magnitude
            .checked_mul(pow10(scale - other.scale))
            .ok_or_else(overflow)?;
        let a = if self.negative { -(a as i128) } else { a as i128 };
        let b = if other.negative { -(b as i128) } else { b as i128 };
        Ok((a, b, scale))
    }

    fn from_units(units: i128, scale: u8) -> RunResult<Dec> {
        let negative = units < 0;
        let mut magnitude = units.unsigned_abs();
        let mut scale = scale;
        // Shed precision only when the envelope demands it
        while magnitude > MAX_MAGNITUDE && scale > 0 {
            magnitude = div10_half_even(magnitude);
            scale -= 1;
        }
        Dec::new(magnitude, scale, negative)
    }

    pub fn add(self, other: Dec) -> RunResult<Dec> {
        let (a, b, scale) = self.align(other)?;
        Dec::from_units(a.checked_add(b).ok_or_else(overflow)?, scale)
    }

    pub fn sub(self, other: Dec) -> RunResult<Dec> {
        self.add(other.neg())
    }

    pub fn mul(self, other: Dec) -> RunResult<Dec> {
        match self.magnitude.checked_mul(other.magnitude) {
            Some(mut m) => {
                let mut scale = self.scale as u32 + other.scale as u32;
                // A full product can exceed the 96-bit envelope; round
                // fractional digits away while any remain
                while m > MAX_MAGNITUDE || scale > MAX_SCALE as u32 {
                    if scale == 0 {
                        return Err(overflow());
                    }
                    m = div10_half_even(m);
                    scale -= 1;
                }
                Dec::new(m, scale as u8, self.negative != other.negative)
            }
            None => {
                // The 128-bit product itself overflowed: shed one digit
                // of the larger operand's fraction and retry
                let (big, small) = if self.magnitude >= other.magnitude {
                    (self, other)
                } else {
                    (other, self)
                };
                if big.scale == 0 {
                    return Err(overflow());
                }
                let shrunk = Dec {
                    magnitude: div10_half_even(big.magnitude),
                    scale: big.scale - 1,
                    negative: big.negative,
                };
                shrunk.mul(small)
            }
        }
    }

    pub fn div(self, other: Dec) -> RunResult<Dec> {
        if other.is_zero() {
            return Err(err(ErrorKind::DomainError, "decimal division by zero"));
        }
        if self.is_zero() {
            return Ok(Dec::ZERO);
        }
        // Long division: produce up to MAX_SCALE fractional digits, then
        // strip the trailing zeros the division itself introduced.
        let mut quotient = self.magnitude / other.magnitude;
        let mut remainder = self.magnitude % other.magnitude;
        let mut scale = self.scale as i32 - other.scale as i32;
        while remainder != 0 && scale < MAX_SCALE as i32 {
            match quotient.checked_mul(10) {
                Some(q10) => {
                    let digit = remainder * 10 / other.magnitude;
                    remainder = remainder * 10 % other.magnitude;
                    quotient = q10 + digit;
                    scale += 1;
                }
                None => break,
            }
        }
        while scale < 0 {
            quotient = quotient.checked_mul(10).ok_or_else(overflow)?;
            scale += 1;
        }
        let mut d = Dec::from_units(
            if self.negative != other.negative {
                -(quotient as i128)
            } else {
                quotient as i128
            },
            scale as u8,
        )?;
        while d.scale > 0 && d.magnitude % 10 == 0 {
            d.magnitude /= 10;
            d.scale -= 1;
        }
        Ok(d)
    }

    pub fn rem(self, other: Dec) -> RunResult<Dec> {
        if other.is_zero() {
            return Err(err(ErrorKind::DomainError, "decimal division by zero"));
        }
        let (a, b, scale) = self.align(other)?;
        Dec::from_units(a % b, scale)
    }

    pub fn cmp_dec(self, other: Dec) -> std::cmp::Ordering {
        match self.align(other) {
            Ok((a, b, _)) => a.cmp(&b),
            // Alignment can only overflow for enormous magnitudes; fall
            // back to the lossy path for the comparison
            Err(_) => self
                .to_f64()
                .partial_cmp(&other.to_f64())
                .unwrap_or(std::cmp::Ordering::Equal),
        }
    }

    // ---- text ----

    /// Culture-invariant parse: `[+-]?digits[.digits]`.
    pub fn parse(text: &str) -> RunResult<Dec> {
        let t = text.trim();
        let (negative, t) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t.strip_prefix('+').unwrap_or(t)),
        };
        let (whole, frac) = match t.split_once('.') {
            Some((w, f)) => (w, f),
            None => (t, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(err(ErrorKind::TypeMismatch, format!("'{text}' is not a decimal")));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err(ErrorKind::TypeMismatch, format!("'{text}' is not a decimal")));
        }
        let mut magnitude: u128 = 0;
        let mut scale: u8 = 0;
        for c in whole.chars().chain(frac.chars()) {
            magnitude = magnitude
                .checked_mul(10)
                .and_then(|m| m.checked_add((c as u8 - b'0') as u128))
                .ok_or_else(overflow)?;
        }
        let mut frac_len = frac.len();
        // Round excess fractional digits half-to-even
        while frac_len > MAX_SCALE as usize {
            magnitude = div10_half_even(magnitude);
            frac_len -= 1;
        }
        scale += frac_len as u8;
        while magnitude > MAX_MAGNITUDE && scale > 0 {
            magnitude = div10_half_even(magnitude);
            scale -= 1;
        }
        Dec::new(magnitude, scale, negative)
    }
}

impl PartialEq for Dec {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_dec(*other) == std::cmp::Ordering::Equal
    }
}

impl std::fmt::Display for Dec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digits = self.magnitude.to_string();
        let sign = if self.negative { "-" } else { "" };
        if self.scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let scale = self.scale as usize;
        if digits.len() > scale {
            let (w, fr) = digits.split_at(digits.len() - scale);
            write!(f, "{sign}{w}.{fr}")
        } else {
            write!(f, "{sign}0.{0:0>1$}", digits, scale)
        }
    }
}

fn pow10(n: u8) -> u128 {
    10u128.pow(n as u32)
}

fn overflow() -> sable_core::RuntimeError {
    err(ErrorKind::Overflow, "decimal overflow")
}

/// Divide by ten, rounding half to even.
fn div10_half_even(m: u128) -> u128 {
    let q = m / 10;
    let r = m % 10;
    if r > 5 || (r == 5 && q % 2 == 1) { q + 1 } else { q }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Dec {
        Dec::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(d("123.45").to_string(), "123.45");
        assert_eq!(d("-0.5").to_string(), "-0.5");
        assert_eq!(d("10").to_string(), "10");
        assert_eq!(d("0.001").to_string(), "0.001");
        assert_eq!(d("1.10").to_string(), "1.10");
        assert!(Dec::parse("abc").is_err());
        assert!(Dec::parse("").is_err());
    }

    #[test]
    fn test_add_aligns_scales() {
        assert_eq!(d("1.5").add(d("2.25")).unwrap().to_string(), "3.75");
        assert_eq!(d("0.1").add(d("0.2")).unwrap().to_string(), "0.3");
        assert_eq!(d("1").sub(d("0.001")).unwrap().to_string(), "0.999");
    }

    #[test]
    fn test_mul() {
        assert_eq!(d("1.5").mul(d("2")).unwrap().to_string(), "3.0");
        assert_eq!(d("-0.5").mul(d("0.5")).unwrap().to_string(), "-0.25");
    }

    #[test]
    fn test_div() {
        assert_eq!(d("1").div(d("4")).unwrap().to_string(), "0.25");
        assert_eq!(d("10").div(d("2")).unwrap().to_string(), "5");
        assert_eq!(
            d("1").div(Dec::ZERO).unwrap_err().kind,
            ErrorKind::DomainError
        );
    }

    #[test]
    fn test_rem() {
        assert_eq!(d("7.5").rem(d("2")).unwrap().to_string(), "1.5");
    }

    #[test]
    fn test_compare() {
        assert!(d("1.5") == d("1.50"));
        assert_eq!(d("2").cmp_dec(d("1.9")), std::cmp::Ordering::Greater);
        assert_eq!(d("-3").cmp_dec(d("1")), std::cmp::Ordering::Less);
    }

    #[test]
    fn test_bits_round_trip() {
        for s in ["0", "123.456", "-79228162514264337593543950335", "0.0000000000000000000000000001"] {
            let v = d(s);
            let back = Dec::from_bits(v.to_bits()).unwrap();
            assert_eq!(v.cmp_dec(back), std::cmp::Ordering::Equal, "{s}");
            assert_eq!(v.to_string(), back.to_string(), "{s}");
        }
    }

    #[test]
    fn test_overflow() {
        let max = d("79228162514264337593543950335");
        assert_eq!(max.add(d("1")).unwrap_err().kind, ErrorKind::Overflow);
        assert_eq!(max.mul(d("2")).unwrap_err().kind, ErrorKind::Overflow);
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(Dec::from_i64(-42).to_string(), "-42");
        assert_eq!(Dec::from_f64(2.5).unwrap().to_string(), "2.5");
        assert_eq!(d("9.9").trunc_i128(), 9);
        assert_eq!(d("-9.9").trunc_i128(), -9);
    }
}
