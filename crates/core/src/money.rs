//! Exact, currency-tagged monetary amounts.
//!
//! `Money` stores a scaled integer (4 fractional digits) — never a binary
//! float — so repeated credits/debits cannot accumulate rounding drift. All
//! arithmetic is checked and currency-aware: mixing currencies is an error,
//! never a silent coercion.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Number of fractional decimal digits carried by every `Money`.
pub const MONEY_SCALE: u32 = 4;

/// Minor units per whole currency unit (10^MONEY_SCALE).
pub const MINOR_PER_UNIT: i64 = 10_000;

/// Validated 3-letter uppercase currency code (e.g. "USD").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Currency([u8; 3]);

impl Currency {
    /// Parse and normalize a currency code.
    ///
    /// Accepts exactly three ASCII letters; stored uppercase.
    pub fn new(code: &str) -> DomainResult<Self> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::invalid_id(format!(
                "currency code must be 3 ASCII letters, got {code:?}"
            )));
        }
        let mut out = [0u8; 3];
        for (i, b) in bytes.iter().enumerate() {
            out[i] = b.to_ascii_uppercase();
        }
        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII.
        core::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CurrencyVisitor;

        impl Visitor<'_> for CurrencyVisitor {
            type Value = Currency;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 3-letter currency code")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Currency, E> {
                Currency::new(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(CurrencyVisitor)
    }
}

impl ValueObject for Currency {}

/// Exact fixed-point monetary amount.
///
/// Immutable: every operation returns a new `Money`. The sign is carried so
/// intermediate arithmetic (fee breakdowns, reconciliation deltas) can go
/// negative; `Wallet` is where the non-negative balance invariant lives.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    minor: i64,
    currency: Currency,
}

impl Money {
    /// Construct from minor units (1 unit = 10^-4 of the currency).
    pub fn from_minor(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self { minor: 0, currency }
    }

    /// Parse an exact decimal string at scale 4 (e.g. `"15.99"`, `"-0.5"`).
    ///
    /// Fails with `InvalidAmount` when the value cannot be represented
    /// exactly: more than 4 fractional digits, malformed input, or overflow.
    pub fn parse(input: &str, currency: Currency) -> DomainResult<Self> {
        let bad = || DomainError::invalid_amount(format!("not a decimal amount: {input:?}"));

        let (negative, rest) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input),
        };

        let (int_part, frac_part) = match rest.split_once('.') {
            Some((i, f)) => (i, f),
            None => (rest, ""),
        };

        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if frac_part.len() > MONEY_SCALE as usize {
            return Err(DomainError::invalid_amount(format!(
                "more than {MONEY_SCALE} fractional digits: {input:?}"
            )));
        }

        let units: i64 = int_part
            .parse()
            .map_err(|_| DomainError::invalid_amount(format!("amount out of range: {input:?}")))?;

        let mut frac: i64 = 0;
        if !frac_part.is_empty() {
            frac = frac_part.parse().map_err(|_| bad())?;
            for _ in 0..(MONEY_SCALE as usize - frac_part.len()) {
                frac *= 10;
            }
        }

        let magnitude = units
            .checked_mul(MINOR_PER_UNIT)
            .and_then(|m| m.checked_add(frac))
            .ok_or_else(|| DomainError::invalid_amount(format!("amount out of range: {input:?}")))?;

        let minor = if negative { -magnitude } else { magnitude };
        Ok(Self { minor, currency })
    }

    pub fn minor(&self) -> i64 {
        self.minor
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    pub fn is_negative(&self) -> bool {
        self.minor < 0
    }

    fn ensure_same_currency(&self, other: &Self) -> DomainResult<()> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                expected: self.currency,
                actual: other.currency,
            });
        }
        Ok(())
    }

    /// Checked addition; currencies must match.
    pub fn checked_add(self, other: Self) -> DomainResult<Self> {
        self.ensure_same_currency(&other)?;
        let minor = self
            .minor
            .checked_add(other.minor)
            .ok_or_else(|| DomainError::invalid_amount("amount overflow"))?;
        Ok(Self { minor, ..self })
    }

    /// Checked subtraction; currencies must match. The result may be
    /// negative — callers decide whether that is acceptable.
    pub fn checked_sub(self, other: Self) -> DomainResult<Self> {
        self.ensure_same_currency(&other)?;
        let minor = self
            .minor
            .checked_sub(other.minor)
            .ok_or_else(|| DomainError::invalid_amount("amount underflow"))?;
        Ok(Self { minor, ..self })
    }

    /// Multiply by basis points (100 bps = 1%) with deterministic rounding
    /// (half away from zero). This is the only multiplication the ledger
    /// needs — markup and platform-fee percentages.
    pub fn mul_bps(self, bps: u32) -> DomainResult<Self> {
        let scaled = (self.minor as i128) * (bps as i128);
        let rounded = if scaled >= 0 {
            (scaled + 5_000) / 10_000
        } else {
            (scaled - 5_000) / 10_000
        };
        let minor = i64::try_from(rounded)
            .map_err(|_| DomainError::invalid_amount("amount overflow in bps multiply"))?;
        Ok(Self { minor, ..self })
    }

    /// Currency-checked comparison.
    pub fn compare(&self, other: &Self) -> DomainResult<Ordering> {
        self.ensure_same_currency(other)?;
        Ok(self.minor.cmp(&other.minor))
    }

    /// Fixed-scale decimal rendering without the currency code, e.g. `"15.9900"`.
    pub fn to_decimal_string(&self) -> String {
        let abs = self.minor.unsigned_abs();
        let sign = if self.minor < 0 { "-" } else { "" };
        format!(
            "{sign}{}.{:04}",
            abs / MINOR_PER_UNIT as u64,
            abs % MINOR_PER_UNIT as u64
        )
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}

impl ValueObject for Money {}
