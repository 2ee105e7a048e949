//! A wall-clock instant with an embedded unit, per spec.md §4.10.
//!
//! Comparison coerces to the coarsest unit of the two operands so a
//! `Second`-precision archive header compares sanely against a
//! `Microsecond`-precision live filesystem stat.

use std::cmp::Ordering;
use std::io::{Read, Write};

use crate::error::CoreError;
use crate::infinint::Infinint;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TimeUnit {
    Second = 0,
    Microsecond = 1,
    Nanosecond = 2,
}

impl TimeUnit {
    /// Decimal exponent of one tick of this unit relative to a second
    /// (`Second` = 10^0, `Microsecond` = 10^-6, `Nanosecond` = 10^-9).
    /// Indexed by enum discriminant, not multiplied by it: the units are
    /// not evenly spaced (seconds to microseconds is 6 orders, not 3).
    fn decimal_exponent(self) -> i32
    {
        match self {
            TimeUnit::Second => 0,
            TimeUnit::Microsecond => 6,
            TimeUnit::Nanosecond => 9,
        }
    }

    fn scale_to(self, coarser: TimeUnit) -> u64
    {
        // How many of `self`'s ticks make one tick of `coarser`.
        let exp = self.decimal_exponent() - coarser.decimal_exponent();
        10u64.pow(exp.max(0) as u32)
    }

    fn from_tag(tag: u8) -> Result<Self, CoreError>
    {
        match tag {
            0 => Ok(TimeUnit::Second),
            1 => Ok(TimeUnit::Microsecond),
            2 => Ok(TimeUnit::Nanosecond),
            other => Err(CoreError::data(format!("unknown datetime unit tag {other}"))),
        }
    }
}

/// A timestamp stored as a tick count at a declared [`TimeUnit`].
///
/// Older archive versions only ever wrote seconds; `unknown_precision`
/// preserves that provenance so a differential comparison against such an
/// archive doesn't manufacture false sub-second differences.
#[derive(Clone, Debug)]
pub struct DateTime {
    unit: TimeUnit,
    ticks: Infinint,
    unknown_precision: bool,
}

impl DateTime {
    pub fn new(unit: TimeUnit, ticks: Infinint) -> Self
    {
        Self {
            unit,
            ticks,
            unknown_precision: false,
        }
    }

    pub fn from_unix_seconds(secs: u64) -> Self
    {
        Self::new(TimeUnit::Second, Infinint::from(secs))
    }

    pub fn with_unknown_precision(mut self) -> Self
    {
        self.unknown_precision = true;
        self
    }

    pub fn is_unknown_precision(&self) -> bool
    {
        self.unknown_precision
    }

    pub fn unit(&self) -> TimeUnit
    {
        self.unit
    }

    pub fn ticks(&self) -> &Infinint
    {
        &self.ticks
    }

    fn coarsest_with(&self, other: &DateTime) -> TimeUnit
    {
        self.unit.min(other.unit)
    }

    fn normalized_to(&self, target: TimeUnit) -> Infinint
    {
        let factor = self.unit.scale_to(target);
        if factor <= 1 {
            self.ticks.clone()
        } else {
            &self.ticks / &Infinint::from(factor)
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, CoreError>
    {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        let flag_and_unit = tag[0];
        let unknown_precision = flag_and_unit & 0x80 != 0;
        let unit = TimeUnit::from_tag(flag_and_unit & 0x7f)?;
        let ticks = Infinint::read_from(r)?;
        Ok(Self {
            unit,
            ticks,
            unknown_precision,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), CoreError>
    {
        let tag = self.unit as u8 | if self.unknown_precision { 0x80 } else { 0 };
        w.write_all(&[tag])?;
        self.ticks.write_to(w)?;
        Ok(())
    }
}

impl PartialEq for DateTime {
    fn eq(&self, other: &Self) -> bool
    {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DateTime {}

impl PartialOrd for DateTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering>
    {
        Some(self.cmp(other))
    }
}

impl Ord for DateTime {
    fn cmp(&self, other: &Self) -> Ordering
    {
        let coarsest = self.coarsest_with(other);
        self.normalized_to(coarsest)
            .cmp(&other.normalized_to(coarsest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_across_units()
    {
        let a = DateTime::new(TimeUnit::Second, Infinint::from(5u64));
        let b = DateTime::new(TimeUnit::Microsecond, Infinint::from(5_000_000u64));
        assert_eq!(a, b);
    }

    #[test]
    fn order_coerces_to_coarsest()
    {
        // Coercing to the coarsest unit (Second) truncates sub-second
        // precision, so a one-microsecond difference within the same
        // second must NOT be observable...
        let a = DateTime::new(TimeUnit::Second, Infinint::from(5u64));
        let same_second = DateTime::new(TimeUnit::Microsecond, Infinint::from(5_000_001u64));
        assert_eq!(a, same_second);

        // ...while a whole extra second of difference still is.
        let next_second = DateTime::new(TimeUnit::Microsecond, Infinint::from(6_000_000u64));
        assert!(a < next_second);
    }

    #[test]
    fn roundtrip_codec_preserves_unknown_precision()
    {
        let dt = DateTime::from_unix_seconds(1_700_000_000).with_unknown_precision();
        let mut buf = Vec::new();
        dt.write_to(&mut buf).unwrap();
        let back = DateTime::read_from(&mut &buf[..]).unwrap();
        assert_eq!(dt, back);
        assert!(back.is_unknown_precision());
    }
}
