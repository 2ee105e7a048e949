//! Arbitrary-precision unsigned integer with a self-delimiting binary form.
//!
//! Grounded on `fsfill::array::Array`'s pattern of a tuple-struct newtype
//! around a plain Rust container with hand-written `Serialize`/
//! `Deserialize` impls (here we hand-roll the codec directly instead of
//! going through serde, since the form is length-prefixed rather than
//! fixed-size and serde's derive has nothing to offer it).
//!
//! On disk: one `u8` giving the number of little-endian base-256 limbs,
//! followed by that many bytes, least-significant first. Every producer
//! and consumer in this crate goes through [`Infinint::read_from`] /
//! [`Infinint::write_to`], so the representation only needs to be
//! internally consistent, not bit-compatible with any reference archiver.

use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};
use std::ops::{Add, Div, Mul, Rem, Sub};

use crate::error::CoreError;

/// An unsigned integer of unbounded size, stored as little-endian base-256
/// limbs with trailing zero limbs trimmed.
#[derive(Clone, Debug, Default, Eq)]
pub struct Infinint(Vec<u8>);

impl Infinint {
    pub fn zero() -> Self
    {
        Infinint(Vec::new())
    }

    pub fn is_zero(&self) -> bool
    {
        self.0.is_empty()
    }

    fn trimmed(mut limbs: Vec<u8>) -> Self
    {
        while matches!(limbs.last(), Some(0)) {
            limbs.pop();
        }
        Infinint(limbs)
    }

    /// Reads the self-delimiting form: one length byte, then that many
    /// little-endian bytes.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, CoreError>
    {
        let mut len_buf = [0u8; 1];
        r.read_exact(&mut len_buf)
            .map_err(|e| CoreError::data(format!("infinint length: {e}")))?;
        let len = len_buf[0] as usize;
        let mut limbs = vec![0u8; len];
        r.read_exact(&mut limbs)
            .map_err(|e| CoreError::data(format!("infinint body: {e}")))?;
        Ok(Self::trimmed(limbs))
    }

    /// Writes the self-delimiting form. Fails with [`CoreError::Limit`] if
    /// the value needs more than 255 limbs (65 kilobits) — far beyond any
    /// archive size this engine will ever see, but the limit must be
    /// explicit per spec.md's `Limit` error kind.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), CoreError>
    {
        if self.0.len() > u8::MAX as usize {
            return Err(CoreError::Limit(format!(
                "infinint needs {} limbs, more than {}",
                self.0.len(),
                u8::MAX
            )));
        }
        w.write_all(&[self.0.len() as u8])?;
        w.write_all(&self.0)?;
        Ok(())
    }

    /// Withdraws the low portion of the value into a `u64`, leaving the
    /// remainder (the high bits) in `self`. Named after the original
    /// `unstack` operation in spec.md §3.1.
    pub fn unstack(&mut self) -> u64
    {
        let mut out = 0u64;
        let take = self.0.len().min(8);
        for i in (0..take).rev() {
            out = (out << 8) | self.0[i] as u64;
        }
        self.0.drain(0..take);
        while matches!(self.0.last(), Some(0)) {
            self.0.pop();
        }
        out
    }

    pub fn shl(&self, bits: u32) -> Self
    {
        if self.is_zero() || bits == 0 {
            return self.clone();
        }
        let byte_shift = (bits / 8) as usize;
        let bit_shift = bits % 8;
        let mut limbs = vec![0u8; byte_shift];
        limbs.extend(std::iter::repeat(0u8).take(self.0.len() + 1));
        let mut carry = 0u16;
        for (i, &b) in self.0.iter().enumerate() {
            let shifted = ((b as u16) << bit_shift) | carry;
            limbs[byte_shift + i] = (shifted & 0xff) as u8;
            carry = shifted >> 8;
        }
        limbs[byte_shift + self.0.len()] = carry as u8;
        Self::trimmed(limbs)
    }

    pub fn shr(&self, bits: u32) -> Self
    {
        if self.is_zero() || bits == 0 {
            return self.clone();
        }
        let byte_shift = (bits / 8) as usize;
        if byte_shift >= self.0.len() {
            return Infinint::zero();
        }
        let bit_shift = bits % 8;
        let src = &self.0[byte_shift..];
        let mut limbs = vec![0u8; src.len()];
        for i in 0..src.len() {
            let lo = (src[i] as u16) >> bit_shift;
            let hi = if i + 1 < src.len() {
                (src[i + 1] as u16) << (8 - bit_shift)
            } else {
                0
            };
            limbs[i] = ((lo | hi) & 0xff) as u8;
        }
        Self::trimmed(limbs)
    }
}

impl From<u64> for Infinint {
    fn from(mut v: u64) -> Self
    {
        let mut limbs = Vec::new();
        while v != 0 {
            limbs.push((v & 0xff) as u8);
            v >>= 8;
        }
        Infinint(limbs)
    }
}

impl TryFrom<&Infinint> for u64 {
    type Error = CoreError;

    fn try_from(v: &Infinint) -> Result<Self, CoreError>
    {
        if v.0.len() > 8 {
            return Err(CoreError::Limit(
                "infinint does not fit in a u64".to_string(),
            ));
        }
        let mut out = 0u64;
        for (i, &b) in v.0.iter().enumerate() {
            out |= (b as u64) << (i * 8);
        }
        Ok(out)
    }
}

impl PartialEq for Infinint {
    fn eq(&self, other: &Self) -> bool
    {
        self.0 == other.0
    }
}

impl PartialOrd for Infinint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering>
    {
        Some(self.cmp(other))
    }
}

impl Ord for Infinint {
    fn cmp(&self, other: &Self) -> Ordering
    {
        if self.0.len() != other.0.len() {
            return self.0.len().cmp(&other.0.len());
        }
        for i in (0..self.0.len()).rev() {
            if self.0[i] != other.0[i] {
                return self.0[i].cmp(&other.0[i]);
            }
        }
        Ordering::Equal
    }
}

impl Add for &Infinint {
    type Output = Infinint;

    fn add(self, rhs: Self) -> Infinint
    {
        let len = self.0.len().max(rhs.0.len()) + 1;
        let mut limbs = vec![0u8; len];
        let mut carry = 0u16;
        for i in 0..len {
            let a = *self.0.get(i).unwrap_or(&0) as u16;
            let b = *rhs.0.get(i).unwrap_or(&0) as u16;
            let sum = a + b + carry;
            limbs[i] = (sum & 0xff) as u8;
            carry = sum >> 8;
        }
        Infinint::trimmed(limbs)
    }
}

impl Sub for &Infinint {
    type Output = Infinint;

    /// Saturates at zero rather than panicking or wrapping: the archive
    /// engine only ever subtracts offsets that are known to be ordered,
    /// but a defensive clamp is cheaper than an invariant violation.
    fn sub(self, rhs: Self) -> Infinint
    {
        if self < rhs {
            return Infinint::zero();
        }
        let mut limbs = vec![0u8; self.0.len()];
        let mut borrow = 0i16;
        for i in 0..self.0.len() {
            let a = self.0[i] as i16;
            let b = *rhs.0.get(i).unwrap_or(&0) as i16;
            let mut diff = a - b - borrow;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            limbs[i] = diff as u8;
        }
        Infinint::trimmed(limbs)
    }
}

impl Mul for &Infinint {
    type Output = Infinint;

    fn mul(self, rhs: Self) -> Infinint
    {
        if self.is_zero() || rhs.is_zero() {
            return Infinint::zero();
        }
        let mut limbs = vec![0u32; self.0.len() + rhs.0.len() + 1];
        for (i, &a) in self.0.iter().enumerate() {
            let mut carry = 0u32;
            for (j, &b) in rhs.0.iter().enumerate() {
                let cur = limbs[i + j] + a as u32 * b as u32 + carry;
                limbs[i + j] = cur & 0xff;
                carry = cur >> 8;
            }
            let mut k = i + rhs.0.len();
            while carry != 0 {
                let cur = limbs[k] + carry;
                limbs[k] = cur & 0xff;
                carry = cur >> 8;
                k += 1;
            }
        }
        Infinint::trimmed(limbs.into_iter().map(|b| b as u8).collect())
    }
}

/// Euclidean division: returns `(quotient, remainder)`.
fn div_rem(num: &Infinint, den: &Infinint) -> (Infinint, Infinint)
{
    assert!(!den.is_zero(), "infinint division by zero");
    if num < den {
        return (Infinint::zero(), num.clone());
    }
    let total_bits = num.0.len() * 8;
    let mut quotient = Infinint::zero();
    let mut remainder = Infinint::zero();
    for bit in (0..total_bits).rev() {
        remainder = remainder.shl(1);
        let byte = bit / 8;
        let shift = bit % 8;
        let b = (num.0[byte] >> shift) & 1;
        if b == 1 {
            remainder = &remainder + &Infinint::from(1u64);
        }
        if &remainder >= den {
            remainder = &remainder - den;
            quotient = quotient.set_bit(bit);
        }
    }
    (quotient, remainder)
}

impl Infinint {
    fn set_bit(&self, bit: usize) -> Self
    {
        let byte = bit / 8;
        let shift = bit % 8;
        let mut limbs = self.0.clone();
        if limbs.len() <= byte {
            limbs.resize(byte + 1, 0);
        }
        limbs[byte] |= 1 << shift;
        Self::trimmed(limbs)
    }
}

impl Div for &Infinint {
    type Output = Infinint;
    fn div(self, rhs: Self) -> Infinint
    {
        div_rem(self, rhs).0
    }
}

impl Rem for &Infinint {
    type Output = Infinint;
    fn rem(self, rhs: Self) -> Infinint
    {
        div_rem(self, rhs).1
    }
}

impl fmt::Display for Infinint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        if self.is_zero() {
            return write!(f, "0");
        }
        // Decimal conversion via repeated division by 10, fine for the
        // display/debug path only (never on a hot codec path).
        let mut digits = Vec::new();
        let mut v = self.clone();
        let ten = Infinint::from(10u64);
        while !v.is_zero() {
            let (q, r) = div_rem(&v, &ten);
            digits.push(b'0' + r.0.first().copied().unwrap_or(0));
            v = q;
        }
        digits.reverse();
        write!(f, "{}", String::from_utf8_lossy(&digits))
    }
}
