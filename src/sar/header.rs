//! The slice header, bit-exact per spec.md §6.2.
//!
//! ```text
//! offset  bytes  field
//! 0       4      magic (fixed)
//! 4       16     internal name
//! 20      1      flag (T terminal / N non-terminal)
//! 21      1      extension id (0 none, S size-carrying)
//! 22      var    slice size if extension = S, else absent
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{CoreError, CoreResult};
use crate::infinint::Infinint;

pub const MAGIC: [u8; 4] = *b"SARc";
pub const INTERNAL_NAME_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceFlag {
    Terminal,
    NonTerminal,
}

impl SliceFlag {
    fn to_byte(self) -> u8
    {
        match self {
            SliceFlag::Terminal => b'T',
            SliceFlag::NonTerminal => b'N',
        }
    }

    fn from_byte(b: u8) -> CoreResult<Self>
    {
        match b {
            b'T' => Ok(SliceFlag::Terminal),
            b'N' => Ok(SliceFlag::NonTerminal),
            other => Err(CoreError::data(format!("bad slice flag byte {other:#x}"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SliceHeader {
    pub internal_name: [u8; INTERNAL_NAME_LEN],
    pub flag: SliceFlag,
    /// Present only in slice 1, and only when the remaining slices use a
    /// size different from slice 1 (spec.md §4.3).
    pub uniform_slice_size: Option<u64>,
}

impl SliceHeader {
    pub const FIXED_LEN: usize = 4 + INTERNAL_NAME_LEN + 1 + 1;

    pub fn write_to<W: Write>(&self, w: &mut W) -> CoreResult<()>
    {
        w.write_all(&MAGIC)?;
        w.write_all(&self.internal_name)?;
        w.write_u8(self.flag.to_byte())?;
        match self.uniform_slice_size {
            None => {
                w.write_u8(b'0')?;
            }
            Some(size) => {
                w.write_u8(b'S')?;
                Infinint::from(size).write_to(w)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> CoreResult<Self>
    {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(CoreError::data("slice header: bad magic"));
        }
        let mut internal_name = [0u8; INTERNAL_NAME_LEN];
        r.read_exact(&mut internal_name)?;
        let flag = SliceFlag::from_byte(r.read_u8()?)?;
        let ext = r.read_u8()?;
        let uniform_slice_size = match ext {
            b'0' => None,
            b'S' => {
                let size = Infinint::read_from(r)?;
                Some(u64::try_from(&size)?)
            }
            other => return Err(CoreError::data(format!("bad slice extension id {other:#x}"))),
        };
        Ok(Self {
            internal_name,
            flag,
            uniform_slice_size,
        })
    }

    pub fn encoded_len(&self) -> usize
    {
        let mut buf = Vec::new();
        self.write_to(&mut buf).expect("in-memory write cannot fail");
        buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_without_size()
    {
        let h = SliceHeader {
            internal_name: [7u8; INTERNAL_NAME_LEN],
            flag: SliceFlag::NonTerminal,
            uniform_slice_size: None,
        };
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        let back = SliceHeader::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.internal_name, h.internal_name);
        assert_eq!(back.flag, SliceFlag::NonTerminal);
        assert_eq!(back.uniform_slice_size, None);
    }

    #[test]
    fn roundtrip_with_size()
    {
        let h = SliceHeader {
            internal_name: [1u8; INTERNAL_NAME_LEN],
            flag: SliceFlag::Terminal,
            uniform_slice_size: Some(12_345_678),
        };
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        let back = SliceHeader::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.uniform_slice_size, Some(12_345_678));
        assert_eq!(back.flag, SliceFlag::Terminal);
    }

    #[test]
    fn rejects_bad_magic()
    {
        let buf = [0u8; 30];
        assert!(SliceHeader::read_from(&mut &buf[..]).is_err());
    }
}
