//! Archive header and its flags bitfield, per spec.md §3.3, §4.13, §6.3.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::compressor::CompressionAlgo;
use crate::crypto::CipherAlgo;
use crate::error::{CoreError, CoreResult};

pub const MAGIC: [u8; 4] = *b"DARh";
pub const FORMAT_VERSION: u16 = 1;
pub const NAME_LEN: usize = 16;

/// A variable-length bitfield: the low bit of each byte (except the
/// last) signals "another byte follows", so new flags can be added
/// without breaking an older reader, which can still skip the whole
/// field by reading bytes until one with that bit clear. Per spec.md
/// §4.13 and SPEC_FULL.md §3 item 3 (`header_flags.cpp`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeaderFlags(u64);

impl HeaderFlags {
    pub const SEQUENTIAL_READ: u64 = 1 << 0;
    pub const HAS_CRYPTO: u64 = 1 << 1;
    pub const HAS_SLICING: u64 = 1 << 2;
    pub const HAS_EA: u64 = 1 << 3;
    pub const HAS_FSA: u64 = 1 << 4;
    pub const HAS_REFERENCE_DATA_NAME: u64 = 1 << 5;

    pub fn empty() -> Self
    {
        Self(0)
    }

    pub fn set(&mut self, bit: u64)
    {
        self.0 |= bit;
    }

    pub fn is_set(&self, bit: u64) -> bool
    {
        self.0 & bit != 0
    }

    /// Each byte carries 7 payload bits plus a continuation bit (the low
    /// bit here, matching the original's per-byte scheme); reading stops
    /// at the first byte whose continuation bit is clear.
    pub fn write_to<W: Write>(&self, w: &mut W) -> CoreResult<()>
    {
        let mut value = self.0;
        loop {
            let mut byte = ((value & 0x7f) << 1) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 1;
                w.write_u8(byte)?;
            } else {
                w.write_u8(byte)?;
                break;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> CoreResult<Self>
    {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = r.read_u8()?;
            let continues = byte & 1 != 0;
            let payload = (byte >> 1) as u64;
            // Reject this byte whether or not it's the terminal one: a
            // byte whose payload bits don't all land inside the 64-bit
            // field (shift too large, or high payload bits pushed out)
            // means the encoding doesn't fit, continuation bit or not.
            match payload.checked_shl(shift).filter(|s| s >> shift == payload) {
                Some(s) => value |= s,
                None => return Err(CoreError::Limit("header flags exceed 64 bits".to_string())),
            }
            shift += 7;
            if !continues {
                break;
            }
        }
        Ok(Self(value))
    }
}

/// Which CRC algorithm, if any, protects in-slice content, per
/// SPEC_FULL.md §3 item 7 (`sar.cpp`'s optional hash extension).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceHashAlgorithm {
    None,
    Crc32,
}

impl SliceHashAlgorithm {
    fn tag(self) -> u8
    {
        match self {
            SliceHashAlgorithm::None => 0,
            SliceHashAlgorithm::Crc32 => 1,
        }
    }

    fn from_tag(tag: u8) -> CoreResult<Self>
    {
        Ok(match tag {
            0 => SliceHashAlgorithm::None,
            1 => SliceHashAlgorithm::Crc32,
            other => return Err(CoreError::data(format!("unknown slice hash algorithm id {other}"))),
        })
    }
}

/// The archive header, per spec.md §3.3 and §6.3 item 1.
#[derive(Clone, Debug)]
pub struct ArchiveHeader {
    pub compression: CompressionAlgo,
    pub encryption: CipherAlgo,
    /// Random per-archive instance identifier, repeated in every slice
    /// header.
    pub internal_name: [u8; NAME_LEN],
    /// Propagated across a differential chain so a restore can verify a
    /// consistent lineage.
    pub data_name: [u8; NAME_LEN],
    pub flags: HeaderFlags,
    pub slice_hash: SliceHashAlgorithm,
}

impl ArchiveHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> CoreResult<()>
    {
        w.write_all(&MAGIC)?;
        w.write_u16::<BigEndian>(FORMAT_VERSION)?;
        w.write_u8(self.compression.tag())?;
        w.write_u8(encryption_tag(self.encryption))?;
        w.write_all(&self.internal_name)?;
        w.write_all(&self.data_name)?;
        self.flags.write_to(w)?;
        w.write_u8(self.slice_hash.tag())?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> CoreResult<Self>
    {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(CoreError::data("archive header: bad magic"));
        }
        let version = r.read_u16::<BigEndian>()?;
        if version != FORMAT_VERSION {
            return Err(CoreError::data(format!(
                "archive header: unsupported version {version}"
            )));
        }
        let compression = CompressionAlgo::from_tag(r.read_u8()?)?;
        let encryption = encryption_from_tag(r.read_u8()?)?;
        let mut internal_name = [0u8; NAME_LEN];
        r.read_exact(&mut internal_name)?;
        let mut data_name = [0u8; NAME_LEN];
        r.read_exact(&mut data_name)?;
        let flags = HeaderFlags::read_from(r)?;
        let slice_hash = SliceHashAlgorithm::from_tag(r.read_u8()?)?;
        Ok(Self {
            compression,
            encryption,
            internal_name,
            data_name,
            flags,
            slice_hash,
        })
    }

    /// A fresh random internal name and data name, per spec.md §3.3.
    /// `data_name` should instead be copied from the reference archive
    /// when building a differential one (`HAS_REFERENCE_DATA_NAME`).
    pub fn random_names() -> ([u8; NAME_LEN], [u8; NAME_LEN])
    {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut internal = [0u8; NAME_LEN];
        let mut data = [0u8; NAME_LEN];
        rng.fill_bytes(&mut internal);
        rng.fill_bytes(&mut data);
        (internal, data)
    }
}

fn encryption_tag(algo: CipherAlgo) -> u8
{
    match algo {
        CipherAlgo::None => 0,
        CipherAlgo::Aes256Gcm => 1,
    }
}

fn encryption_from_tag(tag: u8) -> CoreResult<CipherAlgo>
{
    Ok(match tag {
        0 => CipherAlgo::None,
        1 => CipherAlgo::Aes256Gcm,
        other => return Err(CoreError::data(format!("unknown encryption algo id {other}"))),
    })
}

/// The trailer closing the archive body, per spec.md §3.3 and §6.3 item
/// 4: catalogue offset, CRC of the body, terminator magic.
pub const TRAILER_MAGIC: [u8; 4] = *b"DARt";

#[derive(Clone, Debug)]
pub struct Trailer {
    pub catalogue_offset: u64,
    pub body_crc: u32,
}

impl Trailer {
    pub fn write_to<W: Write>(&self, w: &mut W) -> CoreResult<()>
    {
        w.write_u64::<BigEndian>(self.catalogue_offset)?;
        w.write_u32::<BigEndian>(self.body_crc)?;
        w.write_all(&TRAILER_MAGIC)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> CoreResult<Self>
    {
        let catalogue_offset = r.read_u64::<BigEndian>()?;
        let body_crc = r.read_u32::<BigEndian>()?;
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != TRAILER_MAGIC {
            return Err(CoreError::data("trailer: bad terminator magic"));
        }
        Ok(Self {
            catalogue_offset,
            body_crc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_flags_roundtrip_small_value()
    {
        let mut flags = HeaderFlags::empty();
        flags.set(HeaderFlags::HAS_CRYPTO);
        flags.set(HeaderFlags::HAS_SLICING);
        let mut buf = Vec::new();
        flags.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 1);
        let back = HeaderFlags::read_from(&mut &buf[..]).unwrap();
        assert!(back.is_set(HeaderFlags::HAS_CRYPTO));
        assert!(back.is_set(HeaderFlags::HAS_SLICING));
        assert!(!back.is_set(HeaderFlags::HAS_EA));
    }

    #[test]
    fn header_flags_continuation_spans_multiple_bytes()
    {
        let mut flags = HeaderFlags::empty();
        flags.set(1 << 10); // needs a second byte
        let mut buf = Vec::new();
        flags.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 2);
        let back = HeaderFlags::read_from(&mut &buf[..]).unwrap();
        assert!(back.is_set(1 << 10));
    }

    #[test]
    fn older_reader_can_skip_an_unknown_flags_field()
    {
        // Simulates an older reader that doesn't know any named flag: it
        // can still consume the field correctly by following the
        // continuation bit, landing exactly at the next field.
        let mut flags = HeaderFlags::empty();
        flags.set(1 << 20);
        let mut buf = Vec::new();
        flags.write_to(&mut buf).unwrap();
        buf.extend_from_slice(b"NEXT");
        let mut cursor = &buf[..];
        HeaderFlags::read_from(&mut cursor).unwrap();
        let mut rest = [0u8; 4];
        std::io::Read::read_exact(&mut cursor, &mut rest).unwrap();
        assert_eq!(&rest, b"NEXT");
    }

    #[test]
    fn archive_header_roundtrips()
    {
        let mut flags = HeaderFlags::empty();
        flags.set(HeaderFlags::HAS_SLICING);
        let h = ArchiveHeader {
            compression: CompressionAlgo::Gzip,
            encryption: CipherAlgo::Aes256Gcm,
            internal_name: [3u8; NAME_LEN],
            data_name: [4u8; NAME_LEN],
            flags,
            slice_hash: SliceHashAlgorithm::Crc32,
        };
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        let back = ArchiveHeader::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.internal_name, h.internal_name);
        assert_eq!(back.data_name, h.data_name);
        assert!(back.flags.is_set(HeaderFlags::HAS_SLICING));
        assert_eq!(back.slice_hash, SliceHashAlgorithm::Crc32);
    }

    #[test]
    fn trailer_roundtrips()
    {
        let t = Trailer {
            catalogue_offset: 123_456,
            body_crc: 0xdead_beef,
        };
        let mut buf = Vec::new();
        t.write_to(&mut buf).unwrap();
        let back = Trailer::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.catalogue_offset, 123_456);
        assert_eq!(back.body_crc, 0xdead_beef);
    }
}
