//! CRC32 digesting, per SPEC_FULL.md §3 item 7 and §2's CRC section.
//!
//! Backs the payload/EA/FSA checksum fields carried by catalogue entries
//! (`src/catalogue/entry.rs`) and the optional in-slice trailer checked by
//! [`crate::sar::SarReader`] when [`crate::header::SliceHashAlgorithm::Crc32`]
//! is selected. Grounded on the teacher's own `crc = "1"` dependency
//! (`filesys/e2fs.rs`'s `ext4_style_crc32c_le`), kept at the IEEE polynomial
//! rather than Castagnoli since nothing here needs ext4 on-disk compatibility.

use crc::crc32;

pub fn crc32_of(data: &[u8]) -> u32
{
    crc32::checksum_ieee(data)
}

/// A running CRC32 (IEEE) accumulator for data streamed in chunks, used
/// where the whole buffer isn't held in memory at once (sar slice bodies,
/// compressor blocks).
#[derive(Clone, Copy, Debug, Default)]
pub struct Crc32Accumulator(u32);

impl Crc32Accumulator {
    pub fn new() -> Self
    {
        Self(0)
    }

    pub fn update(&mut self, data: &[u8])
    {
        self.0 = crc32::update(self.0, &crc32::IEEE_TABLE, data);
    }

    pub fn finish(self) -> u32
    {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_matches_one_shot_digest()
    {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut acc = Crc32Accumulator::new();
        acc.update(&data[..10]);
        acc.update(&data[10..]);
        assert_eq!(acc.finish(), crc32_of(data));
    }

    #[test]
    fn empty_input_is_zero()
    {
        assert_eq!(crc32_of(b""), 0);
    }
}
