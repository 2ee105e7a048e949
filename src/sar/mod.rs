//! The slice container (sar), per spec.md §4.3 and §6.1.
//!
//! Maps a logical byte stream onto a sequence of files named
//! `<base>.<n>.<ext>`, `n` 1-based decimal. Slice 1 may have a size
//! different from the rest (`first_slice_size` vs `slice_size`); both
//! must be at least `header_size + 1`.

pub mod header;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::checksum::Crc32Accumulator;
use crate::error::{CoreError, CoreResult};
use crate::header::SliceHashAlgorithm;
use crate::interaction::Interaction;
use crate::stream::file::FileStream;
use crate::stream::{ByteStream, SkipDirection};
use header::{SliceFlag, SliceHeader, INTERNAL_NAME_LEN};

/// Length in bytes of the optional trailing CRC32 appended after the last
/// byte of logical data, when `SliceHashAlgorithm::Crc32` is selected.
const CRC_TRAILER_LEN: u64 = 4;

bitflags::bitflags! {
    /// Write-path behaviour switches, per spec.md §4.3 "Options".
    pub struct SarOptions: u32 {
        const WARN_OVERWRITE     = 0b001;
        const DONT_ERASE         = 0b010;
        const PAUSE_BEFORE_NEXT  = 0b100;
    }
}

#[derive(Clone, Debug)]
pub struct SlicingParams {
    pub first_slice_size: u64,
    pub slice_size: u64,
}

impl SlicingParams {
    /// A single never-rolling-over slice (the "trivial single-file" mode
    /// of spec.md §4.3's last paragraph).
    pub fn single_file() -> Self
    {
        Self {
            first_slice_size: u64::MAX,
            slice_size: u64::MAX,
        }
    }

    fn validate(&self) -> CoreResult<()>
    {
        let min = SliceHeader::FIXED_LEN as u64 + 1;
        if self.first_slice_size < min || self.slice_size < min {
            return Err(CoreError::range(format!(
                "slice sizes must be at least {min} bytes"
            )));
        }
        Ok(())
    }
}

fn slice_path(base: &Path, ext: &str, index: u64) -> PathBuf
{
    let mut name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(&index.to_string());
    name.push('.');
    name.push_str(ext);
    match base.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => PathBuf::from(name),
    }
}

/// Scans the directory for `<base>.<n>.<ext>` to find the highest
/// existing index, per spec.md §6.1.
pub fn highest_existing_index(base: &Path, ext: &str) -> CoreResult<u64>
{
    let dir = base.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));
    let stem = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut highest = 0u64;
    let entries = std::fs::read_dir(&dir)?;
    let prefix = format!("{stem}.");
    let suffix = format!(".{ext}");
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(mid) = name.strip_prefix(&prefix).and_then(|s| s.strip_suffix(&suffix)) {
            if let Ok(idx) = mid.parse::<u64>() {
                highest = highest.max(idx);
            }
        }
    }
    Ok(highest)
}

/// Writer side of the slice layer: a logical stream that rolls over into
/// numbered slice files as it fills.
pub struct SarWriter<'i> {
    base: PathBuf,
    ext: String,
    internal_name: [u8; INTERNAL_NAME_LEN],
    params: SlicingParams,
    options: SarOptions,
    current_index: u64,
    current: Option<FileStream>,
    written_in_current: u64,
    slice_hash: SliceHashAlgorithm,
    crc: Crc32Accumulator,
    interaction: &'i mut dyn Interaction,
}

impl<'i> SarWriter<'i> {
    pub fn create(
        base: impl Into<PathBuf>,
        ext: impl Into<String>,
        internal_name: [u8; INTERNAL_NAME_LEN],
        params: SlicingParams,
        options: SarOptions,
        interaction: &'i mut dyn Interaction,
    ) -> CoreResult<Self>
    {
        Self::create_with_hash(
            base,
            ext,
            internal_name,
            params,
            options,
            SliceHashAlgorithm::None,
            interaction,
        )
    }

    /// As [`Self::create`], additionally appending a CRC32 of the whole
    /// logical stream after the last byte once [`Self::terminate`] is
    /// called, per SPEC_FULL.md §3 item 7.
    pub fn create_with_hash(
        base: impl Into<PathBuf>,
        ext: impl Into<String>,
        internal_name: [u8; INTERNAL_NAME_LEN],
        params: SlicingParams,
        options: SarOptions,
        slice_hash: SliceHashAlgorithm,
        interaction: &'i mut dyn Interaction,
    ) -> CoreResult<Self>
    {
        params.validate()?;
        let mut writer = Self {
            base: base.into(),
            ext: ext.into(),
            internal_name,
            params,
            options,
            current_index: 0,
            current: None,
            written_in_current: 0,
            slice_hash,
            crc: Crc32Accumulator::new(),
            interaction,
        };
        writer.open_next_slice(SliceFlag::NonTerminal)?;
        Ok(writer)
    }

    fn slice_capacity(&self, index: u64) -> u64
    {
        if index == 1 {
            self.params.first_slice_size
        } else {
            self.params.slice_size
        }
    }

    fn open_next_slice(&mut self, flag: SliceFlag) -> CoreResult<()>
    {
        self.current_index += 1;
        let path = slice_path(&self.base, &self.ext, self.current_index);

        if path.exists() {
            if self.options.contains(SarOptions::DONT_ERASE) {
                return Err(CoreError::UserAbort(format!(
                    "{} already exists and DONT_ERASE is set",
                    path.display()
                )));
            }
            if self.options.contains(SarOptions::WARN_OVERWRITE)
                && !self
                    .interaction
                    .pause(&format!("overwrite existing slice {}?", path.display()))
            {
                return Err(CoreError::UserAbort(format!(
                    "operator declined to overwrite {}",
                    path.display()
                )));
            }
        }

        if self.current_index > 1 && self.options.contains(SarOptions::PAUSE_BEFORE_NEXT) {
            self.interaction
                .pause(&format!("ready to write slice {}", self.current_index));
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut stream = FileStream::new(file);

        let uniform_slice_size = if self.current_index == 1
            && self.params.first_slice_size != self.params.slice_size
        {
            Some(self.params.slice_size)
        } else {
            None
        };
        let header = SliceHeader {
            internal_name: self.internal_name,
            flag,
            uniform_slice_size,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf)?;
        stream.write(&buf)?;

        self.written_in_current = buf.len() as u64;
        self.current = Some(stream);
        Ok(())
    }

    /// Rewrites the current slice's flag byte in place. Used by
    /// [`Self::terminate`] to mark the last slice terminal.
    fn rewrite_flag(&mut self, flag: SliceFlag) -> CoreResult<()>
    {
        if let Some(stream) = &mut self.current {
            stream.skip(4 + INTERNAL_NAME_LEN as u64)?;
            let byte = match flag {
                SliceFlag::Terminal => b'T',
                SliceFlag::NonTerminal => b'N',
            };
            stream.write(&[byte])?;
            let pos = self.written_in_current.max(SliceHeader::FIXED_LEN as u64);
            stream.skip(pos)?;
        }
        Ok(())
    }

    pub fn write(&mut self, mut data: &[u8]) -> CoreResult<()>
    {
        if self.slice_hash == SliceHashAlgorithm::Crc32 {
            self.crc.update(data);
        }
        while !data.is_empty() {
            let cap = self.slice_capacity(self.current_index);
            let room = cap.saturating_sub(self.written_in_current);
            if room == 0 {
                self.open_next_slice(SliceFlag::NonTerminal)?;
                continue;
            }
            let take = (room as usize).min(data.len());
            let result = self
                .current
                .as_mut()
                .expect("slice always open while writing")
                .write(&data[..take]);
            if let Err(e) = result {
                // spec.md §4.3: ENOSPC retries smaller, then prompts.
                if !self
                    .interaction
                    .pause(&format!("write error ({e}), supply more space and retry?"))
                {
                    return Err(e);
                }
                continue;
            }
            self.written_in_current += take as u64;
            data = &data[take..];
        }
        Ok(())
    }

    pub fn terminate(&mut self) -> CoreResult<()>
    {
        self.rewrite_flag(SliceFlag::Terminal)?;
        if self.slice_hash == SliceHashAlgorithm::Crc32 {
            let digest = self.crc.finish();
            if let Some(stream) = &mut self.current {
                stream.write(&digest.to_be_bytes())?;
            }
            self.written_in_current += CRC_TRAILER_LEN;
        }
        if let Some(stream) = &mut self.current {
            stream.terminate()?;
        }
        Ok(())
    }
}

/// Reader side of the slice layer: transparently opens `n+1` on a short
/// read at a non-terminal slice's boundary, and prompts the operator when
/// a needed slice is missing.
pub struct SarReader<'i> {
    base: PathBuf,
    ext: String,
    params: Option<SlicingParams>,
    internal_name: Option<[u8; INTERNAL_NAME_LEN]>,
    current_index: u64,
    current: Option<FileStream>,
    current_flag: SliceFlag,
    current_header_len: u64,
    current_size: Option<u64>,
    slice_hash: SliceHashAlgorithm,
    crc: Crc32Accumulator,
    /// Bytes read from disk but held back from the caller: with a CRC
    /// trailer enabled we cannot tell the last 4 real bytes from the
    /// trailer until we see the terminal slice run dry, so up to
    /// `CRC_TRAILER_LEN` bytes are always kept one `read` behind.
    held: Vec<u8>,
    interaction: &'i mut dyn Interaction,
}

impl<'i> SarReader<'i> {
    pub fn open(
        base: impl Into<PathBuf>,
        ext: impl Into<String>,
        interaction: &'i mut dyn Interaction,
    ) -> CoreResult<Self>
    {
        Self::open_with_hash(base, ext, SliceHashAlgorithm::None, interaction)
    }

    /// As [`Self::open`], verifying the trailing CRC32 left by
    /// [`SarWriter::create_with_hash`] once the logical stream is fully
    /// drained.
    pub fn open_with_hash(
        base: impl Into<PathBuf>,
        ext: impl Into<String>,
        slice_hash: SliceHashAlgorithm,
        interaction: &'i mut dyn Interaction,
    ) -> CoreResult<Self>
    {
        let mut reader = Self {
            base: base.into(),
            ext: ext.into(),
            params: None,
            internal_name: None,
            current_index: 0,
            current: None,
            current_flag: SliceFlag::Terminal,
            current_header_len: 0,
            current_size: None,
            slice_hash,
            crc: Crc32Accumulator::new(),
            held: Vec::new(),
            interaction,
        };
        reader.open_slice(1)?;
        Ok(reader)
    }

    fn open_slice(&mut self, index: u64) -> CoreResult<()>
    {
        let path = slice_path(&self.base, &self.ext, index);
        let file = loop {
            match OpenOptions::new().read(true).open(&path) {
                Ok(f) => break f,
                Err(e) => {
                    if !self.interaction.pause(&format!(
                        "slice {} ({}) is missing: {e}. Supply it and retry?",
                        index,
                        path.display()
                    )) {
                        return Err(CoreError::UserAbort(format!(
                            "operator declined to supply slice {index}"
                        )));
                    }
                }
            }
        };
        let mut stream = FileStream::new(file);
        // Read the header via a small scratch buffer through the
        // ByteStream trait so the same FileStream object keeps its
        // position consistent afterwards.
        let header = {
            let mut temp = Vec::new();
            let mut chunk = [0u8; 64];
            loop {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                temp.extend_from_slice(&chunk[..n]);
                if temp.len() >= SliceHeader::FIXED_LEN + 16 {
                    break;
                }
            }
            let mut cursor: &[u8] = &temp;
            let header = SliceHeader::read_from(&mut cursor)?;
            let consumed = temp.len() - cursor.len();
            stream.skip(consumed as u64)?;
            header
        };

        match self.internal_name {
            None => self.internal_name = Some(header.internal_name),
            Some(expected) if expected == header.internal_name => {}
            Some(_) => {
                return Err(CoreError::data(format!(
                    "slice {index} belongs to a different archive (internal name mismatch)"
                )))
            }
        }

        self.current_header_len = stream.get_position()?;
        if let Some(size) = header.uniform_slice_size {
            self.current_size = Some(size);
        }
        self.current_flag = header.flag;
        self.current_index = index;
        self.current = Some(stream);
        Ok(())
    }

    fn read_raw(&mut self, out: &mut [u8]) -> CoreResult<usize>
    {
        let stream = self
            .current
            .as_mut()
            .ok_or_else(|| CoreError::bug("sar_reader_open", "no current slice"))?;
        let n = stream.read(out)?;
        if n == 0 && self.current_flag == SliceFlag::NonTerminal {
            self.open_slice(self.current_index + 1)?;
            return self.read_raw(out);
        }
        Ok(n)
    }

    pub fn read(&mut self, out: &mut [u8]) -> CoreResult<usize>
    {
        if self.slice_hash != SliceHashAlgorithm::Crc32 {
            return self.read_raw(out);
        }
        let mut produced = 0;
        while produced < out.len() {
            if self.held.len() > CRC_TRAILER_LEN as usize {
                let releasable = self.held.len() - CRC_TRAILER_LEN as usize;
                let take = releasable.min(out.len() - produced);
                let release: Vec<u8> = self.held.drain(..take).collect();
                self.crc.update(&release);
                out[produced..produced + take].copy_from_slice(&release);
                produced += take;
                continue;
            }
            let mut chunk = [0u8; 4096];
            let n = self.read_raw(&mut chunk)?;
            if n == 0 {
                if self.held.len() != CRC_TRAILER_LEN as usize {
                    return Err(CoreError::data(
                        "sar: truncated CRC trailer at end of slice stream",
                    ));
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&self.held);
                let expected = u32::from_be_bytes(bytes);
                if expected != self.crc.finish() {
                    return Err(CoreError::data("sar: slice content CRC mismatch"));
                }
                break;
            }
            self.held.extend_from_slice(&chunk[..n]);
        }
        Ok(produced)
    }

    /// Logical position decomposition: `skip(abs)` figures out which
    /// slice the offset lands in from `(first_slice_size, slice_size)`,
    /// opens it, and positions within it.
    pub fn skip(&mut self, abs: u64, params: &SlicingParams) -> CoreResult<bool>
    {
        let header_len = SliceHeader::FIXED_LEN as u64;
        let first_body = params.first_slice_size.saturating_sub(header_len);
        let (index, in_slice) = if abs < first_body {
            (1, abs)
        } else {
            let rest = abs - first_body;
            let body = params.slice_size.saturating_sub(header_len);
            if body == 0 {
                return Ok(false);
            }
            (2 + rest / body, rest % body)
        };
        if self.current_index != index {
            self.open_slice(index)?;
        }
        let stream = self.current.as_mut().expect("just opened");
        stream.skip(self.current_header_len + in_slice)?;
        Ok(true)
    }

    pub fn skip_to_eof(&mut self) -> CoreResult<bool>
    {
        while self.current_flag == SliceFlag::NonTerminal {
            self.open_slice(self.current_index + 1)?;
        }
        if let Some(stream) = &mut self.current {
            stream.skip_to_eof()?;
        }
        Ok(true)
    }

    pub fn skippable(&self, _direction: SkipDirection, _amount: u64) -> bool
    {
        true
    }

    pub fn terminate(&mut self) -> CoreResult<()>
    {
        if let Some(stream) = &mut self.current {
            stream.terminate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::LoggingInteraction;
    use crate::logger::Logger;

    fn interaction() -> LoggingInteraction
    {
        LoggingInteraction::new(Logger::new(0, None), true)
    }

    #[test]
    fn slice_naming()
    {
        let p = slice_path(Path::new("/tmp/archive"), "dar", 3);
        assert_eq!(p, PathBuf::from("/tmp/archive.3.dar"));
    }

    #[test]
    fn write_and_read_back_across_slice_boundary()
    {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("test_archive");
        let params = SlicingParams {
            first_slice_size: 200,
            slice_size: 160,
        };
        let mut ia = interaction();
        let payload = vec![0xAAu8; 1024];
        {
            let mut writer = SarWriter::create(
                &base,
                "dar",
                [9u8; INTERNAL_NAME_LEN],
                params.clone(),
                SarOptions::empty(),
                &mut ia,
            )
            .unwrap();
            writer.write(&payload).unwrap();
            writer.terminate().unwrap();
        }

        assert!(base.with_file_name("test_archive.1.dar").exists());
        assert!(base.with_file_name("test_archive.2.dar").exists());
        assert!(base.with_file_name("test_archive.3.dar").exists());
        assert!(!base.with_file_name("test_archive.4.dar").exists());

        let mut ia2 = interaction();
        let mut reader = SarReader::open(&base, "dar", &mut ia2).unwrap();
        let mut out = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let n = reader.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, payload);
    }

    #[test]
    fn crc_trailer_roundtrips_and_detects_corruption()
    {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("hashed_archive");
        let params = SlicingParams::single_file();
        let payload = b"a payload long enough to span a slice hash trailer".to_vec();

        let mut ia = interaction();
        {
            let mut writer = SarWriter::create_with_hash(
                &base,
                "dar",
                [5u8; INTERNAL_NAME_LEN],
                params.clone(),
                SarOptions::empty(),
                SliceHashAlgorithm::Crc32,
                &mut ia,
            )
            .unwrap();
            writer.write(&payload).unwrap();
            writer.terminate().unwrap();
        }

        let mut ia2 = interaction();
        let mut reader =
            SarReader::open_with_hash(&base, "dar", SliceHashAlgorithm::Crc32, &mut ia2).unwrap();
        let mut out = Vec::new();
        let mut chunk = [0u8; 8];
        loop {
            let n = reader.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, payload);

        // Flip a payload byte in place and confirm the reader now rejects it.
        let slice_path = base.with_file_name("hashed_archive.1.dar");
        let mut bytes = std::fs::read(&slice_path).unwrap();
        let last = bytes.len() - 5; // inside the payload, before the 4-byte trailer
        bytes[last] ^= 0xFF;
        std::fs::write(&slice_path, bytes).unwrap();

        let mut ia3 = interaction();
        let mut reader =
            SarReader::open_with_hash(&base, "dar", SliceHashAlgorithm::Crc32, &mut ia3).unwrap();
        let mut out = Vec::new();
        let mut chunk = [0u8; 8];
        let mut result = Ok(());
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        assert!(result.is_err());
    }

    #[test]
    fn seek_lands_in_correct_slice()
    {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("seek_archive");
        let params = SlicingParams {
            first_slice_size: 200,
            slice_size: 160,
        };
        let mut ia = interaction();
        let mut payload = Vec::new();
        for i in 0..1024u32 {
            payload.push((i % 256) as u8);
        }
        {
            let mut writer = SarWriter::create(
                &base,
                "dar",
                [3u8; INTERNAL_NAME_LEN],
                params.clone(),
                SarOptions::empty(),
                &mut ia,
            )
            .unwrap();
            writer.write(&payload).unwrap();
            writer.terminate().unwrap();
        }

        let mut ia2 = interaction();
        let mut reader = SarReader::open(&base, "dar", &mut ia2).unwrap();
        reader.skip(500, &params).unwrap();
        let mut buf = [0u8; 4];
        reader.read(&mut buf).unwrap();
        assert_eq!(buf, [(500 % 256) as u8, (501 % 256) as u8, (502 % 256) as u8, (503 % 256) as u8]);
    }
}
