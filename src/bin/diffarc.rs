//! Thin CLI over `diffarc_core`: pack/unpack a single data stream through
//! the compression/cipher/escape/sar stack, inspect an archive's header,
//! and manage a dar_manager database file. Everything that actually
//! understands the archive format lives in the library; this binary only
//! wires clap's argument parsing to it, the way `fsfill`'s `main.rs` wires
//! `Args` to `filesys::process_ext4`.

use std::fs;
use std::path::PathBuf;

use clap::{ArgEnum, Parser, Subcommand};

use diffarc_core::checksum;
use diffarc_core::compressor::{CompressionAlgo, CompressionReader, CompressionWriter};
use diffarc_core::crypto::tronconneuse::Tronconneuse;
use diffarc_core::crypto::CipherAlgo;
use diffarc_core::dar_manager::DarManager;
use diffarc_core::escape::{EscapeReader, EscapeWriter, MarkType, ReadOutcome};
use diffarc_core::header::{ArchiveHeader, HeaderFlags, SliceHashAlgorithm, Trailer};
use diffarc_core::interaction::LoggingInteraction;
use diffarc_core::logger::Logger;
use diffarc_core::sar::{SarOptions, SarReader, SarWriter, SlicingParams};
use diffarc_core::stream::mem::MemStream;
use diffarc_core::stream::{ByteStream, Mode};

/// Clear-text block size the cipher layer partitions on; arbitrary but
/// fixed so `Create` and `Extract` agree without carrying it in the
/// header (this CLI never needs random access mid-archive).
const CLEAR_BLOCK_SIZE: usize = 4096;
const GZIP_LEVEL: u32 = 6;
const SLICE_EXT: &str = "dar";
const TRAILER_LEN: usize = 8 + 4 + 4;

#[derive(Parser)]
#[clap(name = "diffarc", about = "Core engine of a full/differential archiver")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack a single file into a (possibly sliced) archive.
    Create {
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        input: PathBuf,
        /// Archive base path; slices land at `<output>.<n>.dar`.
        #[clap(long, parse(from_os_str), value_name = "BASE")]
        output: PathBuf,
        #[clap(long, arg_enum, default_value = "none")]
        compression: CompressionArg,
        /// Path to a file holding exactly 32 key bytes; omit for no encryption.
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        key_file: Option<PathBuf>,
        #[clap(long, default_value_t = u64::MAX)]
        first_slice_size: u64,
        #[clap(long, default_value_t = u64::MAX)]
        slice_size: u64,
    },
    /// Unpack an archive back into a single file.
    Extract {
        #[clap(long, parse(from_os_str), value_name = "BASE")]
        input: PathBuf,
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        output: PathBuf,
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        key_file: Option<PathBuf>,
    },
    /// Print an archive's header fields.
    Inspect {
        #[clap(long, parse(from_os_str), value_name = "BASE")]
        input: PathBuf,
    },
    /// Operate on a dar_manager database file.
    Db {
        #[clap(subcommand)]
        command: DbCommand,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Print the archive number holding the most recent copy of `path`.
    MostRecent {
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        db: PathBuf,
        path: String,
    },
    /// List every recorded path and the archives it appears in.
    List {
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        db: PathBuf,
    },
    /// Drop an archive from the chain, compacting and renumbering.
    Remove {
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        db: PathBuf,
        archive_num: u32,
    },
}

#[derive(Clone, Copy, Debug, ArgEnum)]
enum CompressionArg {
    None,
    Gzip,
}

impl From<CompressionArg> for CompressionAlgo {
    fn from(a: CompressionArg) -> Self
    {
        match a {
            CompressionArg::None => CompressionAlgo::None,
            CompressionArg::Gzip => CompressionAlgo::Gzip,
        }
    }
}

fn main() -> anyhow::Result<()>
{
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Create {
            input,
            output,
            compression,
            key_file,
            first_slice_size,
            slice_size,
        } => cmd_create(
            input,
            output,
            compression.into(),
            key_file,
            first_slice_size,
            slice_size,
        ),
        Command::Extract {
            input,
            output,
            key_file,
        } => cmd_extract(input, output, key_file),
        Command::Inspect { input } => cmd_inspect(input),
        Command::Db { command } => cmd_db(command),
    }
}

fn read_key(key_file: &Option<PathBuf>) -> anyhow::Result<Option<[u8; 32]>>
{
    let path = match key_file {
        None => return Ok(None),
        Some(p) => p,
    };
    let bytes = fs::read(path)?;
    if bytes.len() != 32 {
        anyhow::bail!(
            "{}: key file must hold exactly 32 bytes, found {}",
            path.display(),
            bytes.len()
        );
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(Some(key))
}

fn interaction() -> LoggingInteraction
{
    LoggingInteraction::new(Logger::new(0, None), true)
}

/// Runs clear bytes through compression and (optionally) encryption, in
/// that order: each compressed block is then sealed by the cipher, so
/// stacking never encrypts material an attacker could use to distinguish
/// compression boundaries from the ciphertext alone.
fn encode_payload(
    clear: &[u8],
    compression: CompressionAlgo,
    key: Option<[u8; 32]>,
) -> anyhow::Result<Vec<u8>>
{
    let mem = MemStream::new(Mode::ReadWrite);
    let bytes = match key {
        Some(key) => {
            let tron = Tronconneuse::new(
                mem,
                key,
                CipherAlgo::Aes256Gcm,
                CLEAR_BLOCK_SIZE,
                0,
                Mode::ReadWrite,
            );
            let mut cw = CompressionWriter::new(tron, compression, GZIP_LEVEL);
            cw.write(clear)?;
            cw.terminate()?;
            cw.into_inner().into_inner().into_vec()
        }
        None => {
            let mut cw = CompressionWriter::new(mem, compression, GZIP_LEVEL);
            cw.write(clear)?;
            cw.terminate()?;
            cw.into_inner().into_vec()
        }
    };
    Ok(bytes)
}

/// Reverses [`encode_payload`].
fn decode_payload(stored: Vec<u8>, key: Option<[u8; 32]>) -> anyhow::Result<Vec<u8>>
{
    let mem = MemStream::from_vec(stored);
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    match key {
        Some(key) => {
            let tron = Tronconneuse::new(
                mem,
                key,
                CipherAlgo::Aes256Gcm,
                CLEAR_BLOCK_SIZE,
                0,
                Mode::Read,
            );
            let mut cr = CompressionReader::new(tron);
            loop {
                let n = cr.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&chunk[..n]);
            }
        }
        None => {
            let mut cr = CompressionReader::new(mem);
            loop {
                let n = cr.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&chunk[..n]);
            }
        }
    }
    Ok(out)
}

fn cmd_create(
    input: PathBuf,
    output: PathBuf,
    compression: CompressionAlgo,
    key_file: Option<PathBuf>,
    first_slice_size: u64,
    slice_size: u64,
) -> anyhow::Result<()>
{
    let clear = fs::read(&input)?;
    let key = read_key(&key_file)?;

    let (internal_name, data_name) = ArchiveHeader::random_names();
    let mut flags = HeaderFlags::empty();
    if key.is_some() {
        flags.set(HeaderFlags::HAS_CRYPTO);
    }
    if first_slice_size != u64::MAX || slice_size != u64::MAX {
        flags.set(HeaderFlags::HAS_SLICING);
    }
    let header = ArchiveHeader {
        compression,
        encryption: if key.is_some() {
            CipherAlgo::Aes256Gcm
        } else {
            CipherAlgo::None
        },
        internal_name,
        data_name,
        flags,
        slice_hash: SliceHashAlgorithm::Crc32,
    };

    let payload = encode_payload(&clear, compression, key)?;

    let mut header_bytes = Vec::new();
    header.write_to(&mut header_bytes)?;

    let escape_mem = MemStream::new(Mode::ReadWrite);
    let mut ew = EscapeWriter::new(escape_mem);
    ew.add_mark(MarkType::FileData)?;
    ew.write_data(&payload)?;
    ew.flush_tail()?;
    let escaped = ew.into_inner().into_vec();

    let mut body = header_bytes;
    body.extend_from_slice(&escaped);
    let body_crc = checksum::crc32_of(&body);
    let trailer = Trailer {
        catalogue_offset: 0,
        body_crc,
    };
    trailer.write_to(&mut body)?;

    let params = SlicingParams {
        first_slice_size,
        slice_size,
    };
    let mut ia = interaction();
    let mut writer = SarWriter::create_with_hash(
        &output,
        SLICE_EXT,
        internal_name,
        params,
        SarOptions::empty(),
        SliceHashAlgorithm::Crc32,
        &mut ia,
    )?;
    writer.write(&body)?;
    writer.terminate()?;

    Ok(())
}

fn cmd_extract(input: PathBuf, output: PathBuf, key_file: Option<PathBuf>) -> anyhow::Result<()>
{
    let key = read_key(&key_file)?;

    let mut ia = interaction();
    let mut reader = SarReader::open_with_hash(&input, SLICE_EXT, SliceHashAlgorithm::Crc32, &mut ia)?;
    let mut all = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        all.extend_from_slice(&chunk[..n]);
    }

    if all.len() < TRAILER_LEN {
        anyhow::bail!("archive too short to hold a trailer");
    }
    let (body, trailer_bytes) = all.split_at(all.len() - TRAILER_LEN);
    let trailer = Trailer::read_from(&mut &trailer_bytes[..])?;
    let body_crc = checksum::crc32_of(body);
    if body_crc != trailer.body_crc {
        anyhow::bail!("archive body CRC mismatch: corrupt archive");
    }

    let mut cursor: &[u8] = body;
    let _header = ArchiveHeader::read_from(&mut cursor)?;
    let escaped = cursor.to_vec();

    let escape_mem = MemStream::from_vec(escaped);
    let mut er = EscapeReader::new(escape_mem);
    let mut payload = Vec::new();
    loop {
        match er.next()? {
            ReadOutcome::Data(d) => payload.extend_from_slice(&d),
            ReadOutcome::Mark(_) => continue,
            ReadOutcome::Eof => break,
        }
    }

    let clear = decode_payload(payload, key)?;
    fs::write(&output, clear)?;
    Ok(())
}

fn cmd_inspect(input: PathBuf) -> anyhow::Result<()>
{
    let mut ia = interaction();
    let mut reader = SarReader::open_with_hash(&input, SLICE_EXT, SliceHashAlgorithm::Crc32, &mut ia)?;
    let mut all = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        all.extend_from_slice(&chunk[..n]);
    }
    if all.len() < TRAILER_LEN {
        anyhow::bail!("archive too short to hold a trailer");
    }
    let (body, _trailer) = all.split_at(all.len() - TRAILER_LEN);
    let mut cursor: &[u8] = body;
    let header = ArchiveHeader::read_from(&mut cursor)?;

    println!("compression:   {:?}", header.compression);
    println!("encryption:    {:?}", header.encryption);
    println!("internal name: {}", hex_string(&header.internal_name));
    println!("data name:     {}", hex_string(&header.data_name));
    println!("has_crypto:    {}", header.flags.is_set(HeaderFlags::HAS_CRYPTO));
    println!("has_slicing:   {}", header.flags.is_set(HeaderFlags::HAS_SLICING));
    println!("has_ea:        {}", header.flags.is_set(HeaderFlags::HAS_EA));
    println!("has_fsa:       {}", header.flags.is_set(HeaderFlags::HAS_FSA));
    Ok(())
}

fn hex_string(bytes: &[u8]) -> String
{
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn cmd_db(command: DbCommand) -> anyhow::Result<()>
{
    match command {
        DbCommand::MostRecent { db, path } => {
            let manager = load_db(&db)?;
            let components: Vec<Vec<u8>> = path
                .split('/')
                .filter(|c| !c.is_empty())
                .map(|c| c.as_bytes().to_vec())
                .collect();
            let refs: Vec<&[u8]> = components.iter().map(|c| c.as_slice()).collect();
            match manager.get_most_recent(&refs) {
                Some(num) => println!("{num}"),
                None => println!("not found"),
            }
        }
        DbCommand::List { db } => {
            let manager = load_db(&db)?;
            for (path, archives) in manager.listing() {
                let joined: Vec<String> = path
                    .iter()
                    .map(|c| String::from_utf8_lossy(c).into_owned())
                    .collect();
                let archives: Vec<String> = archives.iter().map(|n| n.to_string()).collect();
                println!("{}: {}", joined.join("/"), archives.join(","));
            }
        }
        DbCommand::Remove { db, archive_num } => {
            let mut manager = load_db(&db)?;
            manager.remove(archive_num);
            let mut buf = Vec::new();
            manager.write_to(&mut buf)?;
            fs::write(&db, buf)?;
        }
    }
    Ok(())
}

fn load_db(path: &PathBuf) -> anyhow::Result<DarManager>
{
    let bytes = fs::read(path)?;
    Ok(DarManager::read_from(&mut &bytes[..])?)
}
