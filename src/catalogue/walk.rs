//! The catalogue's four traversal cursors, per spec.md §4.9.
//!
//! All four operate on the same [`Catalogue`] but keep independent state,
//! so a caller can (for instance) run a `compare` cursor over a catalogue
//! that an `add` cursor is simultaneously building against a *different*
//! catalogue's `read` cursor — the differential-archive creation path.

use super::entry::{BaseKind, LeafEntry, SavedStatus};
use super::{Catalogue, EntryId, NodeData};
use crate::error::{CoreError, CoreResult};

/// Drives ingestion from the filesystem (or from any other entry
/// producer): `add(entry)` appends to the directory currently open;
/// entering a directory entry makes it the new current directory; adding
/// the synthetic end-of-directory pops back to the parent.
pub struct AddCursor<'a> {
    cat: &'a mut Catalogue,
    stack: Vec<EntryId>,
}

impl<'a> AddCursor<'a> {
    pub fn new(cat: &'a mut Catalogue) -> Self
    {
        let root = cat.root();
        Self {
            cat,
            stack: vec![root],
        }
    }

    fn current(&self) -> EntryId
    {
        *self.stack.last().expect("add cursor stack never empties below root")
    }

    /// Appends `data` under the name `name` in the directory currently
    /// open. If `data` is itself a directory, it becomes the new current
    /// directory — matching the original add cursor's behaviour of
    /// "descending" into a directory entry as soon as it is added, ready
    /// to receive its children.
    pub fn add(&mut self, name: Vec<u8>, data: NodeData) -> EntryId
    {
        let is_dir = matches!(data, NodeData::Directory { .. });
        let dir = self.current();
        let id = self.cat.add_named(dir, name, data);
        if is_dir {
            self.stack.push(id);
        }
        id
    }

    /// The synthetic end-of-directory entry: pops to the parent.
    pub fn add_end_of_directory(&mut self) -> CoreResult<()>
    {
        if self.stack.len() == 1 {
            return Err(CoreError::bug(
                "catalogue_add_cursor",
                "end-of-directory with no open directory to close",
            ));
        }
        self.stack.pop();
        Ok(())
    }
}

/// The "same filesystem" predicate from spec.md §3.2 / SPEC_FULL.md §3.6.
///
/// The core never stats the filesystem itself; a driver walking a live
/// tree calls this with the root's `fs_device_id` and each candidate's,
/// and skips descending into the candidate when it returns `false`.
pub struct CaptureFilter;

impl CaptureFilter {
    pub fn same_fs(root_dev: u64, candidate_dev: u64) -> bool
    {
        root_dev == candidate_dev
    }
}

/// One item yielded by [`ReadCursor`] or [`SubReadCursor`].
#[derive(Debug)]
pub enum ReadItem {
    Entry(EntryId),
    /// A path component synthesized by [`SubReadCursor`] to stand in for
    /// a directory that the caller didn't ask to see the attributes of,
    /// only to descend through.
    SyntheticDirectory(Vec<u8>),
    EndOfDirectory,
    Eof,
}

/// Flat depth-first walk over the whole tree, in on-disk order (a
/// directory's own entry, then each child in turn, then an
/// end-of-directory marker), per spec.md §4.9 "`read` cursor".
pub struct ReadCursor<'a> {
    cat: &'a Catalogue,
    /// Stack of `(directory, next child index)` frames; the root frame is
    /// synthetic (the root itself is never yielded as an `Entry`).
    stack: Vec<(EntryId, usize)>,
    done: bool,
}

impl<'a> ReadCursor<'a> {
    pub fn new(cat: &'a Catalogue) -> Self
    {
        let root = cat.root();
        Self {
            cat,
            stack: vec![(root, 0)],
            done: false,
        }
    }

    pub fn read(&mut self) -> ReadItem
    {
        if self.done {
            return ReadItem::Eof;
        }
        loop {
            let (dir, idx) = match self.stack.last().copied() {
                Some(frame) => frame,
                None => {
                    self.done = true;
                    return ReadItem::Eof;
                }
            };
            let children = self.cat.children_of(dir);
            if idx >= children.len() {
                self.stack.pop();
                if self.stack.is_empty() {
                    self.done = true;
                    return ReadItem::Eof;
                }
                return ReadItem::EndOfDirectory;
            }
            let child = children[idx];
            self.stack.last_mut().unwrap().1 += 1;
            if self.cat.is_directory(child) {
                self.stack.push((child, 0));
            }
            return ReadItem::Entry(child);
        }
    }

    /// Skips over the rest of the directory currently open (as if every
    /// remaining sibling and its subtree had been read and discarded),
    /// landing just past that directory's end-of-directory marker.
    pub fn skip_read_to_parent_dir(&mut self)
    {
        if self.stack.len() <= 1 {
            self.done = true;
            return;
        }
        self.stack.pop();
    }
}

/// Scoped walk under a user-supplied relative path, per spec.md §4.9
/// "`sub_read` cursor": first emits the path components as synthetic
/// directories, then yields the subtree via a plain [`ReadCursor`],
/// finally emits enough end-of-directory markers to return to root.
pub struct SubReadCursor<'a> {
    cat: &'a Catalogue,
    prefix: Vec<Vec<u8>>,
    prefix_emitted: usize,
    inner: Option<ReadCursor<'a>>,
    closing: usize,
}

impl<'a> SubReadCursor<'a> {
    /// `path` is a sequence of path components, e.g. `[b"a", b"b"]` for
    /// `a/b`. Fails if any component along the path does not exist or is
    /// not a directory.
    pub fn new(cat: &'a Catalogue, path: &[&[u8]]) -> CoreResult<Self>
    {
        let mut cursor = cat.root();
        for comp in path {
            match cat.find_child(cursor, comp) {
                Some(id) if cat.is_directory(id) => cursor = id,
                Some(_) => {
                    return Err(CoreError::range(format!(
                        "sub_read path component {:?} is not a directory",
                        String::from_utf8_lossy(comp)
                    )))
                }
                None => {
                    return Err(CoreError::range(format!(
                        "sub_read path component {:?} not found",
                        String::from_utf8_lossy(comp)
                    )))
                }
            }
        }
        Ok(Self {
            cat,
            prefix: path.iter().map(|c| c.to_vec()).collect(),
            prefix_emitted: 0,
            inner: None,
            closing: 0,
        })
    }

    pub fn read(&mut self) -> ReadItem
    {
        if self.prefix_emitted < self.prefix.len() {
            let name = self.prefix[self.prefix_emitted].clone();
            self.prefix_emitted += 1;
            return ReadItem::SyntheticDirectory(name);
        }
        if self.inner.is_none() {
            let mut cursor = self.cat.root();
            for comp in &self.prefix {
                cursor = self.cat.find_child(cursor, comp).expect("validated in new()");
            }
            self.closing = self.prefix.len();
            let mut rc = ReadCursor::new(self.cat);
            rc.stack = vec![(cursor, 0)];
            rc.done = false;
            self.inner = Some(rc);
        }
        let inner = self.inner.as_mut().unwrap();
        match inner.read() {
            ReadItem::Eof if self.closing > 0 => {
                self.closing -= 1;
                ReadItem::EndOfDirectory
            }
            other => other,
        }
    }
}

/// Outcome of comparing one external entry against the catalogue, per
/// spec.md §4.9 "`compare` cursor".
#[derive(Debug)]
pub enum CompareOutcome {
    Found(EntryId),
    Absent,
}

/// Synchronous walk against an externally driven stream of `(name,
/// is_directory)` probes, such as a live filesystem capture or another
/// catalogue's `read` cursor. Keeps an internal path so that descents
/// into branches the catalogue doesn't have are tracked without
/// allocating real nodes for them (`out_compare`, per spec.md).
pub struct CompareCursor<'a> {
    cat: &'a Catalogue,
    /// `Some(id)` while still inside real catalogue directories; `None`
    /// once a descent has entered a branch absent from the catalogue
    /// (`out_compare` mode — tracked only by depth from here on).
    stack: Vec<Option<EntryId>>,
    out_compare_depth: u32,
}

impl<'a> CompareCursor<'a> {
    pub fn new(cat: &'a Catalogue) -> Self
    {
        let root = cat.root();
        Self {
            cat,
            stack: vec![Some(root)],
            out_compare_depth: 0,
        }
    }

    /// Compares one named probe against the entry of the same name in the
    /// directory currently open. Does not itself descend; call
    /// [`Self::descend`] / [`Self::ascend`] to follow directory structure.
    pub fn compare(&self, name: &[u8]) -> CompareOutcome
    {
        match self.stack.last().copied().flatten() {
            Some(dir) => match self.cat.find_child(dir, name) {
                Some(id) => CompareOutcome::Found(id),
                None => CompareOutcome::Absent,
            },
            None => CompareOutcome::Absent,
        }
    }

    /// Descends into the named child (as a directory) for subsequent
    /// `compare` calls. If the catalogue has no such directory, the
    /// descent still proceeds in `out_compare` mode: every subsequent
    /// `compare` reports absent until a matching `ascend`.
    pub fn descend(&mut self, name: &[u8])
    {
        if self.out_compare_depth > 0 {
            self.out_compare_depth += 1;
            return;
        }
        match self.stack.last().copied().flatten() {
            Some(dir) => match self.cat.find_child(dir, name) {
                Some(id) if self.cat.is_directory(id) => self.stack.push(Some(id)),
                _ => {
                    self.out_compare_depth = 1;
                }
            },
            None => self.out_compare_depth += 1,
        }
    }

    pub fn ascend(&mut self)
    {
        if self.out_compare_depth > 0 {
            self.out_compare_depth -= 1;
        } else if self.stack.len() > 1 {
            self.stack.pop();
        }
    }
}

/// The destroyed-kind lookup `update_destroyed_with` needs when it finds
/// a name present in the reference but missing here — exposed separately
/// from [`Catalogue::update_destroyed_with`] so callers building their
/// own merge logic over externally-driven streams can reuse it.
pub fn base_kind_of_leaf(leaf: &LeafEntry) -> BaseKind
{
    leaf.base_kind()
}

pub fn saved_status_of_leaf(leaf: &LeafEntry) -> SavedStatus
{
    leaf.saved_status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::entry::{FileEntry, InodeCommon, PayloadLocation};
    use crate::datetime::{DateTime, TimeUnit};
    use crate::infinint::Infinint;

    fn inode() -> InodeCommon
    {
        InodeCommon {
            uid: 0,
            gid: 0,
            perm: 0o644,
            atime: DateTime::new(TimeUnit::Second, Infinint::from(1u64)),
            mtime: DateTime::new(TimeUnit::Second, Infinint::from(1u64)),
            ctime: DateTime::new(TimeUnit::Second, Infinint::from(1u64)),
            fs_device_id: 0,
            ea: None,
            fsa: None,
        }
    }

    fn file() -> NodeData
    {
        NodeData::Leaf(LeafEntry::File(FileEntry {
            inode: inode(),
            status: SavedStatus::Saved,
            size: Infinint::from(1u64),
            stored_size: Infinint::from(1u64),
            sparse: false,
            location: Some(PayloadLocation::Archived {
                offset: Infinint::zero(),
                size: Infinint::from(1u64),
            }),
            payload_crc: Some(0),
            delta_signature: None,
        }))
    }

    fn build_tree() -> Catalogue
    {
        let mut cat = Catalogue::new(inode());
        {
            let mut add = AddCursor::new(&mut cat);
            add.add(
                b"dir".to_vec(),
                NodeData::Directory {
                    inode: inode(),
                    status: SavedStatus::NotSaved,
                    children: Vec::new(),
                },
            );
            add.add(b"inner".to_vec(), file());
            add.add_end_of_directory().unwrap();
            add.add(b"top".to_vec(), file());
        }
        cat
    }

    #[test]
    fn add_cursor_builds_nested_directories()
    {
        let cat = build_tree();
        let root = cat.root();
        assert_eq!(cat.children_of(root).len(), 2);
        let dir = cat.find_child(root, b"dir").unwrap();
        assert!(cat.is_directory(dir));
        assert!(cat.find_child(dir, b"inner").is_some());
    }

    #[test]
    fn read_cursor_flat_dfs_matches_on_disk_order()
    {
        let cat = build_tree();
        let mut rc = ReadCursor::new(&cat);
        let mut names = Vec::new();
        loop {
            match rc.read() {
                ReadItem::Entry(id) => names.push(String::from_utf8_lossy(cat.name_of(id)).to_string()),
                ReadItem::EndOfDirectory => names.push("<eod>".to_string()),
                ReadItem::SyntheticDirectory(_) => unreachable!("ReadCursor never synthesizes"),
                ReadItem::Eof => break,
            }
        }
        assert_eq!(names, vec!["dir", "inner", "<eod>", "top"]);
    }

    #[test]
    fn skip_read_to_parent_dir_jumps_past_subtree()
    {
        let cat = build_tree();
        let mut rc = ReadCursor::new(&cat);
        assert!(matches!(rc.read(), ReadItem::Entry(_))); // dir
        rc.skip_read_to_parent_dir();
        match rc.read() {
            ReadItem::Entry(id) => assert_eq!(cat.name_of(id), b"top"),
            other => panic!("expected top entry, got {other:?}"),
        }
    }

    #[test]
    fn sub_read_cursor_scopes_to_subtree()
    {
        let cat = build_tree();
        let mut sr = SubReadCursor::new(&cat, &[b"dir"]).unwrap();
        let mut items = Vec::new();
        loop {
            match sr.read() {
                ReadItem::Entry(id) => items.push(String::from_utf8_lossy(cat.name_of(id)).to_string()),
                ReadItem::SyntheticDirectory(name) => {
                    items.push(format!("<synthetic {}>", String::from_utf8_lossy(&name)))
                }
                ReadItem::EndOfDirectory => items.push("<eod>".to_string()),
                ReadItem::Eof => break,
            }
        }
        assert!(items.contains(&"<synthetic dir>".to_string()));
        assert!(items.contains(&"inner".to_string()));
    }

    #[test]
    fn compare_cursor_reports_absent_in_missing_branch()
    {
        let cat = build_tree();
        let mut cmp = CompareCursor::new(&cat);
        assert!(matches!(cmp.compare(b"dir"), CompareOutcome::Found(_)));
        cmp.descend(b"nonexistent");
        assert!(matches!(cmp.compare(b"whatever"), CompareOutcome::Absent));
        cmp.ascend();
        assert!(matches!(cmp.compare(b"top"), CompareOutcome::Found(_)));
    }

    #[test]
    fn capture_filter_matches_only_identical_device()
    {
        assert!(CaptureFilter::same_fs(7, 7));
        assert!(!CaptureFilter::same_fs(7, 8));
    }
}
