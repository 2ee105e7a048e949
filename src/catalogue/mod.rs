//! The catalogue: a typed directory tree that is both the in-memory index
//! and the on-disk terminal section of every archive, per spec.md §3.2,
//! §4.8–§4.9.
//!
//! Cyclic parent/child structure is replaced by an arena indexed by
//! stable 32-bit ids, per spec.md §9 "Cyclic structures": each directory
//! holds an ordered list of child ids and a parent id, and the catalogue
//! owns the arena.

pub mod entry;
pub mod walk;

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::datetime::DateTime;
use crate::error::CoreError;

use entry::{
    read_name, write_name, BaseKind, EntryTag, InodeCommon, LeafEntry, MirageEntry, SavedStatus,
};

pub type EntryId = u32;

#[derive(Clone, Debug)]
pub enum NodeData {
    Directory {
        inode: InodeCommon,
        status: SavedStatus,
        children: Vec<EntryId>,
    },
    Leaf(LeafEntry),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub parent: Option<EntryId>,
    pub name: Vec<u8>,
    pub data: NodeData,
}

/// Per-link-id bookkeeping for hard-link coalescence, per spec.md §3.2
/// invariant 2 and §9 "Hard links (mirage/etoile)".
#[derive(Default, Clone, Debug)]
struct Etoile {
    ref_count: u32,
    /// Set once the first mirage pointing at this link id has been
    /// serialized, so later dumps of the same link id emit id-only.
    first_written: bool,
}

/// Accumulated during a walk, per SPEC_FULL.md §3 item 5
/// (`entree_stats.cpp`, dropped by the distillation but cheap and purely
/// additive — kept as ambient observability, not a query feature).
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct CatalogueStats {
    pub files_saved: u64,
    pub files_not_saved: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub devices: u64,
    pub destroyed: u64,
    pub ignored: u64,
    pub hard_links: u64,
    pub total_size: u64,
    pub total_compressed_size: u64,
}

impl CatalogueStats {
    fn observe(&mut self, leaf: &LeafEntry)
    {
        match leaf {
            LeafEntry::File(f) => {
                if f.status == SavedStatus::Saved || f.status == SavedStatus::Delta {
                    self.files_saved += 1;
                } else {
                    self.files_not_saved += 1;
                }
                self.total_size += u64::try_from(&f.size).unwrap_or(0);
                self.total_compressed_size += u64::try_from(&f.stored_size).unwrap_or(0);
            }
            LeafEntry::Symlink(_) => self.symlinks += 1,
            LeafEntry::CharDev(_) | LeafEntry::BlockDev(_) => self.devices += 1,
            LeafEntry::Fifo(_) | LeafEntry::Socket(_) | LeafEntry::Door(_) => self.devices += 1,
            LeafEntry::Destroyed(_) => self.destroyed += 1,
            LeafEntry::IgnoredDir => self.ignored += 1,
            LeafEntry::Mirage(_) => self.hard_links += 1,
        }
    }
}

/// The directory tree container. Owns the arena and the etoile table.
pub struct Catalogue {
    arena: Vec<Node>,
    root: EntryId,
    etoiles: HashMap<u64, Etoile>,
    next_link_id: u64,
    stats: CatalogueStats,
}

impl Catalogue {
    pub fn new(root_inode: InodeCommon) -> Self
    {
        let root_node = Node {
            parent: None,
            name: Vec::new(),
            data: NodeData::Directory {
                inode: root_inode,
                status: SavedStatus::NotSaved,
                children: Vec::new(),
            },
        };
        Self {
            arena: vec![root_node],
            root: 0,
            etoiles: HashMap::new(),
            next_link_id: 1,
            stats: CatalogueStats::default(),
        }
    }

    pub fn root(&self) -> EntryId
    {
        self.root
    }

    pub fn stats(&self) -> &CatalogueStats
    {
        &self.stats
    }

    pub fn node(&self, id: EntryId) -> &Node
    {
        &self.arena[id as usize]
    }

    pub fn parent_of(&self, id: EntryId) -> Option<EntryId>
    {
        self.arena[id as usize].parent
    }

    pub fn children_of(&self, id: EntryId) -> &[EntryId]
    {
        match &self.arena[id as usize].data {
            NodeData::Directory { children, .. } => children,
            NodeData::Leaf(_) => &[],
        }
    }

    pub fn name_of(&self, id: EntryId) -> &[u8]
    {
        &self.arena[id as usize].name
    }

    pub fn is_directory(&self, id: EntryId) -> bool
    {
        matches!(self.arena[id as usize].data, NodeData::Directory { .. })
    }

    pub fn find_child(&self, dir: EntryId, name: &[u8]) -> Option<EntryId>
    {
        self.children_of(dir)
            .iter()
            .copied()
            .find(|&c| self.arena[c as usize].name == name)
    }

    /// Allocates a new hard-link id for a freshly discovered inode.
    pub fn new_link_id(&mut self) -> u64
    {
        let id = self.next_link_id;
        self.next_link_id += 1;
        id
    }

    fn push_node(&mut self, node: Node) -> EntryId
    {
        self.arena.push(node);
        (self.arena.len() - 1) as u32
    }

    /// Appends `data` as a new named child of `dir`. Mirrors spec.md §4.9
    /// "`add` cursor": `add(entry)` appends to current directory. If
    /// `name` already exists in `dir`, this merges per invariant: two
    /// directories merge (new inherits existing children), otherwise the
    /// existing entry is replaced and freed.
    pub fn add_named(&mut self, dir: EntryId, name: Vec<u8>, data: NodeData) -> EntryId
    {
        if let Some(existing) = self.find_child(dir, &name) {
            return self.merge_named(existing, data);
        }
        if let NodeData::Leaf(leaf) = &data {
            self.stats.observe(leaf);
        } else {
            self.stats.directories += 1;
        }
        if let NodeData::Leaf(LeafEntry::Mirage(m)) = &data {
            self.register_mirage(m);
        }
        let id = self.push_node(Node {
            parent: Some(dir),
            name,
            data,
        });
        match &mut self.arena[dir as usize].data {
            NodeData::Directory { children, .. } => children.push(id),
            NodeData::Leaf(_) => unreachable!("add_named target must be a directory"),
        }
        id
    }

    /// Only tracks ref-count (invariant 2): whether this particular
    /// mirage happens to carry the inode says nothing about whether the
    /// etoile has been *dumped* yet — that transition happens in
    /// `dump_entry`, not here. Setting `first_written` on registration
    /// would make `dump_entry` skip writing the one mirage meant to carry
    /// the real inode.
    fn register_mirage(&mut self, m: &MirageEntry)
    {
        let e = self.etoiles.entry(m.link_id).or_default();
        e.ref_count += 1;
    }

    /// Directory-merge case from spec.md §4.9: "Adding a child with a name
    /// already present ... merges the existing and the new: if both are
    /// directories, the new directory inherits the existing children;
    /// otherwise the existing is replaced and freed."
    fn merge_named(&mut self, existing: EntryId, new_data: NodeData) -> EntryId
    {
        let both_directories = matches!(self.arena[existing as usize].data, NodeData::Directory { .. })
            && matches!(new_data, NodeData::Directory { .. });
        if both_directories {
            let existing_children = match &self.arena[existing as usize].data {
                NodeData::Directory { children, .. } => children.clone(),
                NodeData::Leaf(_) => unreachable!(),
            };
            if let NodeData::Directory {
                inode: new_inode,
                status: new_status,
                ..
            } = new_data
            {
                self.arena[existing as usize].data = NodeData::Directory {
                    inode: new_inode,
                    status: new_status,
                    children: existing_children,
                };
            }
        } else {
            if let NodeData::Leaf(leaf) = &new_data {
                self.stats.observe(leaf);
            }
            if let NodeData::Leaf(LeafEntry::Mirage(m)) = &new_data {
                self.register_mirage(m);
            }
            self.arena[existing as usize].data = new_data;
        }
        existing
    }

    /// Scans `reference`, and for every name present there but missing in
    /// `self` (same relative position), appends a `destroyed` entry with
    /// the reference entry's kind and `now`. Per spec.md §4.9.
    pub fn update_destroyed_with(&mut self, reference: &Catalogue, now: DateTime)
    {
        self.update_destroyed_rec(self.root, reference, reference.root, &now);
    }

    fn update_destroyed_rec(
        &mut self,
        self_dir: EntryId,
        reference: &Catalogue,
        ref_dir: EntryId,
        now: &DateTime,
    )
    {
        let ref_children: Vec<EntryId> = reference.children_of(ref_dir).to_vec();
        for ref_child in ref_children {
            let name = reference.name_of(ref_child).to_vec();
            match self.find_child(self_dir, &name) {
                None => {
                    let kind = Self::base_kind_of(reference, ref_child);
                    let destroyed = NodeData::Leaf(LeafEntry::Destroyed(entry::DestroyedEntry {
                        original_kind: kind,
                        observed_at: now.clone(),
                    }));
                    self.add_named(self_dir, name, destroyed);
                }
                Some(existing) => {
                    let existing_is_dir = self.is_directory(existing);
                    let ref_is_dir = reference.is_directory(ref_child);
                    if existing_is_dir && ref_is_dir {
                        self.update_destroyed_rec(existing, reference, ref_child, now);
                    }
                    // A type change (directory in reference, file in
                    // self, or vice versa) skips the reference sub-tree
                    // and emits nothing further: the existing entry
                    // already records the new type, which is itself the
                    // evidence of the change.
                }
            }
        }
    }

    fn base_kind_of(cat: &Catalogue, id: EntryId) -> BaseKind
    {
        match &cat.arena[id as usize].data {
            NodeData::Directory { .. } => BaseKind::Directory,
            NodeData::Leaf(leaf) => leaf.base_kind(),
        }
    }

    /// Recursive dump of the root directory's contents, per spec.md
    /// §3.3 "catalogue_dump". The root itself is never written as a named
    /// entry; only its children, followed by the final end-of-directory
    /// marker.
    pub fn dump<W: Write>(&mut self, w: &mut W) -> Result<(), CoreError>
    {
        self.dump_children(w, self.root)
    }

    fn dump_children<W: Write>(&mut self, w: &mut W, dir: EntryId) -> Result<(), CoreError>
    {
        let children = self.children_of(dir).to_vec();
        for child in children {
            self.dump_entry(w, child)?;
        }
        EntryTag {
            kind: BaseKind::EndOfDirectory,
            status: SavedStatus::NotSaved,
        }
        .write_to(w)
    }

    fn dump_entry<W: Write>(&mut self, w: &mut W, id: EntryId) -> Result<(), CoreError>
    {
        let name = self.arena[id as usize].name.clone();
        match self.arena[id as usize].data.clone() {
            NodeData::Directory { inode, status, .. } => {
                EntryTag {
                    kind: BaseKind::Directory,
                    status,
                }
                .write_to(w)?;
                write_name(w, &name)?;
                inode.write_to(w)?;
                self.dump_children(w, id)?;
            }
            NodeData::Leaf(LeafEntry::Mirage(m)) => {
                let already_written = self
                    .etoiles
                    .get(&m.link_id)
                    .map(|e| e.first_written)
                    .unwrap_or(false);
                EntryTag {
                    kind: BaseKind::Mirage,
                    status: SavedStatus::NotSaved,
                }
                .write_to(w)?;
                write_name(w, &name)?;
                w.write_all(&m.link_id.to_be_bytes())?;
                if already_written && m.inode.is_some() {
                    // Already dumped once elsewhere: id-only from here on.
                    w.write_all(&[0])?;
                } else if let Some(inode) = &m.inode {
                    w.write_all(&[1])?;
                    inode.dump(w)?;
                    self.etoiles.entry(m.link_id).or_default().first_written = true;
                } else {
                    w.write_all(&[0])?;
                }
            }
            NodeData::Leaf(leaf) => {
                return self.dump_leaf_with_name(w, &name, &leaf);
            }
        }
        Ok(())
    }

    /// `LeafEntry::dump` writes `tag` immediately followed by the body; a
    /// named entry's wire form is `tag, name, body`. Since the tag must
    /// precede the name but `LeafEntry::dump` emits both tag and body in
    /// one call, this re-dumps through a scratch buffer and splices the
    /// name in after the tag bytes it produced.
    fn dump_leaf_with_name<W: Write>(
        &self,
        w: &mut W,
        name: &[u8],
        leaf: &LeafEntry,
    ) -> Result<(), CoreError>
    {
        let mut scratch = Vec::new();
        leaf.dump(&mut scratch)?;
        let tag_len = Self::tag_len(leaf);
        w.write_all(&scratch[..tag_len])?;
        write_name(w, name)?;
        w.write_all(&scratch[tag_len..])?;
        Ok(())
    }

    fn tag_len(leaf: &LeafEntry) -> usize
    {
        match leaf {
            LeafEntry::Destroyed(_) | LeafEntry::IgnoredDir | LeafEntry::Mirage(_) => 1,
            _ => 2,
        }
    }

    /// Reads a full catalogue body (root's children plus terminating
    /// end-of-directory marker) written by [`Self::dump`].
    pub fn read<R: Read>(r: &mut R, root_inode: InodeCommon) -> Result<Self, CoreError>
    {
        let mut cat = Self::new(root_inode);
        cat.read_children(r, cat.root)?;
        Ok(cat)
    }

    fn read_children<R: Read>(&mut self, r: &mut R, dir: EntryId) -> Result<(), CoreError>
    {
        loop {
            let tag = EntryTag::read_from(r)?;
            match tag.kind {
                BaseKind::EndOfDirectory => return Ok(()),
                BaseKind::Directory => {
                    let name = read_name(r)?;
                    let inode = InodeCommon::read_from(r)?;
                    let child = self.add_named(
                        dir,
                        name,
                        NodeData::Directory {
                            inode,
                            status: tag.status,
                            children: Vec::new(),
                        },
                    );
                    self.read_children(r, child)?;
                }
                BaseKind::Mirage => {
                    let name = read_name(r)?;
                    let mut id_buf = [0u8; 8];
                    r.read_exact(&mut id_buf)?;
                    let link_id = u64::from_be_bytes(id_buf);
                    let mut has_inode = [0u8; 1];
                    r.read_exact(&mut has_inode)?;
                    let inode = if has_inode[0] != 0 {
                        let inner_tag = EntryTag::read_from(r)?;
                        Some(Box::new(LeafEntry::read(r, inner_tag)?))
                    } else {
                        None
                    };
                    self.add_named(
                        dir,
                        name,
                        NodeData::Leaf(LeafEntry::Mirage(MirageEntry { link_id, inode })),
                    );
                }
                _ => {
                    let name = read_name(r)?;
                    let leaf = LeafEntry::read(r, tag)?;
                    self.add_named(dir, name, NodeData::Leaf(leaf));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::entry::{FileEntry, PayloadLocation, SymlinkEntry};
    use crate::datetime::TimeUnit;
    use crate::infinint::Infinint;

    fn sample_inode() -> InodeCommon
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

    fn sample_file(size: u64) -> LeafEntry
    {
        LeafEntry::File(FileEntry {
            inode: sample_inode(),
            status: SavedStatus::Saved,
            size: Infinint::from(size),
            stored_size: Infinint::from(size),
            sparse: false,
            location: Some(PayloadLocation::Archived {
                offset: Infinint::from(0u64),
                size: Infinint::from(size),
            }),
            payload_crc: Some(1),
            delta_signature: None,
        })
    }

    #[test]
    fn dump_then_read_preserves_structure()
    {
        let mut cat = Catalogue::new(sample_inode());
        let root = cat.root();
        let dir = cat.add_named(
            root,
            b"sub".to_vec(),
            NodeData::Directory {
                inode: sample_inode(),
                status: SavedStatus::NotSaved,
                children: Vec::new(),
            },
        );
        cat.add_named(dir, b"a".to_vec(), NodeData::Leaf(sample_file(1024)));
        cat.add_named(
            root,
            b"c".to_vec(),
            NodeData::Leaf(LeafEntry::Symlink(SymlinkEntry {
                inode: sample_inode(),
                status: SavedStatus::Saved,
                target: Some(b"../sub/a".to_vec()),
            })),
        );

        let mut buf = Vec::new();
        cat.dump(&mut buf).unwrap();

        let mut cursor = &buf[..];
        let back = Catalogue::read(&mut cursor, sample_inode()).unwrap();

        let back_root = back.root();
        assert_eq!(back.children_of(back_root).len(), 2);
        let back_dir = back.find_child(back_root, b"sub").unwrap();
        assert!(back.is_directory(back_dir));
        let back_a = back.find_child(back_dir, b"a").unwrap();
        match &back.node(back_a).data {
            NodeData::Leaf(LeafEntry::File(f)) => {
                assert_eq!(f.size, Infinint::from(1024u64));
            }
            _ => panic!("expected file"),
        }
    }

    #[test]
    fn hard_link_coalescence_emits_one_inode_and_id_only_mirages()
    {
        let mut cat = Catalogue::new(sample_inode());
        let root = cat.root();
        let link_id = cat.new_link_id();
        let file = sample_file(10);
        cat.add_named(
            root,
            b"a".to_vec(),
            NodeData::Leaf(LeafEntry::Mirage(MirageEntry {
                link_id,
                inode: Some(Box::new(file)),
            })),
        );
        cat.add_named(
            root,
            b"b".to_vec(),
            NodeData::Leaf(LeafEntry::Mirage(MirageEntry {
                link_id,
                inode: None,
            })),
        );

        let mut buf = Vec::new();
        cat.dump(&mut buf).unwrap();
        let mut cursor = &buf[..];
        let back = Catalogue::read(&mut cursor, sample_inode()).unwrap();
        let root = back.root();
        let a = back.find_child(root, b"a").unwrap();
        let b = back.find_child(root, b"b").unwrap();
        match (&back.node(a).data, &back.node(b).data) {
            (NodeData::Leaf(LeafEntry::Mirage(ma)), NodeData::Leaf(LeafEntry::Mirage(mb))) => {
                assert_eq!(ma.link_id, mb.link_id);
                assert!(ma.inode.is_some());
                assert!(mb.inode.is_none());
            }
            _ => panic!("expected mirages"),
        }
    }

    #[test]
    fn update_destroyed_with_adds_tombstone_for_missing_name()
    {
        let mut reference = Catalogue::new(sample_inode());
        let rroot = reference.root();
        reference.add_named(rroot, b"gone".to_vec(), NodeData::Leaf(sample_file(5)));
        reference.add_named(rroot, b"kept".to_vec(), NodeData::Leaf(sample_file(5)));

        let mut current = Catalogue::new(sample_inode());
        let croot = current.root();
        current.add_named(croot, b"kept".to_vec(), NodeData::Leaf(sample_file(5)));

        current.update_destroyed_with(&reference, DateTime::from_unix_seconds(1_700_000_999));

        let croot = current.root();
        let gone = current.find_child(croot, b"gone").unwrap();
        match &current.node(gone).data {
            NodeData::Leaf(LeafEntry::Destroyed(d)) => assert_eq!(d.original_kind, BaseKind::File),
            _ => panic!("expected destroyed tombstone"),
        }
        assert_eq!(current.stats().destroyed, 1);
    }
}
