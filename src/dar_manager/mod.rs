//! The dar_manager database: a per-path archive# → timestamp map that
//! answers "which archive has the most recent version of this file?",
//! per spec.md §3.4, §4.11.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::catalogue::entry::{read_name, write_name};
use crate::datetime::DateTime;
use crate::error::{CoreError, CoreResult};
use crate::infinint::Infinint;

pub const DB_MAGIC: [u8; 4] = *b"DMDB";
pub const DB_VERSION: u16 = 1;

/// Which archive in the chain holds a given base name and directory,
/// recorded once per archive in the database header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRef {
    pub archive_num: u32,
    pub base_name: String,
    pub directory: String,
}

/// One file or directory's presence across the chain.
#[derive(Clone, Debug, Default)]
pub struct Record {
    pub name: Vec<u8>,
    /// archive-number → modification-time.
    pub data: BTreeMap<u32, DateTime>,
    /// archive-number → change-time, tracked separately since EA can
    /// change without the data changing.
    pub ea: BTreeMap<u32, DateTime>,
    pub children: Vec<Record>,
}

impl Record {
    fn new(name: Vec<u8>) -> Self
    {
        Self {
            name,
            data: BTreeMap::new(),
            ea: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    fn is_empty_record(&self) -> bool
    {
        self.data.is_empty() && self.ea.is_empty() && self.children.is_empty()
    }

    fn find_child_mut(&mut self, name: &[u8]) -> Option<&mut Record>
    {
        self.children.iter_mut().find(|c| c.name == name)
    }

    fn read_from<R: Read>(r: &mut R) -> CoreResult<Self>
    {
        let name = read_name(r)?;
        let data = Self::read_map(r)?;
        let ea = Self::read_map(r)?;
        let count = Infinint::read_from(r)?;
        let count: u64 = (&count).try_into()?;
        let mut children = Vec::with_capacity(count as usize);
        for _ in 0..count {
            children.push(Record::read_from(r)?);
        }
        Ok(Self {
            name,
            data,
            ea,
            children,
        })
    }

    fn read_map<R: Read>(r: &mut R) -> CoreResult<BTreeMap<u32, DateTime>>
    {
        let count = Infinint::read_from(r)?;
        let count: u64 = (&count).try_into()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let mut num_buf = [0u8; 4];
            r.read_exact(&mut num_buf)?;
            let archive_num = u32::from_be_bytes(num_buf);
            let ts = DateTime::read_from(r)?;
            map.insert(archive_num, ts);
        }
        Ok(map)
    }

    fn write_to<W: Write>(&self, w: &mut W) -> CoreResult<()>
    {
        write_name(w, &self.name)?;
        Self::write_map(w, &self.data)?;
        Self::write_map(w, &self.ea)?;
        Infinint::from(self.children.len() as u64).write_to(w)?;
        for c in &self.children {
            c.write_to(w)?;
        }
        Ok(())
    }

    fn write_map<W: Write>(w: &mut W, map: &BTreeMap<u32, DateTime>) -> CoreResult<()>
    {
        Infinint::from(map.len() as u64).write_to(w)?;
        for (num, ts) in map {
            w.write_all(&num.to_be_bytes())?;
            ts.write_to(w)?;
        }
        Ok(())
    }
}

/// One file/inode's fields as reported by a filesystem-or-catalogue walk,
/// the input `add(archive_num, ...)` consumes.
pub struct WalkEntry {
    pub path: Vec<Vec<u8>>,
    pub is_directory: bool,
    pub mtime: DateTime,
    pub ea_ctime: Option<DateTime>,
}

/// The database root: one synthetic record per archive plus the
/// recursive per-path tree.
pub struct DarManager {
    archives: Vec<ArchiveRef>,
    root: Record,
}

impl DarManager {
    pub fn new() -> Self
    {
        Self {
            archives: Vec::new(),
            root: Record::new(Vec::new()),
        }
    }

    pub fn archives(&self) -> &[ArchiveRef]
    {
        &self.archives
    }

    /// Walks `entries`, recording `archive_num`'s mtime (and ctime, for
    /// EA) at each path. On a directory-vs-leaf mismatch between what is
    /// already recorded and what is walked, the record silently upgrades
    /// from leaf to directory without losing the leaf's existing data —
    /// per spec.md §4.11.
    pub fn add(&mut self, archive_num: u32, base_name: String, directory: String, entries: &[WalkEntry])
    {
        self.archives.push(ArchiveRef {
            archive_num,
            base_name,
            directory,
        });
        for entry in entries {
            let mut cursor = &mut self.root;
            for (i, comp) in entry.path.iter().enumerate() {
                let is_last = i + 1 == entry.path.len();
                if cursor.find_child_mut(comp).is_none() {
                    cursor.children.push(Record::new(comp.clone()));
                }
                cursor = cursor.find_child_mut(comp).unwrap();
                if is_last {
                    cursor.data.insert(archive_num, entry.mtime.clone());
                    if let Some(ea_ctime) = &entry.ea_ctime {
                        cursor.ea.insert(archive_num, ea_ctime.clone());
                    }
                }
            }
            let _ = entry.is_directory; // directories upgrade automatically: any record can gain children
        }
    }

    /// Removes `archive_num` from every record, then compacts: any record
    /// whose maps and children are all empty is deleted, and every
    /// reference to an archive number greater than `archive_num` is
    /// decremented by one. Per spec.md §4.11 and property 9.
    pub fn remove(&mut self, archive_num: u32)
    {
        Self::remove_rec(&mut self.root, archive_num);
        self.archives.retain(|a| a.archive_num != archive_num);
        for a in &mut self.archives {
            if a.archive_num > archive_num {
                a.archive_num -= 1;
            }
        }
    }

    fn remove_rec(rec: &mut Record, archive_num: u32)
    {
        rec.data.remove(&archive_num);
        rec.ea.remove(&archive_num);
        rec.data = Self::renumber_down(&rec.data, archive_num);
        rec.ea = Self::renumber_down(&rec.ea, archive_num);
        for c in &mut rec.children {
            Self::remove_rec(c, archive_num);
        }
        rec.children.retain(|c| !c.is_empty_record());
    }

    fn renumber_down(map: &BTreeMap<u32, DateTime>, removed: u32) -> BTreeMap<u32, DateTime>
    {
        map.iter()
            .map(|(&num, ts)| {
                let new_num = if num > removed { num - 1 } else { num };
                (new_num, ts.clone())
            })
            .collect()
    }

    /// Renumbers archive `src` to `dst`, preserving all records.
    pub fn permute(&mut self, src: u32, dst: u32)
    {
        if src == dst {
            return;
        }
        Self::permute_rec(&mut self.root, src, dst);
        for a in &mut self.archives {
            if a.archive_num == src {
                a.archive_num = dst;
            } else if a.archive_num == dst {
                a.archive_num = src;
            }
        }
    }

    fn permute_rec(rec: &mut Record, src: u32, dst: u32)
    {
        Self::permute_map(&mut rec.data, src, dst);
        Self::permute_map(&mut rec.ea, src, dst);
        for c in &mut rec.children {
            Self::permute_rec(c, src, dst);
        }
    }

    fn permute_map(map: &mut BTreeMap<u32, DateTime>, src: u32, dst: u32)
    {
        let a = map.remove(&src);
        let b = map.remove(&dst);
        if let Some(v) = a {
            map.insert(dst, v);
        }
        if let Some(v) = b {
            map.insert(src, v);
        }
    }

    /// Walks record by record down `path`, returning the archive number
    /// with the maximum mtime at that path, if any.
    pub fn get_most_recent(&self, path: &[&[u8]]) -> Option<u32>
    {
        let mut cursor = &self.root;
        for comp in path {
            cursor = cursor.children.iter().find(|c| c.name == *comp)?;
        }
        cursor
            .data
            .iter()
            .max_by(|a, b| a.1.cmp(b.1))
            .map(|(&num, _)| num)
    }

    /// Dumps every record with the set of archives it appeared in, per
    /// spec.md §4.11 "listing".
    pub fn listing(&self) -> Vec<(Vec<Vec<u8>>, Vec<u32>)>
    {
        let mut out = Vec::new();
        Self::listing_rec(&self.root, &mut Vec::new(), &mut out);
        out
    }

    fn listing_rec(rec: &Record, path: &mut Vec<Vec<u8>>, out: &mut Vec<(Vec<Vec<u8>>, Vec<u32>)>)
    {
        if !rec.name.is_empty() || !path.is_empty() {
            let mut archives: Vec<u32> = rec.data.keys().copied().collect();
            archives.sort_unstable();
            out.push((path.clone(), archives));
        }
        for c in &rec.children {
            path.push(c.name.clone());
            Self::listing_rec(c, path, out);
            path.pop();
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> CoreResult<()>
    {
        w.write_all(&DB_MAGIC)?;
        w.write_all(&DB_VERSION.to_be_bytes())?;
        Infinint::from(self.archives.len() as u64).write_to(w)?;
        for a in &self.archives {
            w.write_all(&a.archive_num.to_be_bytes())?;
            write_name(w, a.base_name.as_bytes())?;
            write_name(w, a.directory.as_bytes())?;
        }
        self.root.write_to(w)
    }

    pub fn read_from<R: Read>(r: &mut R) -> CoreResult<Self>
    {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != DB_MAGIC {
            return Err(CoreError::data("dar_manager database: bad magic"));
        }
        let mut version_buf = [0u8; 2];
        r.read_exact(&mut version_buf)?;
        let version = u16::from_be_bytes(version_buf);
        if version != DB_VERSION {
            return Err(CoreError::data(format!(
                "dar_manager database: unsupported version {version}"
            )));
        }
        let count = Infinint::read_from(r)?;
        let count: u64 = (&count).try_into()?;
        let mut archives = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut num_buf = [0u8; 4];
            r.read_exact(&mut num_buf)?;
            let archive_num = u32::from_be_bytes(num_buf);
            let base_name = String::from_utf8_lossy(&read_name(r)?).into_owned();
            let directory = String::from_utf8_lossy(&read_name(r)?).into_owned();
            archives.push(ArchiveRef {
                archive_num,
                base_name,
                directory,
            });
        }
        let root = Record::read_from(r)?;
        Ok(Self { archives, root })
    }
}

impl Default for DarManager {
    fn default() -> Self
    {
        Self::new()
    }
}
