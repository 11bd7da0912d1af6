//! The FID table: maps client-chosen 32-bit handles to backend-path records.

use crate::error::{errno, Error};
use crate::utils::Result;
use std::collections::HashMap;

/// What a fid currently refers to. `Xattr`/`None` are produced by
/// `Txattrwalk`, which this server advertises as always-empty (§ extended
/// attributes are stubbed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FidKind {
    Inode,
    Xattr,
    None,
}

#[derive(Debug, Clone)]
pub struct Fid {
    pub path: String,
    pub kind: FidKind,
    pub uid: u32,
}

impl Fid {
    pub fn inode(path: impl Into<String>, uid: u32) -> Fid {
        Fid { path: path.into(), kind: FidKind::Inode, uid }
    }
}

/// Dense map of `u32 -> Fid`. Lookups on an unknown fid fail with `EBADF`,
/// per the protocol error table.
#[derive(Debug, Default)]
pub struct FidTable {
    fids: HashMap<u32, Fid>,
}

impl FidTable {
    pub fn new() -> FidTable {
        FidTable { fids: HashMap::new() }
    }

    pub fn insert(&mut self, fid: u32, record: Fid) {
        self.fids.insert(fid, record);
    }

    pub fn get(&self, fid: u32) -> Result<&Fid> {
        self.fids.get(&fid).ok_or_else(|| Error::from(errno::EBADF))
    }

    pub fn remove(&mut self, fid: u32) -> Option<Fid> {
        self.fids.remove(&fid)
    }

    pub fn contains(&self, fid: u32) -> bool {
        self.fids.contains_key(&fid)
    }

    /// Drops every fid. Called on `Tversion`, which resets the session.
    pub fn clear(&mut self) {
        self.fids.clear();
    }

    pub fn len(&self) -> usize {
        self.fids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fids.is_empty()
    }

    /// Every live `(fid, record)` pair, for session snapshot/restore.
    pub fn entries(&self) -> Vec<(u32, Fid)> {
        self.fids.iter().map(|(&fid, record)| (fid, record.clone())).collect()
    }

    /// Replaces the whole table, restoring a prior snapshot's fids.
    pub fn restore_entries(&mut self, entries: Vec<(u32, Fid)>) {
        self.fids = entries.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fid_is_ebadf() {
        let table = FidTable::new();
        let err = table.get(7).unwrap_err();
        assert_eq!(err.errno(), errno::EBADF);
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut table = FidTable::new();
        table.insert(3, Fid::inode("/a/b", 1000));
        let fid = table.get(3).unwrap();
        assert_eq!(fid.path, "/a/b");
        assert_eq!(fid.kind, FidKind::Inode);
    }

    #[test]
    fn clear_drops_all_fids() {
        let mut table = FidTable::new();
        table.insert(1, Fid::inode("/", 0));
        table.clear();
        assert!(table.is_empty());
    }
}
