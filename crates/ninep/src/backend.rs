//! The pluggable POSIX-style filesystem backend (§4.5 of the design doc).
//!
//! This is deliberately lower-level than the teacher's `Filesystem` trait,
//! which has one method per 9P operation and returns `FCall` variants
//! directly. The dispatcher owns all 9P-specific orchestration (the walk
//! loop, `Tsetattr`'s bit-by-bit fan-out, `Treaddir`'s `.`/`..` synthesis,
//! per-tag `Tread` caching); a `Backend` only has to answer plain
//! filesystem questions.

use crate::proto::{QIdType, StatFs};
use crate::utils::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
    Symlink,
}

impl NodeType {
    pub fn qid_type(&self) -> QIdType {
        match self {
            NodeType::Directory => QIdType::DIR,
            NodeType::Symlink => QIdType::SYMLINK,
            NodeType::File => QIdType::FILE,
        }
    }

    /// The `S_IFMT` format bits Linux's `struct stat` would pack into the
    /// top nibble of `mode`. `Backend` implementations are only required
    /// to hand back permission bits in `NodeStat::mode`; the dispatcher
    /// ORs this in before a mode ever reaches the wire, so a backend that
    /// (like a real host filesystem) already carries the format bits in
    /// its raw mode isn't double-counted — the bits are identical either
    /// way for a given `kind`.
    pub fn ifmt(&self) -> u32 {
        match self {
            NodeType::Directory => 0o040000,
            NodeType::Symlink => 0o120000,
            NodeType::File => 0o100000,
        }
    }

    /// Top nibble of `mode`, as `Treaddir`'s `d_type`-like field wants it.
    pub fn dirent_type(&self, mode: u32) -> u8 {
        let _ = self;
        (mode >> 12) as u8
    }
}

/// Attributes of one backend node, filled in from whatever the backend's
/// native stat call reports. Timestamps are milliseconds since the epoch;
/// the dispatcher converts to the wire's `sec`/`nsec` pairs.
#[derive(Debug, Clone)]
pub struct NodeStat {
    /// Opaque backend identity. Two stats of the same underlying node must
    /// report the same `node`; the QID assigner depends on this.
    pub node: u64,
    pub kind: NodeType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    pub rdev: u64,
    pub size: u64,
    pub version: u32,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
}

impl NodeStat {
    /// `mode` with the `S_IFMT` format bits for `kind` folded in, the
    /// shape both `Tgetattr`'s `mode` field and `Treaddir`'s `d_type`
    /// derivation (`mode >> 12`) expect.
    pub fn mode_with_type(&self) -> u32 {
        self.mode | self.kind.ifmt()
    }
}

/// One entry as reported by `Backend::list`.
#[derive(Debug, Clone)]
pub struct DirEntryStat {
    pub name: String,
    pub stat: NodeStat,
}

/// The filesystem a session's fids are resolved against. Every method
/// takes a slash-separated path rooted at the backend's export root;
/// fid-to-path bookkeeping lives in [`crate::fid::FidTable`], above this
/// trait, not below it.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn stat(&self, path: &str) -> Result<NodeStat>;
    async fn lstat(&self, path: &str) -> Result<NodeStat>;

    /// Whole-file read, used by `Tread`'s per-tag cache (§4.4): the
    /// dispatcher calls this at most once per tag regardless of how many
    /// `Tread` chunks the client issues against it.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Opens (without creating), writes `buf` at `offset`, and closes.
    /// Per the open question in the design doc, this backend does not
    /// keep file descriptors open across 9P requests; every `Twrite`
    /// re-opens the backing file.
    async fn write(&self, path: &str, offset: u64, buf: &[u8]) -> Result<u32>;

    async fn readlink(&self, path: &str) -> Result<String>;
    async fn symlink(&self, target: &str, path: &str) -> Result<NodeStat>;
    async fn mkdir(&self, path: &str, mode: u32, gid: u32) -> Result<NodeStat>;

    /// `Tmknod` is collapsed to a regular file, matching this server's
    /// Non-goal of reproducing device-node semantics.
    async fn mknod(&self, path: &str, mode: u32, gid: u32) -> Result<NodeStat>;

    /// `Tlcreate`: create and validate a new regular file. Actual byte I/O
    /// happens afterward through `write`/`read_file`.
    async fn create(&self, path: &str, flags: u32, mode: u32, gid: u32) -> Result<NodeStat>;

    /// Validates that `path` (the fid being opened) may be opened with
    /// `flags`; returns its attributes for the `Rlopen` QID.
    async fn open(&self, path: &str, flags: u32) -> Result<NodeStat>;

    async fn link(&self, existing: &str, path: &str) -> Result<()>;
    async fn rename(&self, old: &str, new: &str) -> Result<()>;
    async fn unlink(&self, path: &str) -> Result<()>;
    async fn rmdir(&self, path: &str) -> Result<()>;
    async fn chmod(&self, path: &str, mode: u32) -> Result<()>;
    async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()>;
    async fn utimes(&self, path: &str, atime_ms: Option<i64>, mtime_ms: Option<i64>) -> Result<()>;
    async fn truncate(&self, path: &str, size: u64) -> Result<()>;
    async fn list(&self, path: &str) -> Result<Vec<DirEntryStat>>;
    async fn statfs(&self, path: &str) -> Result<StatFs>;

    /// No-op unless the backend has something to flush; advisory only.
    async fn fsync(&self, path: &str) -> Result<()>;
}
