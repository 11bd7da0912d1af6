//! A [`Backend`] that maps every path onto a real directory on the host,
//! the way the teacher crate's `unpfs` example does — this module is that
//! example's `Filesystem` impl rewritten against `ninep::backend::Backend`,
//! which does its own walk/setattr/readdir orchestration so this backend
//! only has to answer plain POSIX questions.

use async_trait::async_trait;
use ninep::backend::{Backend, DirEntryStat, NodeType, NodeStat};
use ninep::error::{errno, Error};
use ninep::proto::StatFs;
use ninep::utils::Result;
use nix::libc::{O_CREAT, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY};
use std::io::SeekFrom;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Flags this backend honors in `Tlopen`/`Tlcreate`; other bits (e.g. a
/// client-propagated `O_DIRECT`) are masked off before reaching `open(2)`,
/// mirroring the teacher's `UNIX_FLAGS` mask and its rationale: `O_DIRECT`
/// requires aligned buffers this server's read/write path does not provide.
const UNIX_FLAGS: u32 = (O_WRONLY | O_RDONLY | O_RDWR | O_CREAT | O_TRUNC) as u32;

/// Exports one host directory as the 9P root. Every `Backend` path is
/// slash-rooted (`/`, `/a/b`); this type maps that onto `root.join(path)`.
pub struct PassthroughBackend {
    root: PathBuf,
}

impl PassthroughBackend {
    pub fn new(root: PathBuf) -> PassthroughBackend {
        PassthroughBackend { root }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path == "/" {
            self.root.clone()
        } else {
            self.root.join(path.trim_start_matches('/'))
        }
    }
}

fn node_type_of(meta: &std::fs::Metadata) -> NodeType {
    let ft = meta.file_type();
    if ft.is_dir() {
        NodeType::Directory
    } else if ft.is_symlink() {
        NodeType::Symlink
    } else {
        NodeType::File
    }
}

/// Host metadata doesn't carry a monotonic "version" the way some network
/// filesystems do; the teacher's `unpfs` always reports 0, and this backend
/// preserves that rather than inventing one (an inode's mtime already
/// serves that purpose for most clients).
fn node_stat_from_meta(meta: &std::fs::Metadata) -> NodeStat {
    NodeStat {
        node: meta.ino(),
        kind: node_type_of(meta),
        mode: meta.mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        nlink: meta.nlink(),
        rdev: meta.rdev(),
        size: meta.size(),
        version: 0,
        atime_ms: meta.atime() * 1000 + meta.atime_nsec() / 1_000_000,
        mtime_ms: meta.mtime() * 1000 + meta.mtime_nsec() / 1_000_000,
        ctime_ms: meta.ctime() * 1000 + meta.ctime_nsec() / 1_000_000,
    }
}

#[async_trait]
impl Backend for PassthroughBackend {
    async fn stat(&self, path: &str) -> Result<NodeStat> {
        Ok(node_stat_from_meta(&fs::metadata(self.resolve(path)).await?))
    }

    async fn lstat(&self, path: &str) -> Result<NodeStat> {
        Ok(node_stat_from_meta(&fs::symlink_metadata(self.resolve(path)).await?))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(path)).await?)
    }

    async fn write(&self, path: &str, offset: u64, buf: &[u8]) -> Result<u32> {
        let mut file = fs::OpenOptions::new().write(true).open(self.resolve(path)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(file.write(buf).await? as u32)
    }

    async fn readlink(&self, path: &str) -> Result<String> {
        Ok(fs::read_link(self.resolve(path)).await?.to_string_lossy().into_owned())
    }

    async fn symlink(&self, target: &str, path: &str) -> Result<NodeStat> {
        let dest = self.resolve(path);
        fs::symlink(target, &dest).await?;
        self.lstat(path).await
    }

    async fn mkdir(&self, path: &str, mode: u32, _gid: u32) -> Result<NodeStat> {
        let dest = self.resolve(path);
        fs::create_dir(&dest).await?;
        fs::set_permissions(&dest, PermissionsExt::from_mode(mode)).await?;
        self.lstat(path).await
    }

    /// Device-node types are collapsed to an empty regular file, per this
    /// server's Non-goal of reproducing device-node semantics.
    async fn mknod(&self, path: &str, mode: u32, gid: u32) -> Result<NodeStat> {
        self.create(path, (O_CREAT | O_WRONLY) as u32, mode, gid).await
    }

    async fn create(&self, path: &str, flags: u32, mode: u32, _gid: u32) -> Result<NodeStat> {
        let dest = self.resolve(path);
        let oflags = nix::fcntl::OFlag::from_bits_truncate((flags & UNIX_FLAGS) as i32)
            | nix::fcntl::OFlag::O_CREAT
            | nix::fcntl::OFlag::O_EXCL;
        let omode = nix::sys::stat::Mode::from_bits_truncate(mode);
        nix::fcntl::open(&dest, oflags, omode)?;
        self.lstat(path).await
    }

    async fn open(&self, path: &str, _flags: u32) -> Result<NodeStat> {
        self.lstat(path).await
    }

    async fn link(&self, existing: &str, path: &str) -> Result<()> {
        Ok(fs::hard_link(self.resolve(existing), self.resolve(path)).await?)
    }

    async fn rename(&self, old: &str, new: &str) -> Result<()> {
        Ok(fs::rename(self.resolve(old), self.resolve(new)).await?)
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        Ok(fs::remove_file(self.resolve(path)).await?)
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        Ok(fs::remove_dir(self.resolve(path)).await?)
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        Ok(fs::set_permissions(self.resolve(path), PermissionsExt::from_mode(mode)).await?)
    }

    async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let dest = self.resolve(path);
        let uid = uid.map(nix::unistd::Uid::from_raw);
        let gid = gid.map(nix::unistd::Gid::from_raw);
        Ok(nix::unistd::chown(&dest, uid, gid)?)
    }

    async fn utimes(&self, path: &str, atime_ms: Option<i64>, mtime_ms: Option<i64>) -> Result<()> {
        let dest = self.resolve(path);
        let current = fs::metadata(&dest).await?;
        let atime = match atime_ms {
            Some(ms) => filetime::FileTime::from_unix_time(ms / 1000, ((ms.rem_euclid(1000)) * 1_000_000) as u32),
            None => filetime::FileTime::from_last_access_time(&current),
        };
        let mtime = match mtime_ms {
            Some(ms) => filetime::FileTime::from_unix_time(ms / 1000, ((ms.rem_euclid(1000)) * 1_000_000) as u32),
            None => filetime::FileTime::from_last_modification_time(&current),
        };
        tokio::task::spawn_blocking(move || filetime::set_file_times(dest, atime, mtime))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(())
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let file = fs::OpenOptions::new().write(true).open(self.resolve(path)).await?;
        file.set_len(size).await?;
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<DirEntryStat>> {
        let mut entries = fs::read_dir(self.resolve(path)).await?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            out.push(DirEntryStat { name: entry.file_name().to_string_lossy().into_owned(), stat: node_stat_from_meta(&meta) });
        }
        Ok(out)
    }

    async fn statfs(&self, path: &str) -> Result<StatFs> {
        let dest = self.resolve(path);
        let stats = tokio::task::spawn_blocking(move || nix::sys::statvfs::statvfs(&dest))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(StatFs {
            typ: ninep::config::STATFS_TYPE,
            bsize: stats.block_size() as u32,
            blocks: stats.blocks(),
            bfree: stats.blocks_free(),
            bavail: stats.blocks_available(),
            files: stats.files(),
            ffree: stats.files_free(),
            fsid: stats.filesystem_id(),
            namelen: stats.name_max() as u32,
        })
    }

    async fn fsync(&self, path: &str) -> Result<()> {
        let dest = self.resolve(path);
        if fs::metadata(&dest).await?.is_dir() {
            return Ok(());
        }
        let file = fs::OpenOptions::new().write(true).open(&dest).await.map_err(|_| Error::from(errno::EBADF))?;
        file.sync_all().await?;
        Ok(())
    }
}
