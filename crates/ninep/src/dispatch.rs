//! The request dispatcher: turns one decoded [`FCall`] into a reply,
//! against a [`Session`] and a [`Backend`].
//!
//! Unknown message ids never reach here — `wire::read_msg` rejects a type
//! byte it doesn't recognize, and the transport treats that as reason to
//! drop the connection rather than attempt a reply (§5, "unknown id"
//! scenario). Every `FCall` variant that does arrive is matched below;
//! `TAuth` is the one variant that is recognized but always answered with
//! `EOPNOTSUPP`, since authentication is out of scope.
//!
//! Each handler takes the session behind a `tokio::sync::Mutex` and locks
//! it only for the brief fid-lookup and fid-table-mutation steps, not for
//! the backend call in between. That is what lets a `Tflush` for the same
//! tag interleave with an in-flight request: the tag is registered before
//! the backend call and checked again after it, so a flush that lands
//! during the await is still observed.

use crate::backend::{Backend, NodeStat};
use crate::config::BLOCKSIZE;
use crate::error::{errno, Error};
use crate::fid::{Fid, FidKind};
use crate::proto::*;
use crate::qid;
use crate::session::Session;
use crate::tag::Scratch;
use crate::utils::Result;
use log::{debug, error};
use tokio::sync::Mutex;

/// `AT_REMOVEDIR`, as used by `Tunlinkat.flags` to select `rmdir` over `unlink`.
const AT_REMOVEDIR: u32 = 0x200;

/// Runs one request to completion (or to cancellation).
///
/// Returns `Ok(None)` when a concurrent `Tflush` cancelled this tag before
/// the reply was ready — the caller must not send anything back for it.
pub async fn dispatch_once<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    tag: u16,
    body: FCall,
) -> Result<Option<FCall>> {
    session.lock().await.tags.add(tag);

    let result = dispatch_body(session, backend, tag, body).await;
    if let Err(e) = &result {
        error!("tag {tag}: {e}");
    }

    let mut guard = session.lock().await;
    let aborted = guard.tags.should_abort(tag);
    guard.tags.flush(tag);
    drop(guard);

    if aborted {
        return Ok(None);
    }
    result.map(Some)
}

async fn dispatch_body<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    tag: u16,
    body: FCall,
) -> Result<FCall> {
    match body {
        FCall::TVersion { msize, version } => t_version(session, msize, version).await,
        FCall::TFlush { oldtag } => t_flush(session, oldtag).await,
        FCall::TAttach { fid, afid: _, uname: _, aname, n_uname } => {
            t_attach(session, backend, fid, aname, n_uname).await
        }
        FCall::TWalk { fid, newfid, wnames } => t_walk(session, backend, fid, newfid, wnames).await,
        FCall::TStatFs { fid } => t_statfs(session, backend, fid).await,
        FCall::TlOpen { fid, flags } => t_lopen(session, backend, fid, flags).await,
        FCall::TlCreate { fid, name, flags, mode, gid } => {
            t_lcreate(session, backend, fid, name, flags, mode, gid).await
        }
        FCall::TSymlink { fid, name, symtgt, gid } => t_symlink(session, backend, fid, name, symtgt, gid).await,
        FCall::TMkNod { dfid, name, mode, major: _, minor: _, gid } => {
            t_mknod(session, backend, dfid, name, mode, gid).await
        }
        FCall::TReadLink { fid } => t_readlink(session, backend, fid).await,
        FCall::TGetAttr { fid, req_mask } => t_getattr(session, backend, fid, req_mask).await,
        FCall::TSetAttr { fid, valid, stat } => t_setattr(session, backend, fid, valid, stat).await,
        FCall::TxAttrWalk { fid, newfid, name } => t_xattrwalk(session, fid, newfid, name).await,
        FCall::TxAttrCreate { fid, .. } => t_xattrcreate(session, fid).await,
        FCall::TReadDir { fid, offset, count } => t_readdir(session, backend, fid, offset, count).await,
        FCall::TFSync { fid } => t_fsync(session, backend, fid).await,
        FCall::TLock { fid, flock } => t_lock(session, fid, flock).await,
        FCall::TLink { dfid, fid, name } => t_link(session, backend, dfid, fid, name).await,
        FCall::TMkDir { dfid, name, mode, gid } => t_mkdir(session, backend, dfid, name, mode, gid).await,
        FCall::TRenameAt { olddirfid, oldname, newdirfid, newname } => {
            t_renameat(session, backend, olddirfid, oldname, newdirfid, newname).await
        }
        FCall::TUnlinkAt { dirfd, name, flags } => t_unlinkat(session, backend, dirfd, name, flags).await,
        FCall::TAuth { .. } => Err(Error::from(errno::EOPNOTSUPP)),
        FCall::TRead { fid, offset, count } => t_read(session, backend, fid, tag, offset, count).await,
        FCall::TWrite { fid, offset, data } => t_write(session, backend, fid, offset, data).await,
        FCall::TClunk { fid } => t_clunk(session, fid).await,
        _ => Err(Error::from(errno::EOPNOTSUPP)),
    }
}

async fn fid_path(session: &Mutex<Session>, fid: u32) -> Result<(String, u32)> {
    let guard = session.lock().await;
    let f = guard.fids.get(fid)?;
    Ok((f.path.clone(), f.uid))
}

/// Joins one walk component onto `path`. `.` is a no-op and `..` pops a
/// component; both are resolved here rather than forwarded to the backend,
/// since a `Backend` only ever sees normalized paths.
fn join_component(path: &str, name: &str) -> String {
    if name == "." {
        return path.to_owned();
    }
    if name == ".." {
        return parent_of(path);
    }
    if path == "/" {
        format!("/{name}")
    } else {
        format!("{path}/{name}")
    }
}

fn parent_of(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_owned(),
        Some(idx) => trimmed[..idx].to_owned(),
        None => "/".to_owned(),
    }
}

fn qid_of(stat: &NodeStat) -> QId {
    qid::assign(stat.node, stat.version, stat.kind.qid_type())
}

fn stat_from_node(n: &NodeStat) -> Stat {
    Stat {
        mode: n.mode_with_type(),
        uid: n.uid,
        gid: n.gid,
        nlink: n.nlink,
        rdev: n.rdev,
        size: n.size,
        blksize: BLOCKSIZE as u64,
        blocks: n.size / 512 + 1,
        atime: Time::from_millis(n.atime_ms),
        mtime: Time::from_millis(n.mtime_ms),
        ctime: Time::from_millis(n.ctime_ms),
    }
}

fn millis_from_time(t: &Time) -> i64 {
    t.sec as i64 * 1000 + (t.nsec / 1_000_000) as i64
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// `ATIME` without `_SET` means "use current wall time"; with `_SET`, use
/// the client-provided timestamp. Neither bit means "leave unchanged".
fn atime_update(valid: SetAttrMask, stat: &SetAttr) -> Option<i64> {
    if valid.contains(SetAttrMask::ATIME_SET) {
        Some(millis_from_time(&stat.atime))
    } else if valid.contains(SetAttrMask::ATIME) {
        Some(now_ms())
    } else {
        None
    }
}

fn mtime_update(valid: SetAttrMask, stat: &SetAttr) -> Option<i64> {
    if valid.contains(SetAttrMask::MTIME_SET) {
        Some(millis_from_time(&stat.mtime))
    } else if valid.contains(SetAttrMask::MTIME) {
        Some(now_ms())
    } else {
        None
    }
}

async fn t_version(session: &Mutex<Session>, msize: u32, version: String) -> Result<FCall> {
    let mut guard = session.lock().await;
    let negotiated = guard.negotiate(msize);
    let version = if version == P92000L { P92000L.to_owned() } else { VERSION_UNKNOWN.to_owned() };
    Ok(FCall::RVersion { msize: negotiated, version })
}

async fn t_flush(session: &Mutex<Session>, oldtag: u16) -> Result<FCall> {
    session.lock().await.tags.flush(oldtag);
    Ok(FCall::RFlush)
}

async fn t_attach<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    fid: u32,
    aname: String,
    n_uname: u32,
) -> Result<FCall> {
    let root = if aname.is_empty() { "/".to_owned() } else { aname };
    let stat = backend.stat(&root).await?;
    let uid = if n_uname == NONUNAME { 0 } else { n_uname };
    session.lock().await.fids.insert(fid, Fid::inode(root, uid));
    Ok(FCall::RAttach { qid: qid_of(&stat) })
}

async fn t_walk<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    fid: u32,
    newfid: u32,
    wnames: Vec<String>,
) -> Result<FCall> {
    let (mut path, uid) = fid_path(session, fid).await?;
    let mut wqids = Vec::with_capacity(wnames.len());
    for name in &wnames {
        path = join_component(&path, name);
        let stat = backend.lstat(&path).await?;
        wqids.push(qid_of(&stat));
    }
    session.lock().await.fids.insert(newfid, Fid::inode(path, uid));
    Ok(FCall::RWalk { wqids })
}

async fn t_statfs<B: Backend>(session: &Mutex<Session>, backend: &B, fid: u32) -> Result<FCall> {
    let (path, _) = fid_path(session, fid).await?;
    Ok(FCall::RStatFs { statfs: backend.statfs(&path).await? })
}

async fn t_lopen<B: Backend>(session: &Mutex<Session>, backend: &B, fid: u32, flags: u32) -> Result<FCall> {
    let (path, _) = fid_path(session, fid).await?;
    let stat = backend.open(&path, flags).await?;
    let iounit = session.lock().await.msize - IOHDRSZ;
    Ok(FCall::RlOpen { qid: qid_of(&stat), iounit })
}

#[allow(clippy::too_many_arguments)]
async fn t_lcreate<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    fid: u32,
    name: String,
    flags: u32,
    mode: u32,
    gid: u32,
) -> Result<FCall> {
    let (dir, uid) = fid_path(session, fid).await?;
    let path = join_component(&dir, &name);
    let stat = backend.create(&path, flags, mode, gid).await?;
    let mut guard = session.lock().await;
    guard.fids.insert(fid, Fid::inode(path, uid));
    let iounit = guard.msize - IOHDRSZ;
    drop(guard);
    Ok(FCall::RlCreate { qid: qid_of(&stat), iounit })
}

async fn t_symlink<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    fid: u32,
    name: String,
    symtgt: String,
    _gid: u32,
) -> Result<FCall> {
    let (dir, _) = fid_path(session, fid).await?;
    let path = join_component(&dir, &name);
    let stat = backend.symlink(&symtgt, &path).await?;
    Ok(FCall::RSymlink { qid: qid_of(&stat) })
}

/// Collapsed to a regular file; see the note on `Backend::mknod`.
async fn t_mknod<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    dfid: u32,
    name: String,
    mode: u32,
    gid: u32,
) -> Result<FCall> {
    let (dir, _) = fid_path(session, dfid).await?;
    let path = join_component(&dir, &name);
    let stat = backend.mknod(&path, mode, gid).await?;
    Ok(FCall::RMkNod { qid: qid_of(&stat) })
}

async fn t_readlink<B: Backend>(session: &Mutex<Session>, backend: &B, fid: u32) -> Result<FCall> {
    let (path, _) = fid_path(session, fid).await?;
    Ok(FCall::RReadLink { target: backend.readlink(&path).await? })
}

async fn t_getattr<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    fid: u32,
    req_mask: GetAttrMask,
) -> Result<FCall> {
    let _ = req_mask;
    let (path, _) = fid_path(session, fid).await?;
    let stat = backend.lstat(&path).await?;
    Ok(FCall::RGetAttr { valid: GetAttrMask::BASIC, qid: qid_of(&stat), stat: stat_from_node(&stat) })
}

async fn t_setattr<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    fid: u32,
    valid: SetAttrMask,
    stat: SetAttr,
) -> Result<FCall> {
    let (path, _) = fid_path(session, fid).await?;

    if valid.contains(SetAttrMask::MODE) {
        backend.chmod(&path, stat.mode).await?;
    }

    if valid.intersects(SetAttrMask::UID | SetAttrMask::GID) {
        let uid = valid.contains(SetAttrMask::UID).then_some(stat.uid);
        let gid = valid.contains(SetAttrMask::GID).then_some(stat.gid);
        backend.chown(&path, uid, gid).await?;
    }

    if valid.contains(SetAttrMask::SIZE) {
        backend.truncate(&path, stat.size).await?;
    }

    if valid.intersects(SetAttrMask::ATIME | SetAttrMask::MTIME) {
        let atime = atime_update(valid, &stat);
        let mtime = mtime_update(valid, &stat);
        backend.utimes(&path, atime, mtime).await?;
    }

    Ok(FCall::RSetAttr)
}

/// Extended attributes are stubbed: any name walks to a fid advertising
/// zero bytes rather than erroring, per the spec's "effectively advertise
/// no xattrs" contract.
async fn t_xattrwalk(session: &Mutex<Session>, fid: u32, newfid: u32, _name: String) -> Result<FCall> {
    let (path, uid) = fid_path(session, fid).await?;
    session.lock().await.fids.insert(newfid, Fid { path, kind: FidKind::None, uid });
    Ok(FCall::RxAttrWalk { size: 0 })
}

/// Accepted and ignored, per the spec's xattr stub.
async fn t_xattrcreate(session: &Mutex<Session>, fid: u32) -> Result<FCall> {
    let _ = fid_path(session, fid).await?;
    Ok(FCall::RxAttrCreate)
}

/// Cookie layout: `.` reports next-offset `1`, `..` reports `2`, and
/// backend-listed entry `i` (0-based) reports `3 + i`. A client resuming at
/// cookie `c` therefore skips `max(0, c - 2)` backend entries and has
/// already seen `.`/`..` once `c >= 2` — this keeps the resume arithmetic
/// unambiguous even if a chunk boundary falls between `.` and `..`.
async fn t_readdir<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    fid: u32,
    offset: u64,
    count: u32,
) -> Result<FCall> {
    let (path, _) = fid_path(session, fid).await?;
    let mut data = DirEntryData::new();

    if offset == 0 {
        let here = backend.lstat(&path).await?;
        let dot = dir_entry_named(".", &here, 1);
        if dot.size() > count {
            return Ok(FCall::RReadDir { data });
        }
        data.push(dot);
    }

    if offset <= 1 {
        let parent = match backend.lstat(&parent_of(&path)).await {
            Ok(stat) => stat,
            Err(_) => backend.lstat(&path).await?,
        };
        let dotdot = dir_entry_named("..", &parent, 2);
        if data.size() + dotdot.size() > count {
            return Ok(FCall::RReadDir { data });
        }
        data.push(dotdot);
    }

    let skip = offset.saturating_sub(2) as usize;
    for (i, entry) in backend.list(&path).await?.into_iter().enumerate().skip(skip) {
        let dirent = dir_entry_named(&entry.name, &entry.stat, 3 + i as u64);
        if data.size() + dirent.size() > count {
            break;
        }
        data.push(dirent);
    }

    Ok(FCall::RReadDir { data })
}

fn dir_entry_named(name: &str, stat: &NodeStat, offset: u64) -> DirEntry {
    DirEntry { qid: qid_of(stat), offset, typ: stat.kind.dirent_type(stat.mode_with_type()), name: name.to_owned() }
}

async fn t_fsync<B: Backend>(session: &Mutex<Session>, backend: &B, fid: u32) -> Result<FCall> {
    let (path, _) = fid_path(session, fid).await?;
    backend.fsync(&path).await?;
    Ok(FCall::RFSync)
}

/// Advisory locks always succeed; see the Non-goals list.
async fn t_lock(session: &Mutex<Session>, fid: u32, _flock: Flock) -> Result<FCall> {
    let _ = fid_path(session, fid).await?;
    Ok(FCall::RLock { status: LockStatus::SUCCESS })
}

async fn t_link<B: Backend>(session: &Mutex<Session>, backend: &B, dfid: u32, fid: u32, name: String) -> Result<FCall> {
    let (dir, _) = fid_path(session, dfid).await?;
    let (existing, _) = fid_path(session, fid).await?;
    let path = join_component(&dir, &name);
    backend.link(&existing, &path).await?;
    Ok(FCall::RLink)
}

async fn t_mkdir<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    dfid: u32,
    name: String,
    mode: u32,
    gid: u32,
) -> Result<FCall> {
    let (dir, _) = fid_path(session, dfid).await?;
    let path = join_component(&dir, &name);
    let stat = backend.mkdir(&path, mode, gid).await?;
    Ok(FCall::RMkDir { qid: qid_of(&stat) })
}

async fn t_renameat<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    olddirfid: u32,
    oldname: String,
    newdirfid: u32,
    newname: String,
) -> Result<FCall> {
    let (olddir, _) = fid_path(session, olddirfid).await?;
    let (newdir, _) = fid_path(session, newdirfid).await?;
    backend.rename(&join_component(&olddir, &oldname), &join_component(&newdir, &newname)).await?;
    Ok(FCall::RRenameAt)
}

async fn t_unlinkat<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    dirfd: u32,
    name: String,
    flags: u32,
) -> Result<FCall> {
    let (dir, _) = fid_path(session, dirfd).await?;
    let path = join_component(&dir, &name);
    if flags & AT_REMOVEDIR != 0 {
        backend.rmdir(&path).await?;
    } else {
        backend.unlink(&path).await?;
    }
    Ok(FCall::RUnlinkAt)
}

/// Caches the whole file on the tag's first `Tread` so a client pulling it
/// in several chunks only costs one backend read (§4.4).
async fn t_read<B: Backend>(
    session: &Mutex<Session>,
    backend: &B,
    fid: u32,
    tag: u16,
    offset: u64,
    count: u32,
) -> Result<FCall> {
    let (path, _) = fid_path(session, fid).await?;

    let cached = match session.lock().await.tags.scratch(tag) {
        Some(Scratch::ReadCache(buf)) => Some(buf.clone()),
        _ => None,
    };

    let buf = match cached {
        Some(buf) => {
            debug!("tag {tag}: Tread reused cached file ({} bytes)", buf.len());
            buf
        }
        None => {
            let buf = backend.read_file(&path).await?;
            session.lock().await.tags.set_scratch(tag, Scratch::ReadCache(buf.clone()));
            buf
        }
    };

    let start = (offset as usize).min(buf.len());
    let end = start.saturating_add(count as usize).min(buf.len());
    Ok(FCall::RRead { data: Data(buf[start..end].to_vec()) })
}

async fn t_write<B: Backend>(session: &Mutex<Session>, backend: &B, fid: u32, offset: u64, data: Data) -> Result<FCall> {
    let (path, _) = fid_path(session, fid).await?;
    let count = backend.write(&path, offset, &data.0).await?;
    Ok(FCall::RWrite { count })
}

/// Never fails, per the spec — an unknown fid is simply a no-op.
async fn t_clunk(session: &Mutex<Session>, fid: u32) -> Result<FCall> {
    session.lock().await.fids.remove(fid);
    Ok(FCall::RClunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_component_handles_dot_and_dotdot() {
        assert_eq!(join_component("/a/b", "."), "/a/b");
        assert_eq!(join_component("/a/b", ".."), "/a");
        assert_eq!(join_component("/a/b", "c"), "/a/b/c");
        assert_eq!(join_component("/", "c"), "/c");
    }

    #[test]
    fn parent_of_root_is_root() {
        assert_eq!(parent_of("/"), "/");
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/a/b"), "/a");
    }

    #[test]
    fn millis_from_time_round_trips_through_time_from_millis() {
        let t = Time::from_millis(12_345);
        assert_eq!(millis_from_time(&t), 12_345);
    }

    fn blank_setattr() -> SetAttr {
        SetAttr { mode: 0, uid: 0, gid: 0, size: 0, atime: Time::from_millis(0), mtime: Time::from_millis(0) }
    }

    #[test]
    fn bare_atime_bit_uses_current_wall_time() {
        let stat = blank_setattr();
        let before = now_ms();
        let update = atime_update(SetAttrMask::ATIME, &stat).expect("bare ATIME must still request an update");
        assert!(update >= before);
    }

    #[test]
    fn atime_set_bit_uses_the_provided_timestamp() {
        let stat = SetAttr { atime: Time::from_millis(9_000), ..blank_setattr() };
        let update = atime_update(SetAttrMask::ATIME_SET, &stat);
        assert_eq!(update, Some(9_000));
    }

    #[test]
    fn neither_atime_bit_leaves_it_unchanged() {
        assert_eq!(atime_update(SetAttrMask::MODE, &blank_setattr()), None);
    }

    #[test]
    fn bare_mtime_bit_uses_current_wall_time() {
        let stat = blank_setattr();
        let before = now_ms();
        let update = mtime_update(SetAttrMask::MTIME, &stat).expect("bare MTIME must still request an update");
        assert!(update >= before);
    }

    #[test]
    fn mtime_set_bit_uses_the_provided_timestamp() {
        let stat = SetAttr { mtime: Time::from_millis(4_000), ..blank_setattr() };
        let update = mtime_update(SetAttrMask::MTIME_SET, &stat);
        assert_eq!(update, Some(4_000));
    }
}
