//! Per-connection session state, and the opaque save/restore surface the
//! design doc's "Session state save/restore" section asks for.

use crate::config::DeviceConfig;
use crate::fid::{Fid, FidTable};
use crate::proto::{P92000L, VERSION_UNKNOWN};
use crate::reply::ReplyBuffer;
use crate::tag::TagRegistry;

/// The mutable state one 9P connection carries across requests.
pub struct Session {
    pub fids: FidTable,
    pub tags: TagRegistry,
    pub msize: u32,
    pub version: String,
    pub blocksize: u32,
    device: DeviceConfig,
    reply: ReplyBuffer,
}

impl Session {
    pub fn new(device: DeviceConfig, msize: u32, blocksize: u32) -> Session {
        Session {
            fids: FidTable::new(),
            tags: TagRegistry::new(),
            msize,
            version: VERSION_UNKNOWN.to_owned(),
            blocksize,
            reply: ReplyBuffer::new(msize),
            device,
        }
    }

    /// `Tversion` negotiates msize and resets all session state except the
    /// device configuration, which is fixed for the transport's lifetime.
    pub fn negotiate(&mut self, requested_msize: u32) -> u32 {
        self.msize = requested_msize.min(self.msize);
        self.version = P92000L.to_owned();
        self.fids.clear();
        self.reply = ReplyBuffer::new(self.msize);
        self.msize
    }

    pub fn reply_buffer(&mut self) -> &mut ReplyBuffer {
        &mut self.reply
    }

    /// Opaque snapshot of everything a save/restore facility needs to
    /// reconstruct this session elsewhere. The tag registry is intentionally
    /// excluded: in-flight tags belong to requests the client already issued
    /// and is waiting on, not state a restored session can usefully resume
    /// (the client would have to reissue them). The fid table, unlike the
    /// tag registry, IS carried: it is server-owned and the client never
    /// re-sends it, so a restored session that dropped it could not resolve
    /// any fid the client still holds open.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            device_id: self.device.device_id,
            host_feature_bits: self.device.host_feature_bits,
            config_space: self.device.config_space(),
            version: self.version.clone(),
            blocksize: self.blocksize,
            msize: self.msize,
            reply_buffer: self.reply.as_slice().to_vec(),
            reply_buffer_len: self.reply.occupied_len(),
            fids: self.fids.entries(),
        }
    }

    pub fn restore(&mut self, snapshot: &SessionSnapshot) {
        self.version = snapshot.version.clone();
        self.blocksize = snapshot.blocksize;
        self.msize = snapshot.msize;
        self.reply = ReplyBuffer::new(self.msize);
        self.reply.raw_mut()[..snapshot.reply_buffer.len()].copy_from_slice(&snapshot.reply_buffer);
        self.reply.set_occupied_len(snapshot.reply_buffer_len);
        self.fids.restore_entries(snapshot.fids.clone());
    }
}

/// Opaque get/set payload: `deviceid`, `hostfeature`, `configspace`,
/// `version`, `blocksize`, `msize`, the reply buffer with its occupied
/// length, and the fid table, per the design doc.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub device_id: u32,
    pub host_feature_bits: u32,
    pub config_space: Vec<u8>,
    pub version: String,
    pub blocksize: u32,
    pub msize: u32,
    pub reply_buffer: Vec<u8>,
    pub reply_buffer_len: usize,
    pub fids: Vec<(u32, Fid)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_clamps_to_server_cap_and_resets_fids() {
        let mut session = Session::new(DeviceConfig::default_tag(), 8192, 8192);
        session.fids.insert(1, crate::fid::Fid::inode("/", 0));
        let negotiated = session.negotiate(65536);
        assert_eq!(negotiated, 8192);
        assert!(session.fids.is_empty());
        assert_eq!(session.version, P92000L);
    }

    #[test]
    fn negotiate_honors_smaller_client_request() {
        let mut session = Session::new(DeviceConfig::default_tag(), 8192, 8192);
        assert_eq!(session.negotiate(1024), 1024);
    }

    #[test]
    fn snapshot_round_trips_into_a_fresh_session() {
        let mut session = Session::new(DeviceConfig::default_tag(), 8192, 8192);
        session.negotiate(4096);
        session.reply_buffer().build_reply(9, 1, 0);
        let snap = session.snapshot();

        let mut restored = Session::new(DeviceConfig::default_tag(), 8192, 8192);
        restored.restore(&snap);
        assert_eq!(restored.msize, 4096);
        assert_eq!(restored.version, P92000L);
    }

    #[test]
    fn snapshot_carries_the_fid_table_across_restore() {
        let mut session = Session::new(DeviceConfig::default_tag(), 8192, 8192);
        session.fids.insert(3, Fid::inode("/a/b", 1000));
        let snap = session.snapshot();

        let mut restored = Session::new(DeviceConfig::default_tag(), 8192, 8192);
        restored.restore(&snap);
        let fid = restored.fids.get(3).unwrap();
        assert_eq!(fid.path, "/a/b");
        assert_eq!(fid.uid, 1000);
    }
}
