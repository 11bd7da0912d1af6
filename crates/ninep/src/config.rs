//! Session-wide constants and virtio device configuration data.
//!
//! `DeviceConfig` is plain, inspectable data; constructing and driving an
//! actual virtio queue is outside this crate (see the design doc's
//! out-of-scope list). A transport that does speak virtio can read these
//! fields to fill in its MMIO/PCI config space.

/// Default negotiated maximum message size, used until `Tversion`
/// negotiates a (possibly smaller) one with the client.
pub const DEFAULT_MSIZE: u32 = 8192;

pub const BLOCKSIZE: u32 = 8192;

/// `Tstatfs` constants; this server does not account real disk usage.
pub const STATFS_TYPE: u32 = 0x0102_1997;
pub const STATFS_BSIZE: u32 = 8192;
pub const STATFS_NAMELEN: u32 = 256;

/// virtio-9p device id.
pub const VIRTIO_DEVICE_ID: u32 = 0x9;

/// Host feature bit advertising mount-point support.
pub const VIRTIO_HOST_FEATURE_BITS: u32 = 0x1;

/// Minimum size of the virtio config space, in bytes (length prefix + tag).
const VIRTIO_CONFIG_MIN_LEN: usize = 8;

/// Device configuration a virtio transport exposes through its config
/// space: a length-prefixed mount tag, padded to a minimum length.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_id: u32,
    pub host_feature_bits: u32,
    tag: String,
}

impl DeviceConfig {
    pub fn new(tag: impl Into<String>) -> DeviceConfig {
        DeviceConfig {
            device_id: VIRTIO_DEVICE_ID,
            host_feature_bits: VIRTIO_HOST_FEATURE_BITS,
            tag: tag.into(),
        }
    }

    /// The default mount tag this server advertises.
    pub fn default_tag() -> DeviceConfig {
        DeviceConfig::new("host9p")
    }

    pub fn mount_tag(&self) -> &str {
        &self.tag
    }

    /// The config-space byte layout: `u16` length-prefixed tag, zero-padded
    /// to at least [`VIRTIO_CONFIG_MIN_LEN`] bytes.
    pub fn config_space(&self) -> Vec<u8> {
        let tag_bytes = self.tag.as_bytes();
        let mut buf = Vec::with_capacity(2 + tag_bytes.len());
        buf.extend_from_slice(&(tag_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(tag_bytes);
        while buf.len() < VIRTIO_CONFIG_MIN_LEN {
            buf.push(0);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tag_is_host9p() {
        assert_eq!(DeviceConfig::default_tag().mount_tag(), "host9p");
    }

    #[test]
    fn config_space_is_length_prefixed_and_padded() {
        let cfg = DeviceConfig::new("x");
        let space = cfg.config_space();
        assert_eq!(&space[0..2], &1u16.to_le_bytes());
        assert_eq!(space[2], b'x');
        assert_eq!(space.len(), VIRTIO_CONFIG_MIN_LEN);
    }

    #[test]
    fn device_id_and_feature_bits_match_spec() {
        let cfg = DeviceConfig::default_tag();
        assert_eq!(cfg.device_id, 0x9);
        assert_eq!(cfg.host_feature_bits, 0x1);
    }
}
