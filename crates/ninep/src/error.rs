//! Error representation for the 9P2000.L server core.
//!
//! Every fallible path in this crate resolves to an [`Error`], which is
//! convertible to the POSIX errno the wire protocol carries in `Rlerror`
//! via [`Error::errno`]. Handlers propagate with `?`; nothing in this
//! crate unwraps or panics on a backend or I/O failure.

use nix::errno::Errno;
use std::{fmt, io};

fn errno_from_ioerror(e: &io::Error) -> Errno {
    e.raw_os_error().map(Errno::from_raw).unwrap_or(match e.kind() {
        io::ErrorKind::NotFound => Errno::ENOENT,
        io::ErrorKind::PermissionDenied => Errno::EPERM,
        io::ErrorKind::ConnectionRefused => Errno::ECONNREFUSED,
        io::ErrorKind::ConnectionReset => Errno::ECONNRESET,
        io::ErrorKind::ConnectionAborted => Errno::ECONNABORTED,
        io::ErrorKind::NotConnected => Errno::ENOTCONN,
        io::ErrorKind::AddrInUse => Errno::EADDRINUSE,
        io::ErrorKind::AddrNotAvailable => Errno::EADDRNOTAVAIL,
        io::ErrorKind::BrokenPipe => Errno::EPIPE,
        io::ErrorKind::AlreadyExists => Errno::EEXIST,
        io::ErrorKind::WouldBlock => Errno::EAGAIN,
        io::ErrorKind::InvalidInput => Errno::EINVAL,
        io::ErrorKind::InvalidData => Errno::EINVAL,
        io::ErrorKind::TimedOut => Errno::ETIMEDOUT,
        io::ErrorKind::WriteZero => Errno::EAGAIN,
        io::ErrorKind::Interrupted => Errno::EINTR,
        io::ErrorKind::NotADirectory => Errno::ENOTDIR,
        io::ErrorKind::IsADirectory => Errno::EISDIR,
        io::ErrorKind::DirectoryNotEmpty => Errno::ENOTEMPTY,
        io::ErrorKind::FilesystemLoop => Errno::ELOOP,
        io::ErrorKind::StorageFull => Errno::ENOSPC,
        _ => Errno::EIO,
    })
}

/// A 9P error, convertible to the errno `Rlerror` carries on the wire.
#[derive(Debug)]
pub enum Error {
    /// A bare POSIX errno, e.g. produced directly by a handler.
    No(Errno),
    /// A std I/O error, lazily mapped to an errno on demand.
    Io(io::Error),
}

impl Error {
    pub fn errno(&self) -> Errno {
        match self {
            Error::No(e) => *e,
            Error::Io(e) => errno_from_ioerror(e),
        }
    }

    /// The 32-bit errno value as carried in an `Rlerror` body.
    pub fn ecode(&self) -> u32 {
        self.errno() as i32 as u32
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::No(e) => write!(f, "system error: {e}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::No(_) => None,
            Error::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Error::No(e)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::No(e)
    }
}

/// Re-exported so callers can write `error::errno::ENOENT` the way the
/// wire-level errno table in the spec is written.
pub mod errno {
    pub use nix::errno::Errno::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_enoent() {
        let e: Error = io::Error::from(io::ErrorKind::NotFound).into();
        assert_eq!(e.errno(), Errno::ENOENT);
    }

    #[test]
    fn raw_os_error_is_preferred_over_kind() {
        let e: Error = io::Error::from_raw_os_error(Errno::EBUSY as i32).into();
        assert_eq!(e.errno(), Errno::EBUSY);
    }

    #[test]
    fn bare_errno_roundtrips() {
        let e: Error = Errno::ENOTEMPTY.into();
        assert_eq!(e.errno(), Errno::ENOTEMPTY);
    }
}
