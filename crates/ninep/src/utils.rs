use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(::std::convert::From::from($err))
    };
}

/// Splits a `proto!address!port` connection string, the way 9P mount
/// specs and this crate's demo CLIs expect it.
pub fn parse_proto(arg: &str) -> Option<(&str, &str, &str)> {
    let mut parts = arg.split('!');
    let proto = parts.next()?;
    let addr = parts.next()?;
    let port = parts.next().unwrap_or("564");
    Some((proto, addr, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proto_bang_address_bang_port() {
        assert_eq!(parse_proto("tcp!localhost!564"), Some(("tcp", "localhost", "564")));
    }

    #[test]
    fn defaults_port_when_omitted() {
        assert_eq!(parse_proto("unix!/tmp/sock"), Some(("unix", "/tmp/sock", "564")));
    }

    #[test]
    fn rejects_string_without_address() {
        assert_eq!(parse_proto("tcp"), None);
    }
}
