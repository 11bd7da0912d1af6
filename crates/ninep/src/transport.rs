//! Asynchronous connection handling: framing, per-connection session state,
//! and the two reference listeners (TCP, Unix domain socket).
//!
//! Grounded directly on the teacher's `srv.rs`: the same length-delimited
//! framing (`size[4]` little-endian, offset 0, includes itself), the same
//! per-request `tokio::spawn`, and the same `DeleteOnDrop` Unix socket
//! cleanup plus SIGTERM/SIGINT graceful shutdown.

use crate::backend::Backend;
use crate::config::DeviceConfig;
use crate::dispatch::dispatch_once;
use crate::proto::{FCall, MsgType, Msg};
use crate::session::Session;
use crate::utils::{self, Result};
use crate::{io_err, wire};
use bytes::buf::{Buf, BufMut};
use futures::sink::SinkExt;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::codec::length_delimited::LengthDelimitedCodec;

/// One 9P connection: negotiated session state plus the backend it serves.
async fn serve_connection<B, Reader, Writer>(
    backend: Arc<B>,
    device: DeviceConfig,
    msize: u32,
    blocksize: u32,
    reader: Reader,
    writer: Writer,
) -> Result<()>
where
    B: Backend,
    Reader: 'static + AsyncRead + Send + Unpin,
    Writer: 'static + AsyncWrite + Send + Unpin,
{
    let session = Arc::new(Mutex::new(Session::new(device, msize, blocksize)));

    let mut framed_read = LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_read(reader);
    let framed_write = LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_write(writer);
    let framed_write = Arc::new(Mutex::new(framed_write));

    while let Some(bytes) = framed_read.next().await {
        let bytes = match bytes {
            Ok(b) => b,
            // A framing error (oversized length, truncated stream) aborts
            // the whole connection rather than trying to resync.
            Err(e) => {
                error!("framing error, closing connection: {e:?}");
                break;
            }
        };

        let msg = match wire::read_msg(&mut bytes.reader()) {
            Ok(msg) => msg,
            // An undecodable message (including an unrecognized type byte)
            // aborts the session instead of attempting an error reply.
            Err(e) => {
                error!("decode error, aborting session: {e:?}");
                break;
            }
        };
        info!("\t<- {:?}", msg);

        let session = session.clone();
        let backend = backend.clone();
        let framed_write = framed_write.clone();

        tokio::spawn(async move {
            let tag = msg.tag;
            let reply = match dispatch_once(&session, backend.as_ref(), tag, msg.body).await {
                Ok(Some(fcall)) => fcall,
                Ok(None) => return, // flushed; no reply
                Err(e) => FCall::RlError { ecode: e.ecode() },
            };

            if !MsgType::from(&reply).is_r() {
                return;
            }

            let response = Msg { tag, body: reply };
            let mut out = bytes::BytesMut::with_capacity(4096).writer();
            if let Err(e) = wire::write_msg(&mut out, &response) {
                error!("failed to encode reply for tag {tag}: {e:?}");
                return;
            }

            let frame = out.into_inner().freeze();
            let mut sink = framed_write.lock().await;
            if let Err(e) = sink.send(frame).await {
                error!("failed to send reply for tag {tag}: {e:?}");
                return;
            }
            drop(sink);
            info!("\t-> {:?}", response);
        });
    }

    Ok(())
}

async fn serve_tcp<B>(backend: Arc<B>, device: DeviceConfig, msize: u32, blocksize: u32, addr: &str) -> Result<()>
where
    B: Backend,
{
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (stream, peer) = listener.accept().await?;
        info!("accepted: {peer:?}");
        let backend = backend.clone();
        let device = device.clone();
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            if let Err(e) = serve_connection(backend, device, msize, blocksize, read_half, write_half).await {
                error!("connection error: {e:?}");
            }
        });
    }
}

/// Removes the socket file on drop, the way a Unix listener ought to clean
/// up after itself.
struct DeleteOnDrop {
    path: PathBuf,
    listener: UnixListener,
}

impl DeleteOnDrop {
    fn bind(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_owned();
        UnixListener::bind(&path).map(|listener| DeleteOnDrop { path, listener })
    }
}

impl std::ops::Deref for DeleteOnDrop {
    type Target = UnixListener;
    fn deref(&self) -> &Self::Target {
        &self.listener
    }
}

impl Drop for DeleteOnDrop {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            eprintln!("warning: failed to remove socket file {:?}: {e}", self.path);
        }
    }
}

async fn serve_unix<B>(
    backend: Arc<B>,
    device: DeviceConfig,
    msize: u32,
    blocksize: u32,
    addr: impl AsRef<Path>,
) -> Result<()>
where
    B: Backend,
{
    use tokio::signal::unix::{signal, SignalKind};

    let listener = DeleteOnDrop::bind(addr)?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));

    {
        let running = running.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        info!("accepted: {peer:?}");
                        let backend = backend.clone();
                        let device = device.clone();
                        tokio::spawn(async move {
                            let (read_half, write_half) = tokio::io::split(stream);
                            if let Err(e) = serve_connection(backend, device, msize, blocksize, read_half, write_half).await {
                                error!("connection error: {e:?}");
                            }
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("server shutdown complete");
    Ok(())
}

/// Serves `backend` on `addr`, a `proto!address!port` string (`tcp` or
/// `unix`), using `device` for the session's virtio identity and `msize`/
/// `blocksize` as the server-side negotiation ceiling.
pub async fn serve<B>(backend: B, device: DeviceConfig, msize: u32, blocksize: u32, addr: &str) -> Result<()>
where
    B: Backend,
{
    let backend = Arc::new(backend);
    let (proto, host, port) =
        utils::parse_proto(addr).ok_or_else(|| io_err!(InvalidInput, "invalid protocol or address"))?;

    match proto {
        "tcp" => serve_tcp(backend, device, msize, blocksize, &format!("{host}:{port}")).await,
        "unix" => serve_unix(backend, device, msize, blocksize, host).await,
        _ => Err(From::from(io_err!(InvalidInput, "protocol not supported"))),
    }
}
