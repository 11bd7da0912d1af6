//! Reference server binary for the `ninep` crate: a CLI that serves either
//! backend over TCP or a Unix domain socket.

mod memory;
mod passthrough;

use clap::Parser;
use memory::MemoryBackend;
use ninep::config::DeviceConfig;
use passthrough::PassthroughBackend;
use std::path::PathBuf;

/// Serves a 9P2000.L filesystem.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// proto!address!port
    /// where: proto = tcp | unix
    address: String,

    /// Directory to export over the host-passthrough backend. Omit to
    /// serve the in-memory backend instead.
    exportdir: Option<PathBuf>,

    /// Mount tag advertised in the device's virtio config space.
    #[arg(long, default_value = "host9p")]
    tag: String,

    /// Maximum message size offered during version negotiation.
    #[arg(long, default_value_t = ninep::config::DEFAULT_MSIZE)]
    msize: u32,
}

async fn demofs_main(cli: Cli) -> ninep::Result<()> {
    let device = DeviceConfig::new(cli.tag);
    match cli.exportdir {
        Some(dir) => {
            log::info!("exporting {} as passthrough backend", dir.display());
            ninep::transport::serve(PassthroughBackend::new(dir), device, cli.msize, ninep::config::BLOCKSIZE, &cli.address).await
        }
        None => {
            log::info!("serving in-memory backend");
            ninep::transport::serve(MemoryBackend::new(), device, cli.msize, ninep::config::BLOCKSIZE, &cli.address).await
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = demofs_main(Cli::parse()).await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
