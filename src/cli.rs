use clap::Parser;
use std::path::PathBuf;

use crate::error::{Result, VeneerError};

pub const USAGE: &str = "usage: veneer <source_root> <overlay_root>";

#[derive(Parser, Debug)]
#[command(name = "veneer")]
#[command(about = "Serve a read-write copy-on-write view over a read-only source tree")]
pub struct Args {
    #[arg(help = "Read-only source tree")]
    pub source_root: PathBuf,

    #[arg(help = "Overlay directory for mirrored content and whiteouts")]
    pub overlay_root: PathBuf,
}

pub fn validate_roots(args: &Args) -> Result<()> {
    let meta = std::fs::metadata(&args.source_root)
        .map_err(|e| VeneerError::from_io(e, args.source_root.display().to_string()))?;
    if !meta.is_dir() {
        return Err(VeneerError::InvalidPath(format!(
            "source root {} is not a directory",
            args.source_root.display()
        )));
    }
    Ok(())
}
