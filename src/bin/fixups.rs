use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use macho_fixups::{FixupsOptions, MachOFile, PageBase};
use tracing_subscriber::EnvFilter;

/// Print the header, load commands and chained fixups of a Mach-O file.
#[derive(Parser, Debug)]
#[command()]
struct Args {
    /// Mach-O or fat file to read
    path: PathBuf,
    /// Slice to select from a fat file (arm64, arm64e, x86_64, ...)
    #[arg(long)]
    arch: Option<String>,
    /// Also resolve LC_DYLD_CHAINED_FIXUPS
    #[arg(long)]
    fixups: bool,
    /// Start every page's chain from the first page of its segment
    #[arg(long)]
    legacy_page_base: bool,
    /// Records followed per chain before giving up
    #[arg(long, default_value_t = FixupsOptions::DEFAULT_MAX_CHAIN_STEPS)]
    max_chain_steps: usize,
}

impl Args {
    fn fixups_options(&self) -> FixupsOptions {
        FixupsOptions {
            page_base: if self.legacy_page_base {
                PageBase::FirstPage
            } else {
                PageBase::PageIndex
            },
            max_chain_steps: self.max_chain_steps,
        }
    }
}

fn load(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("unable to read {}", path.display()))
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let bytes = load(&args.path)?;
    let macho = MachOFile::parse_arch(&bytes, args.arch.as_deref())
        .with_context(|| format!("unable to parse {}", args.path.display()))?;

    if let Some(fat_header) = &macho.fat_header {
        println!("{:#?}", fat_header);
    }
    println!("{:#?}", macho.header);
    println!("{:#?}", macho.load_commands);

    if args.fixups {
        let report = macho
            .chained_fixups_with(&args.fixups_options())
            .context("unable to resolve chained fixups")?;
        println!("{:#?}", report);
    }

    Ok(())
}
