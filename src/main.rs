use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use sdconsole::{
    clock::LocalClock,
    config::{ConsoleConfig, FormatConfig, BANNER},
    image::ImageFile,
    logging::ConsoleLogger,
    Console,
};
use sdfat::{format, FileSystem, FormatOptions};

#[derive(Debug, Parser)]
#[command(name = "sdconsole")]
#[command(about = "Interactive FAT console over an SD card image")]
struct Cli {
    /// TOML file with console settings.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Image file; overrides `image` from the config.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Create and format a fresh image of this many 512-byte sectors.
    #[arg(long = "format-sectors")]
    format_sectors: Option<u32>,
    /// Skip the initial mount.
    #[arg(long = "no-mount")]
    no_mount: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ConsoleConfig::load(cli.config.as_deref())?;
    config.apply_env();
    if let Some(image) = cli.image {
        config.image = image;
    }
    if let Some(sectors) = cli.format_sectors {
        let previous = config.format.take().unwrap_or_default();
        config.format = Some(FormatConfig {
            sectors,
            ..previous
        });
    }
    if cli.no_mount {
        config.mount_on_start = false;
    }

    ConsoleLogger::new(config.level_filter()?, config.log_json_path.clone())?.install()?;

    let image = match &config.format {
        Some(fresh) => create_image(&config, fresh)?,
        None => ImageFile::open(&config.image)?,
    };
    log::info!(
        "sdconsole: image path={} sectors={}",
        config.image.display(),
        image.sectors()
    );

    let fs = FileSystem::with_clock(image.into_device(), LocalClock);
    let mut console = Console::new(fs).with_echo(config.echo);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    out.write_all(BANNER.as_bytes())?;
    if config.mount_on_start {
        console.mount(&mut out)?;
    }
    console
        .run(io::stdin().lock(), &mut out)
        .context("console i/o failed")
}

fn create_image(config: &ConsoleConfig, fresh: &FormatConfig) -> Result<ImageFile> {
    let image = ImageFile::create(&config.image, fresh.sectors)?;
    let mut options = FormatOptions::new(image.sectors());
    if let Some(spc) = fresh.sectors_per_cluster {
        options = options.sectors_per_cluster(spc);
    }
    if let Some(label) = &fresh.label {
        options = options.label(label);
    }

    let mut device = image.into_device();
    let volume = format(&mut device, &options)
        .map_err(|err| anyhow::anyhow!("format failed: {err}"))?;
    log::info!(
        "sdconsole: formatted type=FAT{} clusters={}",
        volume.fat_type.bits(),
        volume.cluster_count
    );
    Ok(device.into_inner())
}
