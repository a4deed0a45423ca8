use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, error, info};
use simplelog::{Config, WriteLogger};

use tweakview::panic_handler;
use tweakview::render::Size;
use tweakview::settings;
use tweakview::{BackgroundStyle, DisplaySink, Frame, JsonTweakStore, TweakSet, Viewer};

const RENDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "tweakview")]
#[command(version, about = "Image viewer with non-destructive per-image adjustments", long_about = None)]
struct Cli {
    /// Image file or directory to open
    #[arg(value_name = "PATH", default_value = ".")]
    path: PathBuf,

    /// Viewport size
    #[arg(long, value_name = "WxH")]
    size: Option<String>,

    /// Tweaks to apply to the shown image, e.g. "bk:12;g:-20;rot:90;"
    #[arg(long, value_name = "ENCODED")]
    tweaks: Option<String>,

    /// Show images without their stored tweaks
    #[arg(long)]
    no_tweaks: bool,

    /// Show unscaled renders
    #[arg(long)]
    no_fit: bool,

    /// Background: black, dark, mid, light, white or auto
    #[arg(long, value_name = "STYLE")]
    background: Option<String>,

    /// Step forward this many images before applying tweaks
    #[arg(long, value_name = "N", default_value = "0")]
    skip: usize,

    /// Write the full-resolution corrected image here
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,

    /// Tweak store file instead of the configured one
    #[arg(long, value_name = "FILE")]
    store: Option<PathBuf>,

    /// Log file instead of the one in the data directory
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

/// Reports frames to the log; the headless stand-in for a window
#[derive(Default)]
struct LoggingSink {
    frames: usize,
    last: Option<Frame>,
}

impl DisplaySink for LoggingSink {
    fn present(&mut self, frame: Frame) {
        self.frames += 1;
        debug!(
            "Frame {} for entry {}: {}x{}{}",
            self.frames,
            frame.index,
            frame.image.width(),
            frame.image.height(),
            if frame.provisional { " (provisional)" } else { "" }
        );
        self.last = Some(frame);
    }
}

fn parse_size(s: &str) -> Result<Size> {
    let Some((w, h)) = s.split_once(['x', 'X']) else {
        bail!("expected WIDTHxHEIGHT, got {s:?}");
    };
    let width = w.trim().parse().with_context(|| format!("bad width in {s:?}"))?;
    let height = h.trim().parse().with_context(|| format!("bad height in {s:?}"))?;
    Ok(Size::new(width, height))
}

fn parse_background(s: &str) -> Result<BackgroundStyle> {
    BackgroundStyle::ALL
        .iter()
        .copied()
        .find(|style| style.name().eq_ignore_ascii_case(s))
        .with_context(|| format!("unknown background {s:?}"))
}

fn init_logging(cli: &Cli) -> Result<()> {
    let path = match &cli.log_file {
        Some(path) => path.clone(),
        None => settings::data_dir()
            .map(|dir| dir.join("tweakview.log"))
            .unwrap_or_else(|| PathBuf::from("tweakview.log")),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&path).with_context(|| format!("creating {}", path.display()))?,
    )?;
    Ok(())
}

fn export(viewer: &Viewer<LoggingSink>, path: &Path) -> Result<()> {
    let Some(image) = viewer.current_corrected() else {
        bail!("no rendered image to export");
    };
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    info!("Exported {}x{} to {}", image.width(), image.height(), path.display());
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    settings::load_settings();
    let mut config = settings::viewer_config();
    if let Some(size) = &cli.size {
        config.viewport = parse_size(size)?;
    }
    if let Some(style) = &cli.background {
        config.background = parse_background(style)?;
    }
    if cli.no_tweaks {
        config.tweaks_enabled = false;
    }
    if cli.no_fit {
        config.scale_to_fit = false;
    }
    let tweaks = cli
        .tweaks
        .as_deref()
        .map(TweakSet::decode)
        .transpose()
        .context("parsing --tweaks")?;

    let store_path = cli.store.clone().or_else(settings::tweak_store_path);
    let store = JsonTweakStore::load_or_ephemeral(store_path.as_deref());
    let mut viewer = Viewer::with_files(config, Box::new(store), LoggingSink::default())?;

    viewer.open(&cli.path)?;
    viewer.run_until_idle(RENDER_TIMEOUT);
    for _ in 0..cli.skip {
        if !viewer.next_image() {
            break;
        }
        viewer.run_until_idle(RENDER_TIMEOUT);
    }

    if let Some(tweaks) = tweaks {
        viewer.apply_tweaks(tweaks)?;
    }
    if !viewer.run_until_idle(RENDER_TIMEOUT) {
        error!("Rendering did not finish within {RENDER_TIMEOUT:?}");
    }

    let Some(entry) = viewer.current_entry() else {
        bail!("no image to show in {}", viewer.directory().display());
    };
    println!("{}", entry.path.display());
    println!("  tweaks: {}", entry.tweaks);
    if let Some(hash) = &entry.hash {
        println!("  hash:   {hash}");
    }
    if let Some(frame) = &viewer.sink().last {
        println!(
            "  shown:  {}x{} on #{:02x}{:02x}{:02x}",
            frame.image.width(),
            frame.image.height(),
            frame.background[0],
            frame.background[1],
            frame.background[2]
        );
    }

    if let Some(path) = &cli.export {
        export(&viewer, path)?;
    }
    viewer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    panic_handler::initialize_panic_handler();

    info!("Starting tweakview");
    let res = run(&cli);
    if let Err(err) = &res {
        error!("Application error: {err:?}");
    }
    info!("Shutting down tweakview");
    res
}
