use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use pagebridge::bridge::CallChannel;
use pagebridge::engine::MupdfEngine;
use pagebridge::panic_handler;
use pagebridge::settings::{ViewerConfig, default_config_path};
use pagebridge::viewer::surface::{MemorySurface, PageBitmap};
use pagebridge::viewer::viewport::{ContainerSize, ScaleMode};
use pagebridge::{DocumentViewer, ViewerEvent, spawn_engine_host};

#[derive(Parser, Debug)]
#[command(name = "pagebridge")]
#[command(
    about = "Render the visible pages of a PDF through the document engine bridge",
    long_about = None
)]
struct Cli {
    /// PDF document to open
    file: PathBuf,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1280.0)]
    width: f32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 900.0)]
    height: f32,

    /// auto, actual, +1, -1 or a scale factor
    #[arg(long, default_value = "auto", allow_hyphen_values = true)]
    zoom: ScaleMode,

    /// 1-based page to scroll to
    #[arg(long)]
    page: Option<usize>,

    /// Directory receiving one PNG per rendered page
    #[arg(long, default_value = "pages")]
    out: PathBuf,

    /// Print document information
    #[arg(long, default_value_t = false)]
    info: bool,

    #[arg(long, default_value = "pagebridge.log")]
    log_file: PathBuf,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    WriteLogger::init(
        cli.log_level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("Failed to create log file {:?}", cli.log_file))?,
    )?;
    panic_handler::initialize_panic_handler();
    info!("Starting pagebridge");

    if let Err(err) = run(&cli) {
        error!("Application error: {err:?}");
        eprintln!("{err:#}");
        return Err(err);
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => ViewerConfig::load_or_default(&path)?,
        None => ViewerConfig::default(),
    };

    let bytes = fs::read(&cli.file).with_context(|| format!("Failed to read {:?}", cli.file))?;
    let file_name = cli
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (transport, _host) = spawn_engine_host(|| Ok(MupdfEngine::new()))?;
    let channel = CallChannel::with_timeout(transport, config.call_timeout());
    let mut viewer = DocumentViewer::new(
        channel,
        MemorySurface::new(),
        ContainerSize::new(cli.width, cli.height),
        config,
    );

    viewer
        .open(bytes, &file_name)
        .with_context(|| format!("Failed to open {file_name}"))?;
    if cli.zoom != ScaleMode::Auto && !viewer.set_scale_mode(cli.zoom) {
        bail!("Zoom {} is out of range", cli.zoom);
    }
    if let Some(page) = cli.page {
        if page == 0 || page > viewer.page_count() {
            bail!("Page {page} is out of range (1-{})", viewer.page_count());
        }
        viewer.set_active_page(page - 1);
    }
    viewer.settle()?;

    if cli.info {
        let info = viewer.doc_info(viewer.active_page())?;
        println!("{}", serde_json::to_string_pretty(&info)?);
    }

    fs::create_dir_all(&cli.out).with_context(|| format!("Failed to create {:?}", cli.out))?;
    for bitmap in viewer.surface().images.values() {
        let path = cli.out.join(format!("page-{:04}.png", bitmap.page + 1));
        write_png(bitmap, &path)?;
        println!("{}", path.display());
    }

    for event in viewer.drain_events() {
        if let ViewerEvent::ActivePageChanged(page) = event {
            info!("Active page: {}", page + 1);
        }
    }
    viewer.close()?;
    Ok(())
}

fn write_png(bitmap: &PageBitmap, path: &Path) -> Result<()> {
    let Some(image) = image::RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.rgba.clone())
    else {
        bail!(
            "Page {} bitmap does not match {}x{}",
            bitmap.page + 1,
            bitmap.width,
            bitmap.height
        );
    };
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {path:?}"))
}
