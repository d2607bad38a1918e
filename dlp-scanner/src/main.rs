//! DLP structured light scanner
//!
//! Entry point for the dlp-scanner command line tool.

use clap::{Parser, Subcommand, ValueEnum};
use dlp_scanner::calibration::CalibrationParams;
use dlp_scanner::camera::FrameCache;
use dlp_scanner::config::{CloudLayout, ScannerConfig, SecondViewKind};
use dlp_scanner::export::{load_pcd, save_pcd, PcdEncoding};
use dlp_scanner::pipeline::Scanner;
use dlp_scanner::stereo::ReconstructionConfig;
use dlp_scanner::synthetic::PlaneScene;
use std::error::Error;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(author, version, about = "Structured light 3D scanner")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the projected pattern sequence as PNG files.
    Patterns {
        #[arg(long, default_value_t = 320)]
        width: u32,
        #[arg(long, default_value_t = 200)]
        height: u32,
        #[arg(long)]
        out: PathBuf,
    },
    /// Decode cached camera frames and write a point cloud.
    Reconstruct {
        /// JSON calibration file.
        #[arg(long)]
        calibration: PathBuf,
        /// Directory holding cam1_imageNN.png / cam2_imageNN.png.
        #[arg(long)]
        frames: PathBuf,
        /// Optional JSON scanner configuration. Defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum)]
        encoding: Option<Encoding>,
    },
    /// Scan a simulated flat wall end to end.
    Simulate {
        #[arg(long, default_value_t = 4)]
        width: u32,
        #[arg(long, default_value_t = 4)]
        height: u32,
        /// Camera pixels per projector pixel.
        #[arg(long, default_value_t = 16)]
        block: u32,
        #[arg(long, value_enum, default_value_t = View::Projector)]
        view: View,
        #[arg(long, value_enum, default_value_t = Layout::Sparse)]
        layout: Layout,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = Encoding::Ascii)]
        encoding: Encoding,
    },
    /// Re-encode a PCD file.
    Convert {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_enum)]
        encoding: Encoding,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Encoding {
    Ascii,
    Binary,
}

impl From<Encoding> for PcdEncoding {
    fn from(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Ascii => PcdEncoding::Ascii,
            Encoding::Binary => PcdEncoding::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum View {
    Projector,
    Camera,
}

impl From<View> for SecondViewKind {
    fn from(view: View) -> Self {
        match view {
            View::Projector => SecondViewKind::Projector,
            View::Camera => SecondViewKind::Camera,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    Sparse,
    Dense,
}

impl From<Layout> for CloudLayout {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Sparse => CloudLayout::Sparse,
            Layout::Dense => CloudLayout::Dense,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(err) = try_main() {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    match Args::parse().command {
        Command::Patterns { width, height, out } => {
            dlp_scanner::structured_light::GrayCodeGenerator::new(width, height).write_sequence(&out)?;
        }
        Command::Reconstruct {
            calibration,
            frames,
            config,
            out,
            encoding,
        } => reconstruct(&calibration, &frames, config.as_deref(), &out, encoding)?,
        Command::Simulate {
            width,
            height,
            block,
            view,
            layout,
            out,
            encoding,
        } => simulate(PlaneScene::new(width, height, block), view.into(), layout.into(), &out, encoding.into())?,
        Command::Convert {
            input,
            output,
            encoding,
        } => {
            let cloud = load_pcd(&input)?;
            save_pcd(&cloud, &output, encoding.into())?;
        }
    }
    Ok(())
}

fn reconstruct(
    calibration: &Path,
    frames: &Path,
    config: Option<&Path>,
    out: &Path,
    encoding: Option<Encoding>,
) -> Result<(), Box<dyn Error>> {
    let config = match config {
        Some(path) => ScannerConfig::load(path)?,
        None => ScannerConfig::default(),
    };
    let encoding = encoding.map(PcdEncoding::from).unwrap_or(config.pcd_encoding);
    let calibration = CalibrationParams::load(calibration)?;
    let scanner = Scanner::new(config, &calibration)?;

    let pairs = FrameCache::new(frames).load(&scanner.generator().config().pattern_sequence())?;
    let output = scanner.process(&pairs)?;
    save_pcd(&output.cloud, out, encoding)?;
    Ok(())
}

fn simulate(
    scene: PlaneScene,
    view: SecondViewKind,
    layout: CloudLayout,
    out: &Path,
    encoding: PcdEncoding,
) -> Result<(), Box<dyn Error>> {
    let (camera_width, camera_height) = scene.camera_size();
    let config = ScannerConfig {
        camera_width,
        camera_height,
        projector_width: scene.projector_width,
        projector_height: scene.projector_height,
        pre_delay_ms: 0,
        post_delay_ms: 0,
        reconstruction: ReconstructionConfig {
            min_points: 1,
            ..ReconstructionConfig::default()
        },
        second_view: view,
        layout,
        pcd_encoding: encoding,
        ..ScannerConfig::default()
    };
    let scanner = Scanner::new(config, &scene.calibration(view)?)?;
    let (mut projector, mut camera1, mut camera2) = scene.rig();

    let output = scanner.scan(&mut projector, &mut camera1, &mut camera2)?;
    log::info!(
        "Simulated plane at depth {}: {} points",
        scene.depth,
        output.cloud.valid_count()
    );
    save_pcd(&output.cloud, out, encoding)?;
    Ok(())
}
