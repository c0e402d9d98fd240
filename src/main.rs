use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facerec::{
    config::{self, Config},
    display::{Display, HeadlessDisplay, WindowDisplay},
    enroll::{Enroller, MultiFacePolicy},
    geo,
    overlay::Overlay,
    pipeline::{FramePipeline, LIVE_DETECT_INTERVAL},
    session::Session,
    storage, Error, Gallery,
};
use facerec_vision::{
    model::{OnnxEmbedder, YunetDetector},
    Source,
};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facerec")]
#[command(
    version,
    about = "Face recognition for images, video files and live cameras"
)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the gallery from per-person image folders
    Enroll {
        /// Folder holding one sub-folder of images per person
        #[arg(long)]
        images: Option<PathBuf>,
        /// Embed each face once instead of six augmented variants
        #[arg(long)]
        no_augment: bool,
        /// What to do with images containing several faces
        #[arg(long, value_enum)]
        policy: Option<MultiFacePolicy>,
    },
    /// Recognise faces from a live camera
    Live {
        #[arg(long)]
        camera: Option<String>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        screenshot_dir: Option<PathBuf>,
    },
    /// Recognise faces in a video file
    Video {
        path: PathBuf,
        #[arg(long)]
        threshold: Option<f32>,
        /// Process without opening a window
        #[arg(long)]
        headless: bool,
    },
    /// Recognise faces in a single image
    Image {
        path: PathBuf,
        #[arg(long)]
        threshold: Option<f32>,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Do not open a window
        #[arg(long)]
        headless: bool,
    },
    /// Live camera with the closest people logged for every face
    Diagnose {
        #[arg(long)]
        camera: Option<String>,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// List enrolled people
    List,
    /// Remove one person from the gallery
    Purge {
        /// Gallery folder of the person
        folder_key: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll {
            images,
            no_augment,
            policy,
        } => {
            let images = images.unwrap_or_else(|| cfg.face_images_dir.clone());
            let policy = policy.unwrap_or(cfg.multi_face_policy);
            enroll(&cfg, &images, cfg.augment && !no_augment, policy)
        }
        Commands::Live {
            camera,
            threshold,
            screenshot_dir,
        } => {
            let camera = camera.unwrap_or_else(|| cfg.camera.clone());
            let screenshot_dir = screenshot_dir.unwrap_or_else(|| cfg.screenshot_dir.clone());
            live(&cfg, &camera, threshold, Some(screenshot_dir), false)
        }
        Commands::Diagnose { camera, threshold } => {
            let camera = camera.unwrap_or_else(|| cfg.camera.clone());
            live(&cfg, &camera, threshold, None, true)
        }
        Commands::Video {
            path,
            threshold,
            headless,
        } => video(&cfg, &path, threshold, headless),
        Commands::Image {
            path,
            threshold,
            output,
            headless,
        } => still_image(&cfg, &path, threshold, output, headless),
        Commands::List => list(&cfg),
        Commands::Purge { folder_key } => purge(&cfg, &folder_key),
        Commands::Config => open_config(cli.config.as_deref()),
    }
}

fn load_models(cfg: &Config) -> Result<(YunetDetector, OnnxEmbedder)> {
    let detector = YunetDetector::load(&cfg.detector_model, cfg.detection_score, cfg.nms_threshold)
        .map_err(|source| Error::ModelInit {
            component: "face detector",
            source,
        })?;
    let embedder = OnnxEmbedder::load(
        &cfg.embedder_model,
        cfg.embedder_input_size,
        cfg.embedder_layout.into(),
    )
    .map_err(|source| Error::ModelInit {
        component: "face embedder",
        source,
    })?;
    Ok((detector, embedder))
}

fn threshold(cfg: &Config, overridden: Option<f32>) -> Result<f32> {
    let threshold = overridden.unwrap_or(cfg.threshold);
    if !(threshold.is_finite() && threshold > 0.0) {
        return Err(Error::InvalidArgument(format!(
            "threshold must be a positive number, got {}",
            threshold
        ))
        .into());
    }
    Ok(threshold)
}

fn window(cfg: &Config, title: &str, fps: usize) -> Result<Box<dyn Display>> {
    let window = WindowDisplay::open(title, cfg.window_width, cfg.window_height, fps)
        .context("Failed to open display window")?;
    Ok(Box::new(window))
}

fn enroll(cfg: &Config, images: &Path, augment: bool, policy: MultiFacePolicy) -> Result<()> {
    info!("Scanning {}", images.display());
    if augment {
        info!("Augmentation on: 6 variants per image");
    }
    let (detector, embedder) = load_models(cfg)?;
    let mut enroller = Enroller::new(detector, embedder)
        .with_augmentation(augment)
        .with_policy(policy);

    let summary = enroller
        .enroll_all(images, &cfg.gallery_dir)
        .context("Enrollment failed")?;

    for person in summary.people.iter().filter(|p| p.unit_path.is_none()) {
        warn!("✗ No embeddings extracted for '{}'", person.folder_key);
    }
    info!("Original images processed: {}", summary.original_images());
    info!("Total embeddings saved: {}", summary.total_embeddings());
    info!("Augmentation factor: {:.1}x", summary.augmentation_factor());
    info!("Gallery location: {}", cfg.gallery_dir.display());
    Ok(())
}

fn live(
    cfg: &Config,
    camera: &str,
    threshold_override: Option<f32>,
    screenshot_dir: Option<PathBuf>,
    diagnostic: bool,
) -> Result<()> {
    let threshold = threshold(cfg, threshold_override)?;
    let gallery = Gallery::load(&cfg.gallery_dir)?;
    let (detector, embedder) = load_models(cfg)?;

    info!("Opening camera: {}", camera);
    let source = Source::camera(camera).map_err(Error::from)?;

    let pipeline = FramePipeline::new(detector, embedder, &gallery, threshold)
        .with_detect_interval(cfg.live_detect_interval.max(1))
        .with_diagnostics(diagnostic);
    if cfg.live_detect_interval != LIVE_DETECT_INTERVAL {
        info!("Detecting every {} frames", cfg.live_detect_interval);
    }
    let display = window(cfg, "Live Face Recognition (Q to quit, S for screenshot)", 60)?;
    let overlay = Overlay::load(cfg.font_path.as_deref()).with_distance(diagnostic);
    let location = geo::resolve(cfg.geolocation_url.as_deref());

    let mut session = Session::new(source, pipeline, display, overlay).with_hud(location);
    if let Some(dir) = screenshot_dir {
        session = session.with_screenshot_dir(dir);
    }

    info!("Starting live recognition. Press Q to quit.");
    let summary = session.run()?;
    info!("✓ Stopped after {} frames", summary.frames);
    Ok(())
}

fn video(cfg: &Config, path: &Path, threshold_override: Option<f32>, headless: bool) -> Result<()> {
    let threshold = threshold(cfg, threshold_override)?;
    let gallery = Gallery::load(&cfg.gallery_dir)?;
    let (detector, embedder) = load_models(cfg)?;
    let source = Source::video_file(path).map_err(Error::from)?;

    let pipeline = FramePipeline::new(detector, embedder, &gallery, threshold);
    let display: Box<dyn Display> = if headless {
        Box::new(HeadlessDisplay::default())
    } else {
        window(cfg, "Video Face Recognition (Q to quit)", 40)?
    };
    let overlay = Overlay::load(cfg.font_path.as_deref());

    let summary = Session::new(source, pipeline, display, overlay).run()?;
    info!(
        "✓ Processed {} frames of {}",
        summary.frames,
        path.display()
    );
    Ok(())
}

fn still_image(
    cfg: &Config,
    path: &Path,
    threshold_override: Option<f32>,
    output: Option<PathBuf>,
    headless: bool,
) -> Result<()> {
    let threshold = threshold(cfg, threshold_override)?;
    let gallery = Gallery::load(&cfg.gallery_dir)?;
    let (detector, embedder) = load_models(cfg)?;
    let source = Source::still_image(path).map_err(Error::from)?;

    let pipeline = FramePipeline::new(detector, embedder, &gallery, threshold);
    let display: Box<dyn Display> = if headless {
        Box::new(HeadlessDisplay::default())
    } else {
        window(cfg, "Image Face Recognition (Q to quit)", 30)?
    };
    let overlay = Overlay::load(cfg.font_path.as_deref());

    let mut session = Session::new(source, pipeline, display, overlay);
    if let Some(output) = output {
        session = session.with_output(output);
    }
    session.run()?;
    Ok(())
}

fn list(cfg: &Config) -> Result<()> {
    let gallery = Gallery::load(&cfg.gallery_dir)?;
    for person in gallery.people() {
        println!(
            "{}\t{}\tage: {}\t{} embeddings",
            person.folder_key,
            person.display_name,
            person.age,
            person.embeddings.len()
        );
    }
    Ok(())
}

fn purge(cfg: &Config, folder_key: &str) -> Result<()> {
    info!("Purging enrolled faces for: {}", folder_key);

    if storage::purge(&cfg.gallery_dir, folder_key).context("Failed to purge face records")? {
        info!("✓ Removed {} from the gallery", folder_key);
    } else {
        warn!("No gallery entry named {}", folder_key);
    }
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if !config_path.exists() {
        config::save_config(&Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
