//! One recognition session: acquire, detect and match, render, repeat.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use facerec_vision::{Detector, Embedder, FrameRead, FrameSource, SourceKind};
use image::RgbImage;
use log::{debug, error, info, warn};

use crate::display::{Display, UserInput};
use crate::overlay::{self, Overlay, FLASH_FRAMES};
use crate::pipeline::{FramePipeline, FrameReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Acquiring,
    DetectingAndMatching,
    Rendering,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Quit,
    EndOfStream,
    DisplayClosed,
    AcquisitionFailed,
    /// A still image was rendered with nobody watching.
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub reason: StopReason,
    pub frames: u64,
    pub detection_frames: u64,
    pub screenshots: Vec<PathBuf>,
}

/// `<dir>/screenshot_<YYYYmmdd_HHMMSS>.png`
pub fn screenshot_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("screenshot_{}.png", now.format("%Y%m%d_%H%M%S")))
}

pub fn timestamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct Session<'g, S, D, E, W> {
    source: S,
    pipeline: FramePipeline<'g, D, E>,
    display: W,
    overlay: Overlay,
    /// Location line for the HUD, resolved once before the session starts.
    hud: Option<String>,
    screenshot_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    state: SessionState,
    flash_remaining: u32,
    detection_frames: u64,
    screenshots: Vec<PathBuf>,
}

impl<'g, S, D, E, W> Session<'g, S, D, E, W>
where
    S: FrameSource,
    D: Detector,
    E: Embedder,
    W: Display,
{
    pub fn new(source: S, pipeline: FramePipeline<'g, D, E>, display: W, overlay: Overlay) -> Self {
        Self {
            source,
            pipeline,
            display,
            overlay,
            hud: None,
            screenshot_dir: None,
            output: None,
            state: SessionState::Acquiring,
            flash_remaining: 0,
            detection_frames: 0,
            screenshots: Vec::new(),
        }
    }

    /// Draw the timestamp and `location` panel on every frame.
    pub fn with_hud(mut self, location: String) -> Self {
        self.hud = Some(location);
        self
    }

    /// Where screenshots go. Screenshots are only taken from a camera.
    pub fn with_screenshot_dir(mut self, dir: PathBuf) -> Self {
        self.screenshot_dir = Some(dir);
        self
    }

    /// Write the annotated still image to `path`.
    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output = Some(path);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn display(&self) -> &W {
        &self.display
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run until quit, end of stream, display close or acquisition failure.
    /// The source is closed exactly once, whatever the outcome.
    pub fn run(&mut self) -> Result<SessionSummary> {
        if self.state == SessionState::Stopped {
            anyhow::bail!("session already stopped");
        }
        let kind = self.source.kind();
        info!("session started ({:?})", kind);

        let outcome = self.run_loop(kind);
        self.source.close();
        self.state = SessionState::Stopped;

        let reason = outcome?;
        info!(
            "session stopped: {:?} after {} frames ({} with detection)",
            reason,
            self.pipeline.frame_count(),
            self.detection_frames
        );
        Ok(SessionSummary {
            reason,
            frames: self.pipeline.frame_count(),
            detection_frames: self.detection_frames,
            screenshots: self.screenshots.clone(),
        })
    }

    fn run_loop(&mut self, kind: SourceKind) -> Result<StopReason> {
        loop {
            self.state = SessionState::Acquiring;
            let frame = match self.source.next_frame() {
                Ok(FrameRead::Frame(frame)) => frame,
                Ok(FrameRead::EndOfStream) => return Ok(StopReason::EndOfStream),
                Err(e) => {
                    error!("acquisition failed: {}", e);
                    return Ok(StopReason::AcquisitionFailed);
                }
            };

            self.state = SessionState::DetectingAndMatching;
            let report = self.pipeline.process(&frame);
            if report.detected {
                self.detection_frames += 1;
            }

            self.state = SessionState::Rendering;
            let rendered = self.render(&frame, &report, kind);

            if kind == SourceKind::StillImage {
                self.log_faces(&report);
                if let Some(path) = &self.output {
                    save_image(&rendered, path)?;
                    info!("annotated image saved to {}", path.display());
                }
                return Ok(self.wait(&rendered));
            }

            if let Err(e) = self.display.show(&rendered) {
                warn!("{:#}", e);
                return Ok(StopReason::DisplayClosed);
            }
            match self.display.poll() {
                UserInput::Quit => return Ok(StopReason::Quit),
                UserInput::Closed => return Ok(StopReason::DisplayClosed),
                UserInput::Screenshot => self.screenshot(&frame, kind),
                UserInput::None => {}
            }
        }
    }

    fn render(&mut self, frame: &RgbImage, report: &FrameReport, kind: SourceKind) -> RgbImage {
        let mut out = frame.clone();
        let annotations = self.pipeline.annotations();
        self.overlay.draw_faces(&mut out, annotations);
        if kind == SourceKind::StillImage && report.detected && report.faces == 0 {
            self.overlay.draw_no_faces(&mut out);
        }
        if let Some(location) = &self.hud {
            self.overlay
                .draw_hud(&mut out, location, &timestamp(Local::now()));
        }
        if self.flash_remaining > 0 {
            overlay::flash(&mut out);
            self.flash_remaining -= 1;
        }
        out
    }

    /// Keep a still image on screen until the viewer quits.
    fn wait(&mut self, rendered: &RgbImage) -> StopReason {
        if !self.display.is_interactive() {
            if let Err(e) = self.display.show(rendered) {
                warn!("{:#}", e);
            }
            return StopReason::Completed;
        }
        loop {
            if let Err(e) = self.display.show(rendered) {
                warn!("{:#}", e);
                return StopReason::DisplayClosed;
            }
            match self.display.poll() {
                UserInput::Quit => return StopReason::Quit,
                UserInput::Closed => return StopReason::DisplayClosed,
                UserInput::Screenshot | UserInput::None => {}
            }
        }
    }

    fn screenshot(&mut self, frame: &RgbImage, kind: SourceKind) {
        let Some(dir) = self.screenshot_dir.as_deref() else {
            debug!("screenshot requested but no screenshot directory is set");
            return;
        };
        if kind != SourceKind::Camera {
            debug!("screenshots are only taken in live mode");
            return;
        }
        let path = screenshot_path(dir, Local::now());
        match save_image(frame, &path) {
            Ok(()) => {
                info!("screenshot saved: {}", path.display());
                self.flash_remaining = FLASH_FRAMES;
                self.screenshots.push(path);
            }
            Err(e) => warn!("screenshot failed: {:#}", e),
        }
    }

    fn log_faces(&self, report: &FrameReport) {
        if report.detected && report.faces == 0 {
            info!("no faces detected in the image");
            return;
        }
        for (i, face) in self.pipeline.annotations().iter().enumerate() {
            if face.is_known {
                info!(
                    "face {}: {} (age: {}) - distance {:.3}",
                    i + 1,
                    face.display_name,
                    face.age,
                    face.distance
                );
            } else {
                info!("face {}: Unknown - distance {:.3}", i + 1, face.distance);
            }
        }
    }
}

fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))
}
