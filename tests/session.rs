use std::cell::Cell;
use std::rc::Rc;

use facerec::{
    display::{Display, HeadlessDisplay, UserInput},
    gallery::{Gallery, PersonRecord},
    overlay::{Overlay, FLASH_FRAMES, KNOWN_COLOR},
    pipeline::FramePipeline,
    session::{Session, SessionState, StopReason},
    Detection, Detector, Embedder, Embedding, FaceBox,
};
use facerec_vision::{AcquisitionError, FrameRead, FrameSource, SourceKind};
use image::{Rgb, RgbImage};

/// Serves `frames` solid frames, counting reads and closes.
struct FakeSource {
    kind: SourceKind,
    frames: usize,
    served: usize,
    closed: bool,
    closes: Rc<Cell<usize>>,
    fail_open: bool,
}

impl FakeSource {
    fn new(kind: SourceKind, frames: usize) -> (Self, Rc<Cell<usize>>) {
        let closes = Rc::new(Cell::new(0));
        let source = Self {
            kind,
            frames,
            served: 0,
            closed: false,
            closes: closes.clone(),
            fail_open: false,
        };
        (source, closes)
    }
}

impl FrameSource for FakeSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn next_frame(&mut self) -> Result<FrameRead, AcquisitionError> {
        if self.fail_open {
            return Err(AcquisitionError::Open {
                source_name: "fake".to_string(),
                reason: "unplugged".to_string(),
            });
        }
        let still = self.kind == SourceKind::StillImage;
        if self.closed || (!still && self.served == self.frames) {
            return Ok(FrameRead::EndOfStream);
        }
        self.served += 1;
        Ok(FrameRead::Frame(RgbImage::from_pixel(64, 48, Rgb([200, 0, 0]))))
    }

    fn close(&mut self) {
        self.closed = true;
        self.closes.set(self.closes.get() + 1);
    }
}

/// Counts calls and reports one face in the middle of the frame.
struct CountingDetector {
    calls: Rc<Cell<usize>>,
    faces: usize,
}

impl Detector for CountingDetector {
    fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        self.calls.set(self.calls.get() + 1);
        Ok((0..self.faces)
            .map(|_| Detection {
                bbox: FaceBox {
                    x: 16,
                    y: 16,
                    width: 24,
                    height: 24,
                },
                score: 0.9,
            })
            .collect())
    }
}

struct ConstEmbedder;

impl Embedder for ConstEmbedder {
    fn input_size(&self) -> u32 {
        8
    }

    fn embed(&mut self, _face: &RgbImage) -> anyhow::Result<Embedding> {
        Ok(Embedding::new(vec![0.0, 1.0]))
    }
}

/// Sends scripted input, one entry per polled frame, then quits.
/// Keeps every frame it was asked to show.
struct ScriptedDisplay {
    script: Vec<UserInput>,
    polls: usize,
    shown: Vec<RgbImage>,
}

impl ScriptedDisplay {
    fn new(script: Vec<UserInput>) -> Self {
        Self {
            script,
            polls: 0,
            shown: Vec::new(),
        }
    }
}

impl Display for ScriptedDisplay {
    fn show(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        self.shown.push(frame.clone());
        Ok(())
    }

    fn poll(&mut self) -> UserInput {
        let input = self.script.get(self.polls).copied().unwrap_or(UserInput::Quit);
        self.polls += 1;
        input
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

fn gallery() -> Gallery {
    Gallery::from_records([PersonRecord {
        folder_key: "alice".to_string(),
        display_name: "Alice".to_string(),
        age: "30".to_string(),
        embeddings: vec![Embedding::new(vec![0.0, 0.9])],
    }])
    .unwrap()
}

fn detector(faces: usize) -> (CountingDetector, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    (
        CountingDetector {
            calls: calls.clone(),
            faces,
        },
        calls,
    )
}

#[test]
fn test_video_runs_to_end_and_closes_once() {
    let g = gallery();
    let (source, closes) = FakeSource::new(SourceKind::VideoFile, 10);
    let (detector, calls) = detector(1);
    let pipeline = FramePipeline::new(detector, ConstEmbedder, &g, 0.85);

    let mut session = Session::new(
        source,
        pipeline,
        HeadlessDisplay::default(),
        Overlay::load(None),
    );
    let summary = session.run().unwrap();

    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert_eq!(summary.frames, 10);
    assert_eq!(summary.detection_frames, 10);
    assert_eq!(calls.get(), 10);
    assert_eq!(closes.get(), 1);
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.display().frames_shown(), 10);

    // A stopped session cannot be rerun, and does not close again.
    assert!(session.run().is_err());
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_live_detects_every_third_frame() {
    let g = gallery();
    let (source, closes) = FakeSource::new(SourceKind::Camera, 10);
    let (detector, calls) = detector(1);
    let pipeline =
        FramePipeline::new(detector, ConstEmbedder, &g, 0.85).with_detect_interval(3);

    let mut session = Session::new(
        source,
        pipeline,
        HeadlessDisplay::default(),
        Overlay::load(None),
    );
    let summary = session.run().unwrap();

    assert_eq!(summary.frames, 10);
    assert_eq!(summary.detection_frames, 3);
    assert_eq!(calls.get(), 3);
    assert_eq!(closes.get(), 1);

    // Frame 10 reuses the boxes found on frame 9.
    let last = session.display().last_frame().unwrap();
    assert_eq!(*last.get_pixel(16, 16), KNOWN_COLOR);
}

#[test]
fn test_first_frames_have_no_annotations_before_detection() {
    let g = gallery();
    let (source, _) = FakeSource::new(SourceKind::Camera, 2);
    let (detector, calls) = detector(1);
    let pipeline =
        FramePipeline::new(detector, ConstEmbedder, &g, 0.85).with_detect_interval(3);

    let mut session = Session::new(
        source,
        pipeline,
        HeadlessDisplay::default(),
        Overlay::load(None),
    );
    session.run().unwrap();
    assert_eq!(calls.get(), 0);
    let last = session.display().last_frame().unwrap();
    assert_eq!(*last.get_pixel(16, 16), Rgb([200, 0, 0]));
}

#[test]
fn test_quit_stops_live_session() {
    let g = gallery();
    let (source, closes) = FakeSource::new(SourceKind::Camera, 1000);
    let (detector, _) = detector(0);
    let pipeline = FramePipeline::new(detector, ConstEmbedder, &g, 0.85);
    let display = ScriptedDisplay::new(vec![UserInput::None, UserInput::None, UserInput::Quit]);

    let mut session = Session::new(source, pipeline, display, Overlay::load(None));
    let summary = session.run().unwrap();
    assert_eq!(summary.reason, StopReason::Quit);
    assert_eq!(summary.frames, 3);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_display_closed_stops_session() {
    let g = gallery();
    let (source, closes) = FakeSource::new(SourceKind::VideoFile, 1000);
    let (detector, _) = detector(0);
    let pipeline = FramePipeline::new(detector, ConstEmbedder, &g, 0.85);
    let display = ScriptedDisplay::new(vec![UserInput::None, UserInput::Closed]);

    let mut session = Session::new(source, pipeline, display, Overlay::load(None));
    let summary = session.run().unwrap();
    assert_eq!(summary.reason, StopReason::DisplayClosed);
    assert_eq!(summary.frames, 2);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_acquisition_failure_stops_and_closes() {
    let g = gallery();
    let (mut source, closes) = FakeSource::new(SourceKind::Camera, 5);
    source.fail_open = true;
    let (detector, calls) = detector(1);
    let pipeline = FramePipeline::new(detector, ConstEmbedder, &g, 0.85);

    let mut session = Session::new(
        source,
        pipeline,
        HeadlessDisplay::default(),
        Overlay::load(None),
    );
    let summary = session.run().unwrap();
    assert_eq!(summary.reason, StopReason::AcquisitionFailed);
    assert_eq!(summary.frames, 0);
    assert_eq!(calls.get(), 0);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_screenshot_in_live_mode() {
    let g = gallery();
    let shots = tempfile::tempdir().unwrap();
    let (source, _) = FakeSource::new(SourceKind::Camera, 1000);
    let (detector, _) = detector(1);
    let pipeline = FramePipeline::new(detector, ConstEmbedder, &g, 0.85);
    let display = ScriptedDisplay::new(vec![UserInput::Screenshot, UserInput::None, UserInput::Quit]);

    let mut session = Session::new(source, pipeline, display, Overlay::load(None))
        .with_screenshot_dir(shots.path().join("shots"));
    let summary = session.run().unwrap();

    assert_eq!(summary.screenshots.len(), 1);
    let saved = image::open(&summary.screenshots[0]).unwrap().to_rgb8();
    // Screenshots hold the frame as captured, without boxes.
    assert_eq!(*saved.get_pixel(16, 16), Rgb([200, 0, 0]));
    let name = summary.screenshots[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("screenshot_") && name.ends_with(".png"));
}

#[test]
fn test_screenshot_flashes_next_frames() {
    let g = gallery();
    let shots = tempfile::tempdir().unwrap();
    let (source, _) = FakeSource::new(SourceKind::Camera, 1000);
    let (detector, _) = detector(0);
    let pipeline = FramePipeline::new(detector, ConstEmbedder, &g, 0.85);
    let mut script = vec![UserInput::Screenshot];
    script.extend([UserInput::None; 11]);
    script.push(UserInput::Quit);

    let mut session = Session::new(source, pipeline, ScriptedDisplay::new(script), Overlay::load(None))
        .with_screenshot_dir(shots.path().to_path_buf());
    let summary = session.run().unwrap();
    assert_eq!(summary.screenshots.len(), 1);

    let shown = &session.display().shown;
    assert_eq!(shown.len(), 13);
    let plain = Rgb([200, 0, 0]);
    let white = Rgb([233, 153, 153]);
    // The frame the screenshot was taken on is shown before the key is read.
    assert_eq!(*shown[0].get_pixel(2, 2), plain);
    for frame in &shown[1..=FLASH_FRAMES as usize] {
        assert_eq!(*frame.get_pixel(2, 2), white);
    }
    assert_eq!(*shown[FLASH_FRAMES as usize + 1].get_pixel(2, 2), plain);
    assert_eq!(*shown[12].get_pixel(2, 2), plain);
}

#[test]
fn test_screenshot_ignored_for_video() {
    let g = gallery();
    let shots = tempfile::tempdir().unwrap();
    let (source, _) = FakeSource::new(SourceKind::VideoFile, 1000);
    let (detector, _) = detector(0);
    let pipeline = FramePipeline::new(detector, ConstEmbedder, &g, 0.85);
    let display = ScriptedDisplay::new(vec![UserInput::Screenshot, UserInput::Quit]);

    let mut session = Session::new(source, pipeline, display, Overlay::load(None))
        .with_screenshot_dir(shots.path().to_path_buf());
    let summary = session.run().unwrap();
    assert!(summary.screenshots.is_empty());
    assert_eq!(std::fs::read_dir(shots.path()).unwrap().count(), 0);
}

#[test]
fn test_still_image_headless_writes_output() {
    let g = gallery();
    let out = tempfile::tempdir().unwrap();
    let output = out.path().join("annotated.png");
    let (source, closes) = FakeSource::new(SourceKind::StillImage, 1);
    let (detector, calls) = detector(1);
    let pipeline = FramePipeline::new(detector, ConstEmbedder, &g, 0.85);

    let mut session = Session::new(
        source,
        pipeline,
        HeadlessDisplay::default(),
        Overlay::load(None),
    )
    .with_output(output.clone());
    let summary = session.run().unwrap();

    assert_eq!(summary.reason, StopReason::Completed);
    assert_eq!(summary.frames, 1);
    assert_eq!(calls.get(), 1);
    assert_eq!(closes.get(), 1);
    let annotated = image::open(&output).unwrap().to_rgb8();
    assert_eq!(*annotated.get_pixel(16, 16), KNOWN_COLOR);
}

#[test]
fn test_still_image_waits_for_quit() {
    let g = gallery();
    let (source, closes) = FakeSource::new(SourceKind::StillImage, 1);
    let (detector, calls) = detector(1);
    let pipeline = FramePipeline::new(detector, ConstEmbedder, &g, 0.85);
    let display = ScriptedDisplay::new(vec![UserInput::None, UserInput::None, UserInput::None]);

    let mut session = Session::new(source, pipeline, display, Overlay::load(None));
    let summary = session.run().unwrap();

    assert_eq!(summary.reason, StopReason::Quit);
    assert_eq!(summary.frames, 1);
    assert_eq!(calls.get(), 1);
    assert_eq!(session.display().polls, 4);
    assert_eq!(session.display().shown.len(), 4);
    assert_eq!(closes.get(), 1);
}
