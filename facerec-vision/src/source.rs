//! Frame acquisition from a camera, a video file or a single image.

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

use crate::camera::Camera;

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("cannot open {source_name}: {reason}")]
    Open { source_name: String, reason: String },
    #[error("unsupported source {}: {reason}", .path.display())]
    Unsupported { path: PathBuf, reason: String },
}

/// Result of one successful read.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRead {
    Frame(RgbImage),
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Camera,
    VideoFile,
    StillImage,
}

/// An ordered supply of frames.
///
/// A per-frame read failure is reported as [`FrameRead::EndOfStream`];
/// errors are reserved for sources that cannot be used at all.
pub trait FrameSource {
    fn kind(&self) -> SourceKind;

    fn next_frame(&mut self) -> Result<FrameRead, AcquisitionError>;

    /// Release the underlying device or file. Idempotent; reads after
    /// closing report end of stream.
    fn close(&mut self);
}

pub enum Source {
    Camera(Camera),
    VideoFile(VideoFile),
    StillImage(StillImage),
}

impl Source {
    pub fn camera(device: &str) -> Result<Self, AcquisitionError> {
        Camera::open(device).map(Source::Camera)
    }

    pub fn video_file(path: &Path) -> Result<Self, AcquisitionError> {
        VideoFile::open(path).map(Source::VideoFile)
    }

    pub fn still_image(path: &Path) -> Result<Self, AcquisitionError> {
        StillImage::open(path).map(Source::StillImage)
    }
}

impl FrameSource for Source {
    fn kind(&self) -> SourceKind {
        match self {
            Source::Camera(_) => SourceKind::Camera,
            Source::VideoFile(_) => SourceKind::VideoFile,
            Source::StillImage(_) => SourceKind::StillImage,
        }
    }

    fn next_frame(&mut self) -> Result<FrameRead, AcquisitionError> {
        let frame = match self {
            Source::Camera(camera) => camera.frame(),
            Source::VideoFile(video) => video.frame(),
            Source::StillImage(still) => still.frame(),
        };
        Ok(frame.map_or(FrameRead::EndOfStream, FrameRead::Frame))
    }

    fn close(&mut self) {
        match self {
            Source::Camera(camera) => camera.close(),
            Source::VideoFile(video) => video.close(),
            Source::StillImage(still) => still.close(),
        }
    }
}

/// A single decoded image, served until closed.
pub struct StillImage {
    image: Option<RgbImage>,
}

impl StillImage {
    pub fn open(path: &Path) -> Result<Self, AcquisitionError> {
        let image = image::open(path).map_err(|e| AcquisitionError::Open {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_image(image.to_rgb8()))
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image: Some(image) }
    }

    pub fn frame(&mut self) -> Option<RgbImage> {
        self.image.clone()
    }

    pub fn close(&mut self) {
        self.image = None;
    }
}

/// Decoded video file. Frames are produced lazily, one per read.
pub struct VideoFile {
    decoder: Option<video_decoder::Decoder>,
    frames_read: u64,
}

impl VideoFile {
    pub fn open(path: &Path) -> Result<Self, AcquisitionError> {
        let decoder = video_decoder::Decoder::open(path)?;
        log::info!("opened video {}", path.display());
        Ok(Self {
            decoder: Some(decoder),
            frames_read: 0,
        })
    }

    pub fn frame(&mut self) -> Option<RgbImage> {
        let decoder = self.decoder.as_mut()?;
        match decoder.next_frame() {
            Ok(Some(frame)) => {
                self.frames_read += 1;
                Some(frame)
            }
            Ok(None) => {
                log::info!("end of video after {} frames", self.frames_read);
                None
            }
            Err(e) => {
                log::warn!("video read failed after {} frames: {}", self.frames_read, e);
                None
            }
        }
    }

    pub fn close(&mut self) {
        self.decoder = None;
    }
}

#[cfg(feature = "video")]
mod video_decoder {
    use std::path::Path;

    use anyhow::Result;
    use ffmpeg_next::{
        format::{context::Input, Pixel},
        media::Type,
        software::scaling::{Context as Scaler, Flags},
        util::frame::video::Video,
    };
    use image::RgbImage;

    use super::AcquisitionError;

    /// ffmpeg-backed decoder converting every frame to RGB24.
    pub struct Decoder {
        input: Input,
        decoder: ffmpeg_next::decoder::Video,
        scaler: Scaler,
        stream_index: usize,
        flushing: bool,
    }

    impl Decoder {
        pub fn open(path: &Path) -> Result<Self, AcquisitionError> {
            let open_err = |e: ffmpeg_next::Error| AcquisitionError::Open {
                source_name: path.display().to_string(),
                reason: e.to_string(),
            };
            ffmpeg_next::init().map_err(open_err)?;
            let input = ffmpeg_next::format::input(&path).map_err(open_err)?;
            let stream = input
                .streams()
                .best(Type::Video)
                .ok_or_else(|| AcquisitionError::Unsupported {
                    path: path.to_path_buf(),
                    reason: "no video stream".to_string(),
                })?;
            let stream_index = stream.index();
            let context = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
                .map_err(open_err)?;
            let decoder = context.decoder().video().map_err(open_err)?;
            let scaler = Scaler::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                Pixel::RGB24,
                decoder.width(),
                decoder.height(),
                Flags::BILINEAR,
            )
            .map_err(open_err)?;
            Ok(Self {
                input,
                decoder,
                scaler,
                stream_index,
                flushing: false,
            })
        }

        pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            loop {
                if let Some(frame) = self.receive()? {
                    return Ok(Some(frame));
                }
                if self.flushing {
                    return Ok(None);
                }
                match self.input.packets().next() {
                    Some((stream, packet)) => {
                        if stream.index() == self.stream_index {
                            self.decoder.send_packet(&packet)?;
                        }
                    }
                    None => {
                        self.decoder.send_eof()?;
                        self.flushing = true;
                    }
                }
            }
        }

        fn receive(&mut self) -> Result<Option<RgbImage>> {
            let mut decoded = Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_err() {
                return Ok(None);
            }
            let mut rgb = Video::empty();
            self.scaler.run(&decoded, &mut rgb)?;

            let (width, height) = (rgb.width(), rgb.height());
            let stride = rgb.stride(0);
            let data = rgb.data(0);
            let row = width as usize * 3;
            let mut pixels = Vec::with_capacity(row * height as usize);
            for y in 0..height as usize {
                pixels.extend_from_slice(&data[y * stride..y * stride + row]);
            }
            Ok(RgbImage::from_raw(width, height, pixels))
        }
    }
}

#[cfg(not(feature = "video"))]
mod video_decoder {
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    use anyhow::Result;
    use image::codecs::gif::GifDecoder;
    use image::{AnimationDecoder, DynamicImage, Frames, RgbImage};

    use super::AcquisitionError;

    /// Animated GIF decoder used when ffmpeg support is not compiled in.
    pub struct Decoder {
        frames: Frames<'static>,
    }

    impl Decoder {
        pub fn open(path: &Path) -> Result<Self, AcquisitionError> {
            let is_gif = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("gif"));
            if !is_gif {
                return Err(AcquisitionError::Unsupported {
                    path: path.to_path_buf(),
                    reason: "only animated GIF is supported without the `video` feature"
                        .to_string(),
                });
            }
            let open_err = |reason: String| AcquisitionError::Open {
                source_name: path.display().to_string(),
                reason,
            };
            let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
            let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| open_err(e.to_string()))?;
            Ok(Self {
                frames: decoder.into_frames(),
            })
        }

        pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            match self.frames.next() {
                Some(frame) => {
                    let rgba = frame?.into_buffer();
                    Ok(Some(DynamicImage::ImageRgba8(rgba).to_rgb8()))
                }
                None => Ok(None),
            }
        }
    }
}
