use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::source::AcquisitionError;

/// V4L2 capture device delivering RGB frames.
pub struct Camera {
    stream: Option<Stream<'static>>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self, AcquisitionError> {
        let open_err = |e: std::io::Error| AcquisitionError::Open {
            source_name: device.to_string(),
            reason: e.to_string(),
        };
        let dev = Device::with_path(device).map_err(open_err)?;
        let mut fmt = dev.format().map_err(open_err)?;
        // Prefer RGB, fallback to YUYV, else accept existing format
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).map_err(open_err)?;
        log::info!(
            "opened camera {}: {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(Self {
            stream: Some(stream),
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    /// Next frame, or `None` once closed or when the device fails to deliver.
    pub fn frame(&mut self) -> Option<RgbImage> {
        let stream = self.stream.as_mut()?;
        let (data, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                log::warn!("camera read failed: {}", e);
                return None;
            }
        };
        log::debug!(
            "captured frame: seq={} len={}",
            meta.sequence,
            data.len()
        );
        let buf = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => Some(data.to_vec()),
            f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(self.width, self.height, data),
            f if f == FourCC::new(b"GREY") => grey_to_rgb(self.width, self.height, data),
            other => {
                log::warn!("unsupported pixel format {:?}", other);
                None
            }
        }?;
        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
            log::warn!("camera buffer too small: got {}, expected {}", buf.len(), expected);
            return None;
        }
        RgbImage::from_raw(self.width, self.height, buf[..expected].to_vec())
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("camera stream released");
        }
    }
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Option<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return None;
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Some(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Option<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        return None;
    }
    Some(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_grey_pixel() {
        // Y=128 with neutral chroma is mid grey for both pixels.
        let rgb = yuyv_to_rgb(2, 1, &[128, 128, 128, 128]).unwrap();
        assert_eq!(rgb, vec![128; 6]);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        assert!(yuyv_to_rgb(4, 4, &[0; 8]).is_none());
    }

    #[test]
    fn test_grey_to_rgb() {
        assert_eq!(grey_to_rgb(2, 1, &[7, 9]).unwrap(), vec![7, 7, 7, 9, 9, 9]);
    }
}
