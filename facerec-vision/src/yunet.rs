//! YuNet detector pre- and post-processing.
//!
//! The network sees a square, letterboxed BGR canvas. For each stride
//! (8, 16, 32) it emits four tensors over the `H*W` grid:
//! `cls [1, H*W, 1]`, `obj [1, H*W, 1]`, `bbox [1, H*W, 4]`, `kps [1, H*W, 10]`,
//! in the order cls_8, cls_16, cls_32, obj_8, ..., kps_32.
//!
//! Boxes decode without anchors:
//! cx = (col + dx) * stride, cy = (row + dy) * stride,
//! w = exp(dw) * stride, h = exp(dh) * stride.

use anyhow::Result;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;

pub const INPUT_SIZE: u32 = 640;
const STRIDES: [usize; 3] = [8, 16, 32];

/// Placement of the source image on the square network canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = target as f32 / width.max(height).max(1) as f32;
        let new_width = ((width as f32 * scale) as u32).min(target);
        let new_height = ((height as f32 * scale) as u32).min(target);
        Self {
            scale,
            offset_x: (target - new_width) / 2,
            offset_y: (target - new_height) / 2,
        }
    }

    /// Map a canvas-space box back to source image pixels.
    pub fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
        [
            (bbox[0] - self.offset_x as f32) / self.scale,
            (bbox[1] - self.offset_y as f32) / self.scale,
            bbox[2] / self.scale,
            bbox[3] / self.scale,
        ]
    }
}

/// Letterbox `img` into a `[1, 3, size, size]` BGR tensor with values in [0, 255].
pub fn prepare_input(img: &RgbImage, size: u32) -> Result<(Array4<f32>, Letterbox)> {
    let letterbox = Letterbox::fit(img.width(), img.height(), size);
    let new_width = ((img.width() as f32 * letterbox.scale) as u32).clamp(1, size);
    let new_height = ((img.height() as f32 * letterbox.scale) as u32).clamp(1, size);
    let resized = image::imageops::resize(img, new_width, new_height, FilterType::Triangle);

    let mut canvas = RgbImage::new(size, size);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    let side = size as usize;
    let mut input = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        input[[0, 0, y, x]] = pixel[2] as f32;
        input[[0, 1, y, x]] = pixel[1] as f32;
        input[[0, 2, y, x]] = pixel[0] as f32;
    }
    Ok((input, letterbox))
}

/// One stride's worth of network output.
#[derive(Debug, Clone, Default)]
pub struct StrideOutput {
    pub cls: Vec<f32>,
    pub obj: Vec<f32>,
    pub bbox: Vec<f32>,
}

/// Canvas-space candidate box (x, y, w, h) with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub score: f32,
}

/// Group the twelve raw YuNet outputs by stride, checking their shapes.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<StrideOutput>> {
    if outputs.len() < 12 {
        anyhow::bail!("expected 12 YuNet outputs, got {}", outputs.len());
    }

    let mut strides = Vec::with_capacity(STRIDES.len());
    for (idx, &stride) in STRIDES.iter().enumerate() {
        let cells = (input_size / stride) * (input_size / stride);
        strides.push(StrideOutput {
            cls: tensor(outputs[idx], cells, 1, "cls")?,
            obj: tensor(outputs[idx + 3], cells, 1, "obj")?,
            bbox: tensor(outputs[idx + 6], cells, 4, "bbox")?,
        });
    }
    Ok(strides)
}

fn tensor((shape, data): (&[i64], &[f32]), cells: usize, width: usize, name: &str) -> Result<Vec<f32>> {
    let ok = shape.len() == 3
        && shape[0] == 1
        && shape[1] as usize == cells
        && shape[2] as usize == width;
    if !ok || data.len() != cells * width {
        anyhow::bail!(
            "unexpected {} shape {:?}, expected [1, {}, {}]",
            name,
            shape,
            cells,
            width
        );
    }
    Ok(data.to_vec())
}

/// Decode candidate boxes scoring at least `score_threshold`.
///
/// Score is `sqrt(cls * obj)` with both terms clamped to [0, 1].
pub fn decode(strides: &[StrideOutput], score_threshold: f32, input_size: usize) -> Vec<RawDetection> {
    let mut detections = Vec::new();

    for (output, &stride) in strides.iter().zip(STRIDES.iter()) {
        let cols = input_size / stride;
        for (idx, (&cls, &obj)) in output.cls.iter().zip(output.obj.iter()).enumerate() {
            let score = (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }
            let row = (idx / cols) as f32;
            let col = (idx % cols) as f32;
            let d = &output.bbox[idx * 4..idx * 4 + 4];

            let cx = (col + d[0]) * stride as f32;
            let cy = (row + d[1]) * stride as f32;
            let w = d[2].exp() * stride as f32;
            let h = d[3].exp() * stride as f32;

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
            });
        }
    }

    detections
}
