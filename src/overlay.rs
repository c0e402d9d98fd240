//! Drawing face annotations, the HUD panel and the screenshot flash.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context};
use facerec_vision::FaceBox;
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use log::warn;

use crate::pipeline::CachedFaceAnnotation;

pub const KNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const BOX_THICKNESS: i32 = 2;
const LINE_HEIGHT: i32 = 20;
const LABEL_GAP: i32 = 4;
const NAME_SCALE: f32 = 20.0;
const AGE_SCALE: f32 = 16.0;

const HUD_WIDTH: u32 = 280;
const HUD_HEIGHT: u32 = 50;
const HUD_ALPHA: f32 = 0.6;
const HUD_TEXT_SCALE: f32 = 14.0;

/// Number of rendered frames a screenshot flash lasts.
pub const FLASH_FRAMES: u32 = 10;
const FLASH_ALPHA: f32 = 0.6;

pub const NO_FACES_TEXT: &str = "No faces detected";

pub struct Overlay {
    font: Option<FontVec>,
    show_distance: bool,
}

impl Overlay {
    /// Load the label font. Without one, boxes and panels are still drawn.
    pub fn load(font_path: Option<&Path>) -> Self {
        let font = match font_path.map(load_font) {
            Some(Ok(font)) => Some(font),
            Some(Err(e)) => {
                warn!("labels disabled: {:#}", e);
                None
            }
            None => {
                warn!("labels disabled: no font_path configured");
                None
            }
        };
        Self {
            font,
            show_distance: false,
        }
    }

    /// Append the match distance to every face label.
    pub fn with_distance(mut self, show_distance: bool) -> Self {
        self.show_distance = show_distance;
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw_faces(&self, frame: &mut RgbImage, annotations: &[CachedFaceAnnotation]) {
        for annotation in annotations {
            let color = if annotation.is_known {
                KNOWN_COLOR
            } else {
                UNKNOWN_COLOR
            };
            draw_box(frame, &annotation.bbox, color);

            let lines = self.label_lines(annotation);
            let origins = label_origins(&annotation.bbox, lines.len());
            for ((text, scale), (x, y)) in lines.iter().zip(origins) {
                self.text(frame, color, x, y, *scale, text);
            }
        }
    }

    pub fn draw_no_faces(&self, frame: &mut RgbImage) {
        self.text(frame, KNOWN_COLOR, 50, 30, 28.0, NO_FACES_TEXT);
    }

    /// Darkened bottom-right panel with the location and timestamp.
    pub fn draw_hud(&self, frame: &mut RgbImage, location: &str, timestamp: &str) {
        let (width, height) = frame.dimensions();
        let x0 = width.saturating_sub(HUD_WIDTH);
        let y0 = height.saturating_sub(HUD_HEIGHT);
        for y in y0..height {
            for x in x0..width {
                let px = frame.get_pixel_mut(x, y);
                for c in px.0.iter_mut() {
                    *c = (*c as f32 * (1.0 - HUD_ALPHA)).round() as u8;
                }
            }
        }
        let x = x0 as i32 + 10;
        self.text(frame, WHITE, x, y0 as i32 + 8, HUD_TEXT_SCALE, location);
        self.text(frame, WHITE, x, y0 as i32 + 28, HUD_TEXT_SCALE, timestamp);
    }

    fn label_lines(&self, annotation: &CachedFaceAnnotation) -> Vec<(String, f32)> {
        let mut first = annotation.display_name.clone();
        if self.show_distance {
            first = format!("{} ({:.3})", first, annotation.distance);
        }
        let mut lines = vec![(first, NAME_SCALE)];
        if annotation.is_known {
            lines.push((format!("Age: {}", annotation.age), AGE_SCALE));
        }
        lines
    }

    fn text(&self, frame: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, scale: f32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(frame, color, x, y, PxScale::from(scale), font, text);
        }
    }
}

fn load_font(path: &Path) -> anyhow::Result<FontVec> {
    let data = std::fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
    FontVec::try_from_vec(data).map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))
}

fn draw_box(frame: &mut RgbImage, bbox: &FaceBox, color: Rgb<u8>) {
    if bbox.width == 0 || bbox.height == 0 {
        return;
    }
    for inset in 0..BOX_THICKNESS {
        let width = bbox.width as i32 - 2 * inset;
        let height = bbox.height as i32 - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(bbox.x as i32 + inset, bbox.y as i32 + inset)
            .of_size(width as u32, height as u32);
        draw_hollow_rect_mut(frame, rect, color);
    }
}

/// Top-left corners for `lines` stacked label lines: above the box, or
/// below it when they would leave the top of the frame.
pub fn label_origins(bbox: &FaceBox, lines: usize) -> Vec<(i32, i32)> {
    let block = lines as i32 * LINE_HEIGHT;
    let above = bbox.y as i32 - block - LABEL_GAP;
    let top = if above >= 0 {
        above
    } else {
        bbox.bottom() as i32 + LABEL_GAP
    };
    (0..lines)
        .map(|i| (bbox.x as i32, top + i as i32 * LINE_HEIGHT))
        .collect()
}

/// Blend the whole frame towards white.
pub fn flash(frame: &mut RgbImage) {
    for px in frame.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = (*c as f32 + (255.0 - *c as f32) * FLASH_ALPHA).round() as u8;
        }
    }
}
