//! Enrollment-time augmentation of a face crop.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate, Interpolation};

/// Number of variants produced by [`augment`].
pub const VARIANT_COUNT: usize = 6;

const ROTATION_DEGREES: f32 = 5.0;

/// Which transformation produced an augmented crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Original,
    Mirrored,
    Brightened,
    Darkened,
    RotatedPositive,
    RotatedNegative,
}

impl Variant {
    /// Output order of [`augment`].
    pub const ALL: [Variant; VARIANT_COUNT] = [
        Variant::Original,
        Variant::Mirrored,
        Variant::Brightened,
        Variant::Darkened,
        Variant::RotatedPositive,
        Variant::RotatedNegative,
    ];

    pub fn apply(self, face: &RgbImage) -> RgbImage {
        match self {
            Variant::Original => face.clone(),
            Variant::Mirrored => image::imageops::flip_horizontal(face),
            Variant::Brightened => scale_abs(face, 1.2, 20.0),
            Variant::Darkened => scale_abs(face, 0.8, -20.0),
            Variant::RotatedPositive => rotate_about_center(face, ROTATION_DEGREES),
            Variant::RotatedNegative => rotate_about_center(face, -ROTATION_DEGREES),
        }
    }
}

/// Expand one face crop into six variants, always in this order: original,
/// horizontal mirror, brighter, darker, rotated +5 degrees, rotated -5 degrees.
pub fn augment(face: &RgbImage) -> Vec<(Variant, RgbImage)> {
    Variant::ALL.iter().map(|&v| (v, v.apply(face))).collect()
}

/// `saturate(|alpha * v + beta|)` on every channel.
pub fn scale_abs(face: &RgbImage, alpha: f32, beta: f32) -> RgbImage {
    let mut out = face.clone();
    for px in out.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = (alpha * *c as f32 + beta).abs().round().min(255.0) as u8;
        }
    }
    out
}

/// Rotate counter-clockwise by `degrees` about the crop center, keeping the
/// size and filling uncovered corners with black.
pub fn rotate_about_center(face: &RgbImage, degrees: f32) -> RgbImage {
    let center = ((face.width() / 2) as f32, (face.height() / 2) as f32);
    // imageproc rotates clockwise for positive angles.
    rotate(
        face,
        center,
        -degrees.to_radians(),
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
    )
}
