use anyhow::Result;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array1;

/// Axis-aligned face box in pixel coordinates, always inside its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    /// Clip a raw detector box (x, y, w, h) to a `frame_width` x `frame_height` frame.
    ///
    /// Negative origins are clamped to zero. Returns `None` when nothing of the
    /// box is left inside the frame.
    pub fn clipped(raw: [f32; 4], frame_width: u32, frame_height: u32) -> Option<Self> {
        let [x, y, w, h] = raw;
        if !(x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite()) {
            return None;
        }
        let x0 = x.max(0.0).min(frame_width as f32);
        let y0 = y.max(0.0).min(frame_height as f32);
        let x1 = (x + w).max(0.0).min(frame_width as f32);
        let y1 = (y + h).max(0.0).min(frame_height as f32);

        let width = (x1 - x0) as u32;
        let height = (y1 - y0) as u32;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width,
            height,
        })
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// One face found by a [`Detector`].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: FaceBox,
    pub score: f32,
}

/// Face embedding produced by an [`Embedder`].
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    /// Euclidean distance to `other`. Both embeddings must share a dimension.
    pub fn distance(&self, other: &Embedding) -> f32 {
        debug_assert_eq!(self.dim(), other.dim(), "embedding dimensions differ");
        self.vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Finds faces in a frame.
pub trait Detector {
    /// Faces in `image`, possibly none. The first result may be treated as primary.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// Maps a face crop of the model's fixed size to an embedding.
pub trait Embedder {
    /// Side length of the square crop the model expects.
    fn input_size(&self) -> u32;

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding>;
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        (**self).detect(image)
    }
}

impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding> {
        (**self).embed(face)
    }
}

/// Cut `bbox` out of `image`, re-clamping it to the image bounds.
pub fn crop_face(image: &RgbImage, bbox: &FaceBox) -> Result<RgbImage> {
    let x = bbox.x.min(image.width());
    let y = bbox.y.min(image.height());
    let width = bbox.width.min(image.width() - x);
    let height = bbox.height.min(image.height() - y);
    if width == 0 || height == 0 {
        anyhow::bail!(
            "face box {}x{}+{}+{} lies outside the {}x{} frame",
            bbox.width,
            bbox.height,
            bbox.x,
            bbox.y,
            image.width(),
            image.height()
        );
    }
    Ok(image::imageops::crop_imm(image, x, y, width, height).to_image())
}

/// Resize a crop to the embedder's square input.
pub fn resize_for_embedding(face: &RgbImage, size: u32) -> RgbImage {
    if face.width() == size && face.height() == size {
        return face.clone();
    }
    image::imageops::resize(face, size, size, FilterType::Triangle)
}

/// Crop, resize and embed one detected face.
pub fn embed_face<E: Embedder + ?Sized>(
    embedder: &mut E,
    image: &RgbImage,
    bbox: &FaceBox,
) -> Result<Embedding> {
    let crop = crop_face(image, bbox)?;
    let input = resize_for_embedding(&crop, embedder.input_size());
    embedder.embed(&input)
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = ((x2 - x1) * (y2 - y1)) as f32;
    let area_a = (a.width * a.height) as f32;
    let area_b = (b.width * b.height) as f32;
    inter / (area_a + area_b - inter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: u32, y: u32, width: u32, height: u32) -> FaceBox {
        FaceBox {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn test_clipped_clamps_negative_origin() {
        let b = FaceBox::clipped([-10.0, -5.0, 50.0, 40.0], 100, 100).unwrap();
        assert_eq!(b, bbox(0, 0, 40, 35));
    }

    #[test]
    fn test_clipped_trims_to_frame() {
        let b = FaceBox::clipped([80.0, 90.0, 50.0, 50.0], 100, 100).unwrap();
        assert_eq!(b, bbox(80, 90, 20, 10));
    }

    #[test]
    fn test_clipped_outside_frame_is_none() {
        assert!(FaceBox::clipped([150.0, 10.0, 20.0, 20.0], 100, 100).is_none());
        assert!(FaceBox::clipped([10.0, 10.0, 0.0, 20.0], 100, 100).is_none());
        assert!(FaceBox::clipped([f32::NAN, 10.0, 5.0, 5.0], 100, 100).is_none());
    }

    #[test]
    fn test_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_crop_face_reclamps() {
        let img = RgbImage::new(20, 10);
        let crop = crop_face(&img, &bbox(15, 5, 10, 10)).unwrap();
        assert_eq!(crop.dimensions(), (5, 5));

        assert!(crop_face(&img, &bbox(20, 0, 5, 5)).is_err());
    }

    #[test]
    fn test_resize_for_embedding() {
        let img = RgbImage::new(37, 52);
        assert_eq!(resize_for_embedding(&img, 160).dimensions(), (160, 160));
    }

    #[test]
    fn test_iou() {
        let a = bbox(10, 10, 20, 20);
        let b = bbox(15, 15, 20, 20);
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        // No overlap
        let c = bbox(100, 100, 10, 10);
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            Detection {
                bbox: bbox(10, 10, 20, 20),
                score: 0.9,
            },
            Detection {
                bbox: bbox(12, 12, 20, 20),
                score: 0.8,
            },
            Detection {
                bbox: bbox(100, 100, 20, 20),
                score: 0.85,
            },
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2); // Should keep first and third
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }
}
