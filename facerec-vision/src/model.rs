use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::Array4;
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
    value::Value,
};

use crate::face::{self, Detection, Detector, Embedder, Embedding, FaceBox};
use crate::yunet;

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load_session(path: &Path, what: &str) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("{} model not found at {}", what, path.display());
    }
    let session = session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))?;
    log::debug!("loaded {} model from {}", what, path.display());
    Ok(session)
}

/// YuNet face detector running on ONNX Runtime.
pub struct YunetDetector {
    session: Session,
    score_threshold: f32,
    nms_threshold: f32,
}

impl YunetDetector {
    pub fn load(path: &Path, score_threshold: f32, nms_threshold: f32) -> Result<Self> {
        Ok(Self {
            session: load_session(path, "detector")?,
            score_threshold,
            nms_threshold,
        })
    }
}

impl Detector for YunetDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (input, letterbox) = yunet::prepare_input(image, yunet::INPUT_SIZE)?;
        let input_tensor = Value::from_array(input)?;
        let outputs = self.session.run(ort::inputs![input_tensor])?;

        let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
        for (_name, output) in outputs.iter() {
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            output_data.push((shape.iter().copied().collect(), data.to_vec()));
        }
        let output_refs: Vec<(&[i64], &[f32])> = output_data
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        let strides = yunet::parse_outputs(&output_refs, yunet::INPUT_SIZE as usize)
            .context("parsing detector outputs")?;
        let detections: Vec<Detection> =
            yunet::decode(&strides, self.score_threshold, yunet::INPUT_SIZE as usize)
                .into_iter()
                .filter_map(|raw| {
                    let bbox =
                        FaceBox::clipped(letterbox.unmap(raw.bbox), image.width(), image.height())?;
                    Some(Detection {
                        bbox,
                        score: raw.score,
                    })
                })
                .collect();

        Ok(face::nms(&detections, self.nms_threshold))
    }
}

/// Memory layout of the embedder's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, H, W, 3]`, the Keras FaceNet export.
    #[default]
    Nhwc,
    /// `[1, 3, H, W]`
    Nchw,
}

/// Face embedder running on ONNX Runtime.
///
/// Crops are standardised per image (zero mean, unit variance) and the
/// output is L2-normalised.
pub struct OnnxEmbedder {
    session: Session,
    input_size: u32,
    layout: TensorLayout,
}

impl OnnxEmbedder {
    pub fn load(path: &Path, input_size: u32, layout: TensorLayout) -> Result<Self> {
        Ok(Self {
            session: load_session(path, "embedder")?,
            input_size,
            layout,
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding> {
        if face.dimensions() != (self.input_size, self.input_size) {
            anyhow::bail!(
                "embedder expects {0}x{0} input, got {1}x{2}",
                self.input_size,
                face.width(),
                face.height()
            );
        }
        let input = standardize(face, self.layout)?;
        let input_tensor = Value::from_array(input)?;
        let outputs = self.session.run(ort::inputs![input_tensor])?;
        let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        Ok(Embedding::new(l2_normalize(data.to_vec())))
    }
}

/// Per-image standardisation into a float tensor of the requested layout.
pub fn standardize(face: &RgbImage, layout: TensorLayout) -> Result<Array4<f32>> {
    let (w, h) = (face.width() as usize, face.height() as usize);
    let raw = face.as_raw();
    let n = raw.len().max(1) as f32;
    let mean = raw.iter().map(|&v| v as f32).sum::<f32>() / n;
    let var = raw.iter().map(|&v| (v as f32 - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt().max(1.0 / n.sqrt());

    let values: Vec<f32> = raw.iter().map(|&v| (v as f32 - mean) / std).collect();
    let hwc = Array4::from_shape_vec((1, h, w, 3), values)?;
    Ok(match layout {
        TensorLayout::Nhwc => hwc,
        TensorLayout::Nchw => hwc.permuted_axes([0, 3, 1, 2]).as_standard_layout().to_owned(),
    })
}

pub fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|x| x / norm).collect()
    } else {
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardize_zero_mean() {
        let mut face = RgbImage::new(4, 4);
        for (i, p) in face.pixels_mut().enumerate() {
            *p = image::Rgb([(i * 10) as u8, 100, 200]);
        }
        let t = standardize(&face, TensorLayout::Nhwc).unwrap();
        assert_eq!(t.shape(), &[1, 4, 4, 3]);
        let mean = t.iter().sum::<f32>() / t.len() as f32;
        assert!(mean.abs() < 1e-4);
    }

    #[test]
    fn test_standardize_nchw_moves_channels() {
        let face = RgbImage::from_pixel(2, 2, image::Rgb([0, 0, 255]));
        let t = standardize(&face, TensorLayout::Nchw).unwrap();
        assert_eq!(t.shape(), &[1, 3, 2, 2]);
        assert!(t[[0, 2, 1, 1]] > 0.0);
        assert!(t[[0, 0, 1, 1]] < 0.0);
    }

    #[test]
    fn test_standardize_flat_image_is_finite() {
        let face = RgbImage::from_pixel(3, 3, image::Rgb([50, 50, 50]));
        let t = standardize(&face, TensorLayout::Nhwc).unwrap();
        assert!(t.iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
