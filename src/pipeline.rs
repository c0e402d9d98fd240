//! Per-frame detection, matching and the frame-skip annotation cache.

use facerec_vision::{
    face::{crop_face, resize_for_embedding},
    Detection, Detector, Embedder, Embedding, FaceBox,
};
use image::RgbImage;
use log::{debug, info, warn};

use crate::error::{Error, FaceStage, Result};
use crate::gallery::Gallery;
use crate::matcher::{self, DIAGNOSTIC_TOP_K};

pub const UNKNOWN_LABEL: &str = "Unknown";

/// Detection runs on every `N`th frame of a live camera.
pub const LIVE_DETECT_INTERVAL: u64 = 3;

/// Drawable result of recognising one face, reused on skipped frames.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFaceAnnotation {
    pub bbox: FaceBox,
    pub display_name: String,
    pub age: String,
    pub is_known: bool,
    pub distance: f32,
}

/// Whether frame number `frame_count` (counted from 1) runs detection.
pub fn is_detection_frame(frame_count: u64, interval: u64) -> bool {
    frame_count % interval.max(1) == 0
}

/// What [`FramePipeline::process`] did with one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_count: u64,
    pub detected: bool,
    /// Faces the detector reported, including failed ones.
    pub faces: usize,
    /// Faces dropped because crop, embed or match failed.
    pub failed_faces: usize,
}

pub struct FramePipeline<'g, D, E> {
    detector: D,
    embedder: E,
    gallery: &'g Gallery,
    threshold: f32,
    detect_interval: u64,
    diagnostic: bool,
    frame_count: u64,
    cache: Vec<CachedFaceAnnotation>,
}

impl<'g, D: Detector, E: Embedder> FramePipeline<'g, D, E> {
    pub fn new(detector: D, embedder: E, gallery: &'g Gallery, threshold: f32) -> Self {
        Self {
            detector,
            embedder,
            gallery,
            threshold,
            detect_interval: 1,
            diagnostic: false,
            frame_count: 0,
            cache: Vec::new(),
        }
    }

    /// Run detection only every `interval` frames (1 = every frame).
    pub fn with_detect_interval(mut self, interval: u64) -> Self {
        self.detect_interval = interval.max(1);
        self
    }

    /// Log the closest people for every face and keep distances for labels.
    pub fn with_diagnostics(mut self, diagnostic: bool) -> Self {
        self.diagnostic = diagnostic;
        self
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn detect_interval(&self) -> u64 {
        self.detect_interval
    }

    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic
    }

    /// Annotations to draw on the current frame.
    pub fn annotations(&self) -> &[CachedFaceAnnotation] {
        &self.cache
    }

    /// Count one acquired frame and, on detection frames, refresh the cache.
    ///
    /// On skipped frames the previous annotations are kept as they are. A
    /// detector failure keeps them too.
    pub fn process(&mut self, frame: &RgbImage) -> FrameReport {
        self.frame_count += 1;
        let mut report = FrameReport {
            frame_count: self.frame_count,
            detected: false,
            faces: 0,
            failed_faces: 0,
        };
        if !is_detection_frame(self.frame_count, self.detect_interval) {
            return report;
        }

        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("frame {}: detection failed: {:#}", self.frame_count, e);
                return report;
            }
        };
        report.detected = true;
        report.faces = detections.len();

        let mut annotations = Vec::with_capacity(detections.len());
        for (index, detection) in detections.iter().enumerate() {
            match self.recognize(frame, index, detection) {
                Ok(annotation) => annotations.push(annotation),
                Err(e) => {
                    warn!("frame {}: {}", self.frame_count, e);
                    report.failed_faces += 1;
                }
            }
        }
        self.cache = annotations;
        report
    }

    fn recognize(
        &mut self,
        frame: &RgbImage,
        index: usize,
        detection: &Detection,
    ) -> Result<CachedFaceAnnotation> {
        let per_face = |stage, source| Error::PerFace {
            index: index + 1,
            stage,
            source,
        };

        let crop = crop_face(frame, &detection.bbox).map_err(|e| per_face(FaceStage::Crop, e))?;
        let input = resize_for_embedding(&crop, self.embedder.input_size());
        let embedding = self
            .embedder
            .embed(&input)
            .map_err(|e| per_face(FaceStage::Embed, e))?;
        let result = matcher::find_best_match(&embedding, self.gallery, self.threshold)
            .map_err(|e| per_face(FaceStage::Match, e.into()))?;

        if self.diagnostic {
            self.log_ranking(index, &embedding);
        }

        let person = result
            .folder_key
            .as_deref()
            .and_then(|key| self.gallery.person(key));
        let annotation = match person {
            Some(person) => {
                debug!(
                    "frame {}: recognised {} (distance {:.3})",
                    self.frame_count, person.display_name, result.distance
                );
                CachedFaceAnnotation {
                    bbox: detection.bbox,
                    display_name: person.display_name.clone(),
                    age: person.age.clone(),
                    is_known: true,
                    distance: result.distance,
                }
            }
            None => {
                debug!(
                    "frame {}: unknown face (nearest distance {:.3})",
                    self.frame_count, result.distance
                );
                CachedFaceAnnotation {
                    bbox: detection.bbox,
                    display_name: UNKNOWN_LABEL.to_string(),
                    age: String::new(),
                    is_known: false,
                    distance: result.distance,
                }
            }
        };
        Ok(annotation)
    }

    fn log_ranking(&self, index: usize, embedding: &Embedding) {
        let ranked = match matcher::rank_people(
            embedding,
            self.gallery,
            self.threshold,
            DIAGNOSTIC_TOP_K,
        ) {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!("face {}: ranking failed: {}", index + 1, e);
                return;
            }
        };
        info!(
            "frame {} face {}: closest people (threshold {:.2})",
            self.frame_count,
            index + 1,
            self.threshold
        );
        for (rank, candidate) in ranked.iter().enumerate() {
            info!(
                "  {}. {} ({}): {:.4} {}",
                rank + 1,
                candidate.display_name,
                candidate.folder_key,
                candidate.distance,
                if candidate.within_threshold { "MATCH" } else { "-" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::{PersonRecord, UNKNOWN_AGE};

    struct ScriptedDetector {
        calls: usize,
        faces: Vec<FaceBox>,
        fail: bool,
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<Vec<Detection>> {
            self.calls += 1;
            if self.fail {
                anyhow::bail!("detector exploded");
            }
            Ok(self
                .faces
                .iter()
                .map(|&bbox| Detection { bbox, score: 0.9 })
                .collect())
        }
    }

    /// Embeds a crop as its mean red intensity; rejects crops with no red at all.
    struct RedEmbedder;

    impl Embedder for RedEmbedder {
        fn input_size(&self) -> u32 {
            4
        }

        fn embed(&mut self, face: &RgbImage) -> anyhow::Result<Embedding> {
            let n = face.pixels().len() as f32;
            if face.pixels().all(|p| p.0[0] < 10) {
                anyhow::bail!("unusable crop");
            }
            let red = face.pixels().map(|p| p.0[0] as f32 / 255.0).sum::<f32>() / n;
            Ok(Embedding::new(vec![red]))
        }
    }

    fn bbox(x: u32, y: u32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: 10,
            height: 10,
        }
    }

    /// Left half red, right half blue.
    fn frame() -> RgbImage {
        RgbImage::from_fn(40, 20, |x, _| {
            if x < 20 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        })
    }

    fn gallery() -> Gallery {
        Gallery::from_records([PersonRecord {
            folder_key: "alice".to_string(),
            display_name: "Alice".to_string(),
            age: "30".to_string(),
            embeddings: vec![Embedding::new(vec![0.95])],
        }])
        .unwrap()
    }

    #[test]
    fn test_detection_frames() {
        let ran: Vec<u64> = (1..=10).filter(|&n| is_detection_frame(n, 3)).collect();
        assert_eq!(ran, vec![3, 6, 9]);
        assert!((1..=5).all(|n| is_detection_frame(n, 1)));
    }

    #[test]
    fn test_known_face() {
        let g = gallery();
        let detector = ScriptedDetector {
            calls: 0,
            faces: vec![bbox(2, 2)],
            fail: false,
        };
        let mut pipeline = FramePipeline::new(detector, RedEmbedder, &g, 0.85);
        let report = pipeline.process(&frame());
        assert!(report.detected);
        let a = &pipeline.annotations()[0];
        assert!(a.is_known);
        assert_eq!(a.display_name, "Alice");
        assert_eq!(a.age, "30");
        assert!((a.distance - 0.05).abs() < 0.01);
    }

    #[test]
    fn test_failed_face_is_skipped() {
        let g = gallery();
        // Second box sits on the blue half, third straddles both halves.
        let detector = ScriptedDetector {
            calls: 0,
            faces: vec![bbox(2, 2), bbox(25, 2), bbox(15, 2)],
            fail: false,
        };
        let mut pipeline = FramePipeline::new(detector, RedEmbedder, &g, 0.3);
        let report = pipeline.process(&frame());
        assert_eq!(report.faces, 3);
        assert_eq!(report.failed_faces, 1);
        let faces = pipeline.annotations();
        assert_eq!(faces.len(), 2);
        assert!(faces[0].is_known);
        assert!(!faces[1].is_known);
        assert_eq!(faces[1].display_name, UNKNOWN_LABEL);
        assert_eq!(faces[1].bbox, bbox(15, 2));
    }

    #[test]
    fn test_cache_reused_on_skipped_frames() {
        let g = gallery();
        let detector = ScriptedDetector {
            calls: 0,
            faces: vec![bbox(2, 2)],
            fail: false,
        };
        let mut pipeline =
            FramePipeline::new(detector, RedEmbedder, &g, 0.85).with_detect_interval(3);

        let detected: Vec<bool> = (0..7).map(|_| pipeline.process(&frame()).detected).collect();
        assert_eq!(
            detected,
            vec![false, false, true, false, false, true, false]
        );
        assert_eq!(pipeline.detector.calls, 2);
        assert_eq!(pipeline.frame_count(), 7);
        assert_eq!(pipeline.annotations().len(), 1);
    }

    #[test]
    fn test_detector_failure_keeps_cache() {
        let g = gallery();
        let detector = ScriptedDetector {
            calls: 0,
            faces: vec![bbox(2, 2)],
            fail: false,
        };
        let mut pipeline = FramePipeline::new(detector, RedEmbedder, &g, 0.85);
        pipeline.process(&frame());
        pipeline.detector.fail = true;
        let report = pipeline.process(&frame());
        assert!(!report.detected);
        assert_eq!(pipeline.annotations().len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_is_per_face() {
        let g = Gallery::from_records([PersonRecord {
            folder_key: "wide".to_string(),
            display_name: "Wide".to_string(),
            age: UNKNOWN_AGE.to_string(),
            embeddings: vec![Embedding::new(vec![0.0, 0.0])],
        }])
        .unwrap();
        let detector = ScriptedDetector {
            calls: 0,
            faces: vec![bbox(2, 2)],
            fail: false,
        };
        let mut pipeline = FramePipeline::new(detector, RedEmbedder, &g, 0.85);
        let report = pipeline.process(&frame());
        assert!(report.detected);
        assert_eq!(report.failed_faces, 1);
        assert!(pipeline.annotations().is_empty());
    }
}
