//! Offline enrollment: turn `<images_dir>/<person>/*.jpg` folders into
//! persisted gallery units.

use std::path::{Path, PathBuf};

use facerec_vision::{
    augment::{augment, Variant},
    face::{crop_face, resize_for_embedding},
    Detection, Detector, Embedder,
};
use image::RgbImage;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gallery::UNKNOWN_AGE;
use crate::storage::{self, PersonUnit};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// What to do with an enrollment image in which several faces are detected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MultiFacePolicy {
    /// Reject the image.
    #[default]
    Single,
    /// Use the detector's first result.
    First,
}

/// Display name and age from the first `*.txt` file in `person_dir`.
///
/// Lines look like `NAME: Alice` and `AGE: 30`. A missing file or key
/// falls back to `folder` and "N/A".
pub fn read_person_info(person_dir: &Path, folder: &str) -> (String, String) {
    let fallback = || (folder.to_string(), UNKNOWN_AGE.to_string());

    let Ok(entries) = std::fs::read_dir(person_dir) else {
        return fallback();
    };
    let mut txt_files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    txt_files.sort();
    let Some(info_file) = txt_files.first() else {
        return fallback();
    };

    let contents = match std::fs::read_to_string(info_file) {
        Ok(contents) => contents,
        Err(e) => {
            error!("error reading info file {}: {}", info_file.display(), e);
            return fallback();
        }
    };

    let (mut name, mut age) = fallback();
    for line in contents.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("NAME:") {
            if !value.trim().is_empty() {
                name = value.trim().to_string();
            }
        } else if let Some(value) = line.strip_prefix("AGE:") {
            if !value.trim().is_empty() {
                age = value.trim().to_string();
            }
        }
    }
    (name, age)
}

/// Enrollment images in `person_dir`, sorted by file name.
pub fn image_files(person_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(person_dir).map_err(|e| Error::io(person_dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| {
                        IMAGE_EXTENSIONS
                            .iter()
                            .any(|known| ext.eq_ignore_ascii_case(known))
                    })
        })
        .collect();
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonSummary {
    pub folder_key: String,
    pub display_name: String,
    pub age: String,
    /// Images whose unmodified face crop was embedded.
    pub original_images: usize,
    pub embeddings: usize,
    /// Where the unit was written; `None` when nothing could be extracted.
    pub unit_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrollSummary {
    pub people: Vec<PersonSummary>,
}

impl EnrollSummary {
    pub fn original_images(&self) -> usize {
        self.people.iter().map(|p| p.original_images).sum()
    }

    pub fn total_embeddings(&self) -> usize {
        self.people.iter().map(|p| p.embeddings).sum()
    }

    /// Embeddings per original image, 0 when nothing was enrolled.
    pub fn augmentation_factor(&self) -> f32 {
        match self.original_images() {
            0 => 0.0,
            n => self.total_embeddings() as f32 / n as f32,
        }
    }
}

pub struct Enroller<D, E> {
    detector: D,
    embedder: E,
    augment: bool,
    policy: MultiFacePolicy,
}

impl<D: Detector, E: Embedder> Enroller<D, E> {
    pub fn new(detector: D, embedder: E) -> Self {
        Self {
            detector,
            embedder,
            augment: true,
            policy: MultiFacePolicy::default(),
        }
    }

    pub fn with_augmentation(mut self, augment: bool) -> Self {
        self.augment = augment;
        self
    }

    pub fn with_policy(mut self, policy: MultiFacePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enroll every person folder under `images_dir` into `gallery_dir`.
    pub fn enroll_all(&mut self, images_dir: &Path, gallery_dir: &Path) -> Result<EnrollSummary> {
        let mut summary = EnrollSummary::default();
        for (folder, dir) in storage::person_dirs(images_dir)? {
            summary.people.push(self.enroll_person(&folder, &dir, gallery_dir)?);
        }
        Ok(summary)
    }

    /// Enroll one person folder. A person with no usable face gets no unit.
    pub fn enroll_person(
        &mut self,
        folder: &str,
        person_dir: &Path,
        gallery_dir: &Path,
    ) -> Result<PersonSummary> {
        let (display_name, age) = read_person_info(person_dir, folder);
        info!("processing images for: {} (age: {})", display_name, age);

        let mut rows: Vec<Vec<f32>> = Vec::new();
        let mut original_images = 0;
        for path in image_files(person_dir)? {
            let Some(face) = self.face_crop(&path) else {
                continue;
            };
            for (variant, crop) in self.variants(face) {
                let input = resize_for_embedding(&crop, self.embedder.input_size());
                match self.embedder.embed(&input) {
                    Ok(embedding) => {
                        rows.push(embedding.vector.to_vec());
                        if variant == Variant::Original {
                            original_images += 1;
                        }
                    }
                    Err(e) => error!(
                        "dropping {:?} variant of {}: {:#}",
                        variant,
                        path.display(),
                        e
                    ),
                }
            }
        }

        let unit_path = if rows.is_empty() {
            warn!("no embeddings extracted for '{}'", folder);
            if storage::purge(gallery_dir, folder)? {
                warn!("removed the previous record for '{}'", folder);
            }
            None
        } else {
            let unit = PersonUnit::from_rows(folder, &display_name, &age, &rows)?;
            let path = storage::write_unit(gallery_dir, folder, &unit)?;
            info!(
                "saved {} embeddings for '{}' (age: {}) from {} original images",
                rows.len(),
                display_name,
                age,
                original_images
            );
            Some(path)
        };

        Ok(PersonSummary {
            folder_key: folder.to_string(),
            display_name,
            age,
            original_images,
            embeddings: rows.len(),
            unit_path,
        })
    }

    /// Load `path` and cut out the face chosen by the multi-face policy.
    fn face_crop(&mut self, path: &Path) -> Option<RgbImage> {
        let image = match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                warn!("could not read image {}: {}", path.display(), e);
                return None;
            }
        };
        let detections = match self.detector.detect(&image) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("detection failed on {}: {:#}", path.display(), e);
                return None;
            }
        };
        let detection = self.choose(path, &detections)?;
        match crop_face(&image, &detection.bbox) {
            Ok(face) => Some(face),
            Err(e) => {
                warn!("could not crop face in {}: {:#}", path.display(), e);
                None
            }
        }
    }

    fn choose<'a>(&self, path: &Path, detections: &'a [Detection]) -> Option<&'a Detection> {
        match (detections, self.policy) {
            ([], _) => {
                warn!("no face detected in {}", path.display());
                None
            }
            ([only], _) => Some(only),
            ([first, ..], MultiFacePolicy::First) => Some(first),
            (many, MultiFacePolicy::Single) => {
                warn!(
                    "{} faces detected in {}, skipping (multi_face_policy = single)",
                    many.len(),
                    path.display()
                );
                None
            }
        }
    }

    fn variants(&self, face: RgbImage) -> Vec<(Variant, RgbImage)> {
        if self.augment {
            augment(&face)
        } else {
            vec![(Variant::Original, face)]
        }
    }
}
