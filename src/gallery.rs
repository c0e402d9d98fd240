//! In-memory gallery of enrolled people.
//!
//! Every persisted unit is normalised once, here, into a [`PersonRecord`]
//! with a canonical folder key, display name and age. Nothing downstream
//! falls back between metadata fields.

use std::collections::HashMap;
use std::path::Path;

use facerec_vision::Embedding;
use log::{info, warn};

use crate::error::{Error, Result};
use crate::storage::{self, PersonUnit};

pub const UNKNOWN_AGE: &str = "N/A";

/// One enrolled identity.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    pub folder_key: String,
    pub display_name: String,
    pub age: String,
    pub embeddings: Vec<Embedding>,
}

/// Gallery entry: one embedding and the person it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub embedding: &'a Embedding,
    pub person: &'a PersonRecord,
}

/// Read-only index of every enrolled embedding.
///
/// Built once per session and never mutated afterwards, so it can be shared
/// by reference across every match call.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    people: Vec<PersonRecord>,
    by_key: HashMap<String, usize>,
}

impl Gallery {
    /// Load every person unit under `root`, in sorted directory order.
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::GalleryNotFound(root.to_path_buf()));
        }

        let mut gallery = Gallery::default();
        for (dir_name, dir) in storage::person_dirs(root)? {
            let path = dir.join(storage::UNIT_FILE);
            if !path.exists() {
                continue;
            }
            let unit = match storage::read_unit(&path) {
                Ok(unit) => unit,
                Err(e) => {
                    warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            match gallery.admit(&dir_name, unit) {
                Ok(person) => info!(
                    "loaded {} embeddings for '{}' (age: {})",
                    person.embeddings.len(),
                    person.display_name,
                    person.age
                ),
                Err(reason) => warn!("skipping {}: {}", path.display(), reason),
            }
        }

        if gallery.is_empty() {
            return Err(Error::EmptyGallery(root.to_path_buf()));
        }
        info!(
            "total loaded: {} embeddings from {} people",
            gallery.len(),
            gallery.people.len()
        );
        Ok(gallery)
    }

    /// Build a gallery from records already in memory.
    pub fn from_records(records: impl IntoIterator<Item = PersonRecord>) -> Result<Self> {
        let mut gallery = Gallery::default();
        for record in records {
            if record.embeddings.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "person '{}' has no embeddings",
                    record.folder_key
                )));
            }
            if gallery.by_key.contains_key(&record.folder_key) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate folder key '{}'",
                    record.folder_key
                )));
            }
            let dim = gallery.dim().unwrap_or(record.embeddings[0].dim());
            if record.embeddings.iter().any(|e| e.dim() != dim) {
                return Err(Error::InvalidArgument(format!(
                    "person '{}' has embeddings of a different dimension than {}",
                    record.folder_key, dim
                )));
            }
            gallery.insert(record);
        }
        Ok(gallery)
    }

    fn admit(&mut self, dir_name: &str, unit: PersonUnit) -> std::result::Result<&PersonRecord, String> {
        let record = normalize(dir_name, unit, |key| self.by_key.contains_key(key))?;
        if let Some(dim) = self.dim() {
            let got = record.embeddings[0].dim();
            if got != dim {
                return Err(format!("embedding dimension {} differs from gallery's {}", got, dim));
            }
        }
        Ok(self.insert(record))
    }

    fn insert(&mut self, record: PersonRecord) -> &PersonRecord {
        self.by_key
            .insert(record.folder_key.clone(), self.people.len());
        self.people.push(record);
        &self.people[self.people.len() - 1]
    }

    /// Total number of embeddings.
    pub fn len(&self) -> usize {
        self.people.iter().map(|p| p.embeddings.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Embedding dimension shared by every entry.
    pub fn dim(&self) -> Option<usize> {
        self.people
            .first()
            .and_then(|p| p.embeddings.first())
            .map(Embedding::dim)
    }

    pub fn people(&self) -> &[PersonRecord] {
        &self.people
    }

    pub fn person(&self, folder_key: &str) -> Option<&PersonRecord> {
        self.by_key.get(folder_key).map(|&i| &self.people[i])
    }

    /// Every embedding in enrollment order.
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        self.people.iter().flat_map(|person| {
            person
                .embeddings
                .iter()
                .map(move |embedding| Entry { embedding, person })
        })
    }
}

/// Canonicalise a persisted unit.
///
/// The folder key is the unit's explicit key when present, non-blank and
/// not yet taken, else the directory name. Display name falls back to the
/// folder key and age to "N/A".
fn normalize(
    dir_name: &str,
    unit: PersonUnit,
    taken: impl Fn(&str) -> bool,
) -> std::result::Result<PersonRecord, String> {
    let explicit = unit
        .folder_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());
    let folder_key = match explicit {
        Some(key) if !taken(key) => key.to_string(),
        Some(key) => {
            warn!(
                "folder key '{}' in {} is already loaded, using directory name",
                key, dir_name
            );
            dir_name.to_string()
        }
        None => dir_name.to_string(),
    };
    if taken(&folder_key) {
        return Err(format!("folder key '{}' is already loaded", folder_key));
    }

    let embeddings: Vec<Embedding> = unit
        .embeddings
        .rows()
        .into_iter()
        .map(|row| Embedding::new(row.to_vec()))
        .collect();
    if embeddings.is_empty() || embeddings[0].dim() == 0 {
        return Err("unit holds no embeddings".to_string());
    }

    let display_name = unit
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| folder_key.clone());
    let age = unit
        .age
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_AGE.to_string());

    Ok(PersonRecord {
        folder_key,
        display_name,
        age,
        embeddings,
    })
}
