use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const UNIT_FILE: &str = "faces.bin";

/// One person's persisted embeddings and metadata, as written by enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonUnit {
    pub folder_key: Option<String>,
    pub name: Option<String>,
    pub age: Option<String>,
    /// One embedding per row.
    pub embeddings: Array2<f32>,
}

impl PersonUnit {
    pub fn from_rows(
        folder_key: &str,
        name: &str,
        age: &str,
        rows: &[Vec<f32>],
    ) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != dim) {
            return Err(Error::InvalidArgument(format!(
                "embeddings for '{}' have mixed dimensions",
                folder_key
            )));
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let embeddings = Array2::from_shape_vec((rows.len(), dim), flat)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Ok(Self {
            folder_key: Some(folder_key.to_string()),
            name: Some(name.to_string()),
            age: Some(age.to_string()),
            embeddings,
        })
    }
}

pub fn unit_path(gallery_dir: &Path, folder: &str) -> PathBuf {
    gallery_dir.join(folder).join(UNIT_FILE)
}

pub fn read_unit(path: &Path) -> Result<PersonUnit> {
    let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    postcard::from_bytes(&data).map_err(|source| Error::Codec {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `unit` to `<gallery_dir>/<folder>/faces.bin`, replacing any previous unit.
pub fn write_unit(gallery_dir: &Path, folder: &str, unit: &PersonUnit) -> Result<PathBuf> {
    let dir = gallery_dir.join(folder);
    std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    let path = dir.join(UNIT_FILE);
    let data = postcard::to_allocvec(unit).map_err(|source| Error::Codec {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, data).map_err(|e| Error::io(&path, e))?;
    Ok(path)
}

/// Person directories under `gallery_dir`, sorted by name.
pub fn person_dirs(gallery_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = std::fs::read_dir(gallery_dir).map_err(|e| Error::io(gallery_dir, e))?;
    let mut dirs: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Remove a person's unit directory. Returns whether anything was removed.
pub fn purge(gallery_dir: &Path, folder: &str) -> Result<bool> {
    if folder.is_empty() || folder.contains(['/', '\\']) || folder == "." || folder == ".." {
        return Err(Error::InvalidArgument(format!(
            "'{}' is not a person folder name",
            folder
        )));
    }
    let path = gallery_dir.join(folder);
    if !path.is_dir() {
        return Ok(false);
    }
    std::fs::remove_dir_all(&path).map_err(|e| Error::io(&path, e))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let unit =
            PersonUnit::from_rows("alice", "Alice", "30", &[vec![0.1, 0.2], vec![0.3, 0.4]])
                .unwrap();
        let path = write_unit(dir.path(), "alice", &unit).unwrap();
        assert_eq!(path, unit_path(dir.path(), "alice"));
        assert_eq!(read_unit(&path).unwrap(), unit);
    }

    #[test]
    fn test_from_rows_rejects_mixed_dims() {
        let err = PersonUnit::from_rows("bob", "Bob", "N/A", &[vec![0.1], vec![0.2, 0.3]]);
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_read_garbage_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(UNIT_FILE);
        std::fs::write(&path, [0xff, 0xff, 0xff]).unwrap();
        assert!(matches!(read_unit(&path), Err(Error::Codec { .. })));
    }

    #[test]
    fn test_person_dirs_sorted_and_skip_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zed", "amy", "mia"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let names: Vec<String> = person_dirs(dir.path())
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["amy", "mia", "zed"]);
    }

    #[test]
    fn test_purge() {
        let dir = tempfile::tempdir().unwrap();
        let unit = PersonUnit::from_rows("amy", "Amy", "N/A", &[vec![1.0]]).unwrap();
        write_unit(dir.path(), "amy", &unit).unwrap();
        assert!(purge(dir.path(), "amy").unwrap());
        assert!(!purge(dir.path(), "amy").unwrap());
        assert!(purge(dir.path(), "../etc").is_err());
    }
}
