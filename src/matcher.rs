use std::collections::HashMap;

use crate::{
    error::{Error, Result},
    gallery::{Gallery, PersonRecord},
    Embedding,
};

pub use crate::config::DEFAULT_THRESHOLD;

/// Number of people reported by [`rank_people`].
pub const DIAGNOSTIC_TOP_K: usize = 5;

/// Outcome of matching one query against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched person, `None` when the nearest embedding is not under the threshold.
    pub folder_key: Option<String>,
    /// Distance to the nearest gallery embedding, reported even without a match.
    pub distance: f32,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.folder_key.is_some()
    }
}

fn check_query(query: &Embedding, gallery: &Gallery) -> Result<()> {
    match gallery.dim() {
        None => Err(Error::InvalidArgument(
            "cannot match against an empty gallery".to_string(),
        )),
        Some(dim) if dim != query.dim() => Err(Error::InvalidArgument(format!(
            "query has {} dimensions, gallery has {}",
            query.dim(),
            dim
        ))),
        Some(_) => Ok(()),
    }
}

/// Exhaustive nearest-neighbour search by Euclidean distance.
///
/// The globally closest embedding wins; on exact ties the earliest in
/// enrollment order is kept. It is a match iff its distance is `< threshold`.
pub fn find_best_match(query: &Embedding, gallery: &Gallery, threshold: f32) -> Result<MatchResult> {
    check_query(query, gallery)?;

    let mut best: Option<(&PersonRecord, f32)> = None;
    for entry in gallery.entries() {
        let distance = query.distance(entry.embedding);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((entry.person, distance));
        }
    }

    let (person, distance) = best.ok_or_else(|| {
        Error::InvalidArgument("cannot match against an empty gallery".to_string())
    })?;
    Ok(MatchResult {
        folder_key: (distance < threshold).then(|| person.folder_key.clone()),
        distance,
    })
}

/// One person's closest distance to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonDistance {
    pub folder_key: String,
    pub display_name: String,
    pub distance: f32,
    pub within_threshold: bool,
}

/// Per-person minimum distances, closest first, at most `top_k` people.
///
/// Used for interactive threshold tuning; the production decision is
/// [`find_best_match`].
pub fn rank_people(
    query: &Embedding,
    gallery: &Gallery,
    threshold: f32,
    top_k: usize,
) -> Result<Vec<PersonDistance>> {
    check_query(query, gallery)?;

    let mut nearest: HashMap<&str, (&PersonRecord, f32)> = HashMap::new();
    for entry in gallery.entries() {
        let distance = query.distance(entry.embedding);
        nearest
            .entry(entry.person.folder_key.as_str())
            .and_modify(|(_, d)| *d = d.min(distance))
            .or_insert((entry.person, distance));
    }

    let mut ranked: Vec<PersonDistance> = nearest
        .into_values()
        .map(|(person, distance)| PersonDistance {
            folder_key: person.folder_key.clone(),
            display_name: person.display_name.clone(),
            distance,
            within_threshold: distance < threshold,
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.folder_key.cmp(&b.folder_key))
    });
    ranked.truncate(top_k);
    Ok(ranked)
}
