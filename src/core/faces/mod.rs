//! # Faces Module
//!
//! Clusters face embeddings into persistent identity clusters.
//!
//! ## Approximate, Then Correct
//! - [`FaceClusterer::assign_incremental`]: each new embedding joins the
//!   nearest cluster within `assign_distance` (running-average centroid) or
//!   starts a new one. Cheap, but order dependent, so clusters drift.
//! - [`FaceClusterer::recluster_full`]: merges clusters whose centroids
//!   have drifted within `merge_distance` of each other. Run on request.
//!
//! Distances are cosine distances (`1 - cos θ`), in `[0, 2]`.
//!
//! Clusters are never deleted because their photos went away; a labelled
//! cluster keeps matching future photos of that person.

mod detector;

pub use detector::{FaceDetector, NoFaceDetector};

use crate::config::FaceSettings;
use crate::core::grouper::UnionFind;
use crate::core::store::{
    delete_face, insert_face, insert_observation, list_faces, move_observations, update_face,
    FaceRecord, IndexStore,
};
use crate::error::{ArchiveError, FaceError, StoreError};
use crate::events::{Event, EventSender, FaceEvent};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};

/// Reject embeddings that cannot be compared
pub fn validate_embedding(embedding: &[f32], expected: Option<usize>) -> Result<(), FaceError> {
    if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
        return Err(FaceError::InvalidEmbedding);
    }
    if embedding.iter().all(|v| *v == 0.0) {
        return Err(FaceError::InvalidEmbedding);
    }
    match expected {
        Some(expected) if expected != embedding.len() => Err(FaceError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        }),
        _ => Ok(()),
    }
}

/// Cosine distance between two embeddings of equal length
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, FaceError> {
    if a.len() != b.len() {
        return Err(FaceError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(FaceError::InvalidEmbedding);
    }

    let cosine = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    Ok((1.0 - cosine) as f32)
}

/// Fold `added` (with `added_count` members) into `centroid`
fn weighted_mean(centroid: &[f32], count: u32, added: &[f32], added_count: u32) -> Vec<f32> {
    let total = (count + added_count).max(1) as f32;
    centroid
        .iter()
        .zip(added)
        .map(|(c, a)| (c * count as f32 + a * added_count as f32) / total)
        .collect()
}

/// Outcome of one embedding assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceAssignment {
    pub face_id: i64,
    /// A new cluster was created for this embedding
    pub created: bool,
}

/// Outcome of [`FaceClusterer::recluster_full`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclusterOutcome {
    /// Clusters remaining afterwards
    pub clusters: usize,
    /// `(kept, removed)` pairs
    pub merges: Vec<(i64, i64)>,
}

/// Assigns embeddings to identity clusters
#[derive(Debug, Clone, Copy)]
pub struct FaceClusterer {
    assign_distance: f32,
    merge_distance: f32,
}

impl Default for FaceClusterer {
    fn default() -> Self {
        Self::from_settings(&FaceSettings::default())
    }
}

impl FaceClusterer {
    pub fn new(assign_distance: f32, merge_distance: f32) -> Self {
        Self {
            assign_distance,
            merge_distance,
        }
    }

    pub fn from_settings(settings: &FaceSettings) -> Self {
        Self::new(settings.assign_distance, settings.merge_distance)
    }

    /// Record the faces found on one photo, clustering each embedding.
    ///
    /// All assignments for the photo commit together.
    pub fn assign_incremental(
        &self,
        store: &IndexStore,
        photo_id: i64,
        embeddings: &[Vec<f32>],
        events: &EventSender,
    ) -> Result<Vec<FaceAssignment>, ArchiveError> {
        if embeddings.is_empty() {
            return Ok(Vec::new());
        }

        let expected = store
            .read(list_faces)?
            .first()
            .map(|face| face.embedding.len())
            .or_else(|| embeddings.first().map(Vec::len));
        for embedding in embeddings {
            validate_embedding(embedding, expected)?;
        }

        let assignments = store.write(|tx| self.assign_in(tx, photo_id, embeddings))?;
        for assignment in assignments.iter().filter(|a| a.created) {
            events.send(Event::Face(FaceEvent::ClusterCreated {
                face_id: assignment.face_id,
            }));
        }
        Ok(assignments)
    }

    /// Assignment against an open transaction; embeddings are already valid
    pub(crate) fn assign_in(
        &self,
        conn: &Connection,
        photo_id: i64,
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<FaceAssignment>, StoreError> {
        let mut faces = list_faces(conn)?;
        let mut assignments = Vec::with_capacity(embeddings.len());

        for embedding in embeddings {
            let nearest = faces
                .iter()
                .enumerate()
                .filter_map(|(index, face)| {
                    cosine_distance(&face.embedding, embedding)
                        .ok()
                        .map(|distance| (distance, index))
                })
                .min_by(|(a, _), (b, _)| a.total_cmp(b));

            let assignment = match nearest {
                Some((distance, index)) if distance <= self.assign_distance => {
                    let face = &mut faces[index];
                    face.embedding =
                        weighted_mean(&face.embedding, face.member_count, embedding, 1);
                    face.member_count += 1;
                    update_face(conn, face)?;
                    FaceAssignment {
                        face_id: face.id,
                        created: false,
                    }
                }
                _ => {
                    let id = insert_face(conn, embedding, 1, None)?;
                    faces.push(FaceRecord {
                        id,
                        person_label: None,
                        embedding: embedding.clone(),
                        member_count: 1,
                    });
                    FaceAssignment {
                        face_id: id,
                        created: true,
                    }
                }
            };

            insert_observation(conn, photo_id, assignment.face_id, embedding)?;
            assignments.push(assignment);
        }
        Ok(assignments)
    }

    /// Merge clusters whose centroids lie within `merge_distance`.
    ///
    /// Closest pairs merge first. Two clusters carrying different person
    /// labels are never merged, not even through a third cluster. The
    /// survivor is the lowest id and inherits any label.
    pub fn recluster_full(
        &self,
        store: &IndexStore,
        events: &EventSender,
    ) -> Result<ReclusterOutcome, StoreError> {
        let outcome = store.write(|tx| self.recluster_in(tx))?;

        for (kept, removed) in &outcome.merges {
            events.send(Event::Face(FaceEvent::ClustersMerged {
                kept: *kept,
                removed: *removed,
            }));
        }
        events.send(Event::Face(FaceEvent::ReclusterCompleted {
            clusters: outcome.clusters,
            merges: outcome.merges.len(),
        }));
        tracing::info!(
            clusters = outcome.clusters,
            merges = outcome.merges.len(),
            "face re-clustering finished"
        );
        Ok(outcome)
    }

    fn recluster_in(&self, conn: &Connection) -> Result<ReclusterOutcome, StoreError> {
        let faces = list_faces(conn)?;
        let by_id: HashMap<i64, &FaceRecord> = faces.iter().map(|f| (f.id, f)).collect();

        let mut pairs: Vec<(f32, i64, i64)> = Vec::new();
        for (i, a) in faces.iter().enumerate() {
            for b in &faces[i + 1..] {
                if let Ok(distance) = cosine_distance(&a.embedding, &b.embedding) {
                    if distance <= self.merge_distance {
                        pairs.push((distance, a.id, b.id));
                    }
                }
            }
        }
        pairs.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));

        let mut uf = UnionFind::new();
        let mut labels: HashMap<i64, Option<String>> = HashMap::new();
        for face in &faces {
            uf.insert(face.id);
            labels.insert(face.id, face.person_label.clone());
        }

        for (_, a, b) in pairs {
            let (root_a, root_b) = (uf.find(a), uf.find(b));
            if root_a == root_b {
                continue;
            }
            let label_a = labels.get(&root_a).cloned().flatten();
            let label_b = labels.get(&root_b).cloned().flatten();
            if let (Some(x), Some(y)) = (&label_a, &label_b) {
                if x != y {
                    continue;
                }
            }
            uf.union(a, b);
            let root = uf.find(a);
            labels.insert(root, label_a.or(label_b));
        }

        let sets: BTreeMap<i64, Vec<i64>> = uf.sets();
        let mut merges = Vec::new();

        for (survivor, members) in &sets {
            if members.len() < 2 {
                continue;
            }
            let Some(kept) = by_id.get(survivor) else {
                continue;
            };

            let mut merged = (*kept).clone();
            merged.person_label = labels.get(survivor).cloned().flatten();
            let mut weight = kept.member_count;

            for removed in members.iter().filter(|id| *id != survivor) {
                let Some(face) = by_id.get(removed) else {
                    continue;
                };
                // Clusters without members still count once
                merged.embedding = weighted_mean(
                    &merged.embedding,
                    weight.max(1),
                    &face.embedding,
                    face.member_count.max(1),
                );
                weight = weight.max(1) + face.member_count.max(1);
                merged.member_count += face.member_count;

                move_observations(conn, *removed, *survivor)?;
                delete_face(conn, *removed)?;
                merges.push((*survivor, *removed));
            }
            update_face(conn, &merged)?;
        }

        Ok(ReclusterOutcome {
            clusters: sets.len(),
            merges,
        })
    }
}
