//! # Query Module
//!
//! Read-only API for presentation layers (CLI today).
//!
//! Every call runs against the last committed state of the index and never
//! writes, so it is safe to use while a scan is in progress.

use crate::core::grouper::{DuplicateGroup, DuplicateGrouper};
use crate::core::store::{
    list_faces, list_observations, photos_by_ids, FaceRecord, IndexStore, PhotoFilter,
    PhotoRecord,
};
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A face cluster with the live photos it appears on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCluster {
    pub face: FaceRecord,
    /// Ascending photo ids; trashed and missing photos are left out
    pub photo_ids: Vec<i64>,
}

/// Read-only view over an [`IndexStore`]
#[derive(Clone, Copy)]
pub struct ArchiveQuery<'a> {
    store: &'a IndexStore,
}

impl<'a> ArchiveQuery<'a> {
    pub fn new(store: &'a IndexStore) -> Self {
        Self { store }
    }

    /// Records matching `filter`, sorted as it asks
    pub fn list_photos(&self, filter: &PhotoFilter) -> Result<Vec<PhotoRecord>, StoreError> {
        self.store.list(filter)
    }

    pub fn get_photo(&self, id: i64) -> Result<Option<PhotoRecord>, StoreError> {
        self.store.get(id)
    }

    pub fn get_by_path(&self, path: &Path) -> Result<Option<PhotoRecord>, StoreError> {
        self.store.get_by_path(path)
    }

    /// Exact groups, then near-duplicate groups at `threshold` bits.
    ///
    /// A threshold other than the one the labels were built with is
    /// computed in memory; nothing is persisted.
    pub fn get_duplicate_groups(&self, threshold: u32) -> Result<Vec<DuplicateGroup>, StoreError> {
        DuplicateGrouper::new(threshold).all_groups(self.store)
    }

    /// Every face cluster with its member photos, in id order
    pub fn get_face_clusters(&self) -> Result<Vec<FaceCluster>, StoreError> {
        self.store.read(|conn| {
            let faces = list_faces(conn)?;

            let mut photos_by_face: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
            for observation in list_observations(conn, None)? {
                photos_by_face
                    .entry(observation.face_id)
                    .or_default()
                    .insert(observation.photo_id);
            }

            let all_ids: Vec<i64> = photos_by_face
                .values()
                .flatten()
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let live: BTreeSet<i64> = photos_by_ids(conn, &all_ids)?
                .into_iter()
                .filter(PhotoRecord::is_live)
                .map(|p| p.id)
                .collect();

            Ok(faces
                .into_iter()
                .map(|face| {
                    let photo_ids = photos_by_face
                        .remove(&face.id)
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|id| live.contains(id))
                        .collect();
                    FaceCluster { face, photo_ids }
                })
                .collect())
        })
    }

    /// Records the next backup pass would pick up
    pub fn get_backup_queue(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        self.store.backup_queue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::faces::FaceClusterer;
    use crate::core::hasher::{hash_bytes, PerceptualHash};
    use crate::core::store::test_support::temp_store;
    use crate::core::store::NewPhoto;
    use crate::events::null_sender;

    fn add(store: &IndexStore, name: &str, bytes: &[u8], hash: u64) -> i64 {
        store
            .upsert(
                &NewPhoto::bare(
                    format!("/photos/{name}"),
                    bytes.len() as u64,
                    1,
                    &hash_bytes(bytes),
                )
                .with_perceptual_hash(PerceptualHash(hash)),
            )
            .unwrap()
            .id
    }

    #[test]
    fn duplicate_groups_follow_the_requested_threshold() {
        let (_dir, store) = temp_store();
        add(&store, "a.jpg", b"a", 0);
        add(&store, "b.jpg", b"b", 0b111);
        let query = ArchiveQuery::new(&store);

        assert!(query.get_duplicate_groups(2).unwrap().is_empty());
        let groups = query.get_duplicate_groups(3).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn face_clusters_list_member_photos() {
        let (_dir, store) = temp_store();
        let a = add(&store, "a.jpg", b"a", 1);
        let b = add(&store, "b.jpg", b"b", 2);
        let clusterer = FaceClusterer::default();
        clusterer
            .assign_incremental(&store, a, &[vec![1.0, 0.0]], &null_sender())
            .unwrap();
        clusterer
            .assign_incremental(&store, b, &[vec![0.99, 0.05], vec![0.0, 1.0]], &null_sender())
            .unwrap();

        let clusters = ArchiveQuery::new(&store).get_face_clusters().unwrap();

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].photo_ids, vec![a, b]);
        assert_eq!(clusters[1].photo_ids, vec![b]);
    }

    #[test]
    fn backup_queue_is_everything_not_backed_up() {
        let (_dir, store) = temp_store();
        add(&store, "a.jpg", b"a", 1);
        add(&store, "b.jpg", b"b", 2);
        assert_eq!(ArchiveQuery::new(&store).get_backup_queue().unwrap().len(), 2);
    }
}
