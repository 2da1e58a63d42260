//! # Grouper Module
//!
//! Derives duplicate groups from the hashes in the index store.
//!
//! ## Two Passes
//! 1. **Exact**: records sharing a content hash (byte-identical files)
//! 2. **Near**: records whose perceptual hashes are within `threshold` bits,
//!    closed transitively with union-find. If A~B and B~C then {A, B, C}
//!    is one group even when A and C are further apart.
//!
//! ## Persisted Labels
//! Near-duplicate membership is written back as a `dup_group` label on each
//! record (the smallest id in its component). Singletons carry their own id,
//! so "unlabelled" means "not yet grouped".
//!
//! - [`DuplicateGrouper::assign_incremental`] labels only new records, one
//!   neighbourhood query each.
//! - [`DuplicateGrouper::recompute_full`] rebuilds every label. It runs when
//!   the threshold changed or when a removal may have split a group.
//!
//! Groups themselves are never authoritative state; they are read back from
//! the labels (or computed on the fly for an ad-hoc threshold).

mod union_find;

pub use union_find::UnionFind;

use crate::config::GroupingSettings;
use crate::core::hasher::PerceptualHash;
use crate::core::store::bands::BandIndex;
use crate::core::store::{
    clear_dup_groups, content_groups, dup_group_of, get_setting, labelled_groups, live_hashes,
    neighbours, photos_by_ids, relabel_dup_group, set_dup_group, set_setting, ungrouped_hashes,
    IndexStore, PhotoRecord, SETTING_GROUPS_DIRTY, SETTING_GROUP_THRESHOLD,
};
use crate::error::StoreError;
use crate::events::{Event, EventSender, GroupEvent};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// How the members of a group relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Byte-identical content
    Exact,
    /// Perceptual hashes within the threshold (transitively)
    Near,
}

/// A set of duplicate records with one representative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub kind: GroupKind,
    /// Smallest member id
    pub label: i64,
    /// Member ids, ascending
    pub members: Vec<i64>,
    pub representative: i64,
    /// Shared digest for exact groups
    pub content_hash: Option<String>,
}

/// What an [`DuplicateGrouper::update`] run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupingOutcome {
    /// Whether every label was rebuilt
    pub full: bool,
    /// Records (re)labelled
    pub labelled: usize,
    /// Near-duplicate groups with two or more members afterwards
    pub groups: usize,
    pub grouped_photos: usize,
}

/// Pick the record to keep: highest resolution, then earliest capture
/// time, then lowest id. Records without a capture time sort last.
pub fn choose_representative(records: &[PhotoRecord]) -> Option<i64> {
    records
        .iter()
        .min_by_key(|r| {
            (
                Reverse(r.resolution()),
                r.date_taken.is_none(),
                r.date_taken,
                r.id,
            )
        })
        .map(|r| r.id)
}

/// Connected components of the "within `threshold` bits" relation.
///
/// Every input id appears in exactly one component, keyed by its smallest id.
pub fn cluster_hashes(
    entries: Vec<(i64, PerceptualHash)>,
    threshold: u32,
) -> BTreeMap<i64, Vec<i64>> {
    let index = BandIndex::build(entries);
    let mut uf = UnionFind::new();

    for (id, hash) in index.entries() {
        uf.insert(*id);
        for other in index.neighbours(*hash, threshold) {
            if other != *id {
                uf.union(*id, other);
            }
        }
    }
    uf.sets()
}

/// Builds and reads duplicate groups for one threshold
#[derive(Debug, Clone, Copy)]
pub struct DuplicateGrouper {
    threshold: u32,
}

impl DuplicateGrouper {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn from_settings(settings: &GroupingSettings) -> Self {
        Self::new(settings.threshold)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether the persisted labels were built with this threshold and no
    /// removal has invalidated them since
    fn labels_are_current(&self, conn: &Connection) -> Result<bool, StoreError> {
        let stored = get_setting(conn, SETTING_GROUP_THRESHOLD)?;
        let dirty = get_setting(conn, SETTING_GROUPS_DIRTY)?;
        Ok(stored.as_deref() == Some(self.threshold.to_string().as_str())
            && dirty.as_deref() != Some("1"))
    }

    /// Bring the persisted labels up to date, incrementally when possible
    pub fn update(
        &self,
        store: &IndexStore,
        events: &EventSender,
    ) -> Result<GroupingOutcome, StoreError> {
        let (current, pending) = store.read(|conn| {
            Ok((self.labels_are_current(conn)?, ungrouped_hashes(conn)?.len()))
        })?;
        match (current, pending) {
            (false, _) => self.recompute_full(store, events),
            // Nothing new: leave the store untouched
            (true, 0) => self.finish(store, events, false, 0),
            (true, _) => self.assign_incremental(store, events),
        }
    }

    /// Label records that have no near-duplicate label yet.
    ///
    /// Each one joins (and merges) the groups of its neighbours. Removals are
    /// not handled here; they mark the labels dirty for a full recompute.
    pub fn assign_incremental(
        &self,
        store: &IndexStore,
        events: &EventSender,
    ) -> Result<GroupingOutcome, StoreError> {
        let threshold = self.threshold;
        let labelled = store.write(|tx| {
            let pending = ungrouped_hashes(tx)?;
            events.send(Event::Group(GroupEvent::Started {
                photos: pending.len(),
                full: false,
            }));

            for (id, hash) in &pending {
                let mut label = *id;
                let mut joined = Vec::new();
                for (other, _) in neighbours(tx, *hash, threshold)? {
                    if other == *id {
                        continue;
                    }
                    if let Some(existing) = dup_group_of(tx, other)? {
                        label = label.min(existing);
                        joined.push(existing);
                    }
                }
                for existing in joined {
                    if existing != label {
                        relabel_dup_group(tx, existing, label)?;
                    }
                }
                set_dup_group(tx, *id, Some(label))?;
            }
            Ok(pending.len())
        })?;

        tracing::debug!(labelled, threshold, "incremental grouping finished");
        self.finish(store, events, false, labelled)
    }

    /// Rebuild every label from scratch
    pub fn recompute_full(
        &self,
        store: &IndexStore,
        events: &EventSender,
    ) -> Result<GroupingOutcome, StoreError> {
        let threshold = self.threshold;
        let labelled = store.write(|tx| {
            let entries = live_hashes(tx)?;
            events.send(Event::Group(GroupEvent::Started {
                photos: entries.len(),
                full: true,
            }));

            let count = entries.len();
            let components = cluster_hashes(entries, threshold);
            clear_dup_groups(tx)?;
            for (label, members) in &components {
                for id in members {
                    set_dup_group(tx, *id, Some(*label))?;
                }
            }
            set_setting(tx, SETTING_GROUP_THRESHOLD, &threshold.to_string())?;
            set_setting(tx, SETTING_GROUPS_DIRTY, "0")?;
            Ok(count)
        })?;

        tracing::info!(labelled, threshold, "rebuilt near-duplicate groups");
        self.finish(store, events, true, labelled)
    }

    fn finish(
        &self,
        store: &IndexStore,
        events: &EventSender,
        full: bool,
        labelled: usize,
    ) -> Result<GroupingOutcome, StoreError> {
        let groups = store.read(labelled_groups)?;
        let grouped_photos = groups.iter().map(|(_, members)| members.len()).sum();
        events.send(Event::Group(GroupEvent::Completed {
            groups: groups.len(),
            grouped_photos,
        }));
        Ok(GroupingOutcome {
            full,
            labelled,
            groups: groups.len(),
            grouped_photos,
        })
    }

    /// Byte-identical groups among live records
    pub fn exact_groups(&self, store: &IndexStore) -> Result<Vec<DuplicateGroup>, StoreError> {
        store.read(|conn| {
            content_groups(conn)?
                .into_iter()
                .map(|group| {
                    build_group(conn, GroupKind::Exact, group.ids, Some(group.content_hash))
                })
                .collect()
        })
    }

    /// Near-duplicate groups for this threshold.
    ///
    /// Reads the persisted labels when they are current; otherwise computes
    /// the components in memory without writing anything.
    pub fn near_groups(&self, store: &IndexStore) -> Result<Vec<DuplicateGroup>, StoreError> {
        store.read(|conn| {
            let components: Vec<Vec<i64>> = if self.labels_are_current(conn)? {
                labelled_groups(conn)?
                    .into_iter()
                    .map(|(_, members)| members)
                    .collect()
            } else {
                cluster_hashes(live_hashes(conn)?, self.threshold)
                    .into_values()
                    .filter(|members| members.len() > 1)
                    .collect()
            };

            components
                .into_iter()
                .map(|members| build_group(conn, GroupKind::Near, members, None))
                .collect()
        })
    }

    /// Exact groups followed by near-duplicate groups
    pub fn all_groups(&self, store: &IndexStore) -> Result<Vec<DuplicateGroup>, StoreError> {
        let mut groups = self.exact_groups(store)?;
        groups.extend(self.near_groups(store)?);
        Ok(groups)
    }
}

fn build_group(
    conn: &Connection,
    kind: GroupKind,
    members: Vec<i64>,
    content_hash: Option<String>,
) -> Result<DuplicateGroup, StoreError> {
    let records = photos_by_ids(conn, &members)?;
    let label = members.iter().copied().min().unwrap_or_default();
    let representative = choose_representative(&records).unwrap_or(label);
    Ok(DuplicateGroup {
        kind,
        label,
        members,
        representative,
        content_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_support::temp_store;
    use crate::core::store::{NewPhoto, PhotoChange};
    use crate::events::null_sender;
    use chrono::{TimeZone, Utc};

    fn add(store: &IndexStore, name: &str, hash: u64) -> i64 {
        store
            .upsert(
                &NewPhoto::bare(format!("/p/{name}.jpg"), 1, 1, name)
                    .with_perceptual_hash(PerceptualHash(hash)),
            )
            .unwrap()
            .id
    }

    fn record(id: i64, w: u32, h: u32, year: Option<i32>) -> PhotoRecord {
        let mut photo = NewPhoto::bare(format!("/p/{id}.jpg"), 1, 1, "h");
        photo.width = Some(w);
        photo.height = Some(h);
        photo.date_taken = year.map(|y| Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).unwrap());
        PhotoRecord {
            id,
            path: photo.path,
            file_type: "image".into(),
            size: 1,
            mtime_ns: 1,
            content_hash: photo.content_hash,
            perceptual_hash: None,
            width: photo.width,
            height: photo.height,
            date_taken: photo.date_taken,
            date_source: None,
            location: None,
            is_document: false,
            face_ids: Default::default(),
            deleted: false,
            trash_path: None,
            missing: false,
            backup_status: crate::core::store::BackupStatus::NotBacked,
            backup_attempts: 0,
            backup_error: None,
            review_note: None,
            dup_group: None,
        }
    }

    #[test]
    fn representative_prefers_resolution_then_date_then_id() {
        let records = vec![
            record(1, 100, 100, Some(2020)),
            record(2, 200, 200, Some(2021)),
            record(3, 200, 200, Some(2019)),
            record(4, 200, 200, Some(2019)),
        ];
        assert_eq!(choose_representative(&records), Some(3));

        let undated = vec![record(5, 10, 10, None), record(6, 10, 10, Some(2000))];
        assert_eq!(choose_representative(&undated), Some(6));
        assert_eq!(choose_representative(&[]), None);
    }

    #[test]
    fn clustering_is_transitive_and_bounded() {
        let base = 0u64;
        let components = cluster_hashes(
            vec![
                (1, PerceptualHash(base)),
                // 8 bits from 1
                (2, PerceptualHash(base ^ 0xFF)),
                // 8 bits from 2, 16 from 1
                (3, PerceptualHash(base ^ 0xFFFF)),
                (4, PerceptualHash(!base)),
            ],
            8,
        );
        assert_eq!(components[&1], vec![1, 2, 3]);
        assert_eq!(components[&4], vec![4]);
    }

    #[test]
    fn incremental_matches_full_recompute() {
        let (_dir, store) = temp_store();
        let grouper = DuplicateGrouper::new(8);
        let events = null_sender();

        add(&store, "a", 0);
        add(&store, "far", u64::MAX);
        let first = grouper.update(&store, &events).unwrap();
        assert!(first.full);
        assert_eq!(first.groups, 0);

        // A bridge between two existing singletons
        add(&store, "b", 0xFFFF);
        add(&store, "bridge", 0xFF);
        let second = grouper.update(&store, &events).unwrap();
        assert!(!second.full);
        assert_eq!(second.labelled, 2);

        let incremental = grouper.near_groups(&store).unwrap();
        grouper.recompute_full(&store, &events).unwrap();
        let full = grouper.near_groups(&store).unwrap();

        assert_eq!(incremental, full);
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].members.len(), 3);
    }

    #[test]
    fn threshold_change_forces_full_recompute() {
        let (_dir, store) = temp_store();
        let events = null_sender();
        add(&store, "a", 0);
        add(&store, "b", 0b1111);

        DuplicateGrouper::new(8).update(&store, &events).unwrap();
        let strict = DuplicateGrouper::new(2).update(&store, &events).unwrap();

        assert!(strict.full);
        assert_eq!(strict.groups, 0);
    }

    #[test]
    fn removal_splits_groups_on_next_update() {
        let (_dir, store) = temp_store();
        let grouper = DuplicateGrouper::new(8);
        let events = null_sender();
        add(&store, "a", 0);
        let bridge = add(&store, "bridge", 0xFF);
        add(&store, "b", 0xFFFF);
        assert_eq!(grouper.update(&store, &events).unwrap().grouped_photos, 3);

        store.apply(&[PhotoChange::MarkMissing { id: bridge }]).unwrap();
        let after = grouper.update(&store, &events).unwrap();

        assert!(after.full);
        assert_eq!(after.groups, 0);
    }

    #[test]
    fn ad_hoc_threshold_reads_without_writing() {
        let (_dir, store) = temp_store();
        add(&store, "a", 0);
        add(&store, "b", 0b111);
        DuplicateGrouper::new(2).update(&store, &null_sender()).unwrap();

        let loose = DuplicateGrouper::new(8).near_groups(&store).unwrap();
        assert_eq!(loose.len(), 1);
        assert_eq!(store.setting(SETTING_GROUP_THRESHOLD).unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn exact_groups_pick_a_representative() {
        let (_dir, store) = temp_store();
        let a = store.upsert(&NewPhoto::bare("/p/a.jpg", 1, 1, "same")).unwrap().id;
        let b = store.upsert(&NewPhoto::bare("/p/b.jpg", 1, 1, "same")).unwrap().id;

        let groups = DuplicateGrouper::new(8).exact_groups(&store).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec![a, b]);
        assert_eq!(groups[0].representative, a);
        assert_eq!(groups[0].kind, GroupKind::Exact);
    }
}
