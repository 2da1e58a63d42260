//! Table definitions. Applied on every open; all statements are idempotent.

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    file_type TEXT NOT NULL DEFAULT 'image',
    size INTEGER NOT NULL,
    mtime_ns INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    perceptual_hash INTEGER,
    band0 INTEGER,
    band1 INTEGER,
    band2 INTEGER,
    band3 INTEGER,
    width INTEGER,
    height INTEGER,
    date_taken_ms INTEGER,
    date_source TEXT,
    latitude REAL,
    longitude REAL,
    is_document INTEGER NOT NULL DEFAULT 0,
    review_note TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    trash_path TEXT,
    deleted_at INTEGER,
    missing INTEGER NOT NULL DEFAULT 0,
    backup_status TEXT NOT NULL DEFAULT 'not_backed',
    backup_attempts INTEGER NOT NULL DEFAULT 0,
    backup_error TEXT,
    backed_up_at INTEGER,
    dup_group INTEGER,
    indexed_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_photos_live_path ON photos(path) WHERE deleted = 0;
CREATE INDEX IF NOT EXISTS idx_photos_content_hash ON photos(content_hash);
CREATE INDEX IF NOT EXISTS idx_photos_band0 ON photos(band0);
CREATE INDEX IF NOT EXISTS idx_photos_band1 ON photos(band1);
CREATE INDEX IF NOT EXISTS idx_photos_band2 ON photos(band2);
CREATE INDEX IF NOT EXISTS idx_photos_band3 ON photos(band3);
CREATE INDEX IF NOT EXISTS idx_photos_date_taken ON photos(date_taken_ms);
CREATE INDEX IF NOT EXISTS idx_photos_backup_status ON photos(backup_status);
CREATE INDEX IF NOT EXISTS idx_photos_dup_group ON photos(dup_group);

CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_label TEXT,
    centroid BLOB NOT NULL,
    member_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS face_observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL REFERENCES photos(id) ON DELETE CASCADE,
    face_id INTEGER NOT NULL REFERENCES faces(id),
    embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_observations_photo ON face_observations(photo_id);
CREATE INDEX IF NOT EXISTS idx_observations_face ON face_observations(face_id);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_runs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    roots TEXT NOT NULL,
    total INTEGER NOT NULL,
    added INTEGER NOT NULL,
    modified INTEGER NOT NULL,
    unchanged INTEGER NOT NULL,
    moved INTEGER NOT NULL,
    missing INTEGER NOT NULL,
    errors TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scan_runs_started ON scan_runs(started_at DESC);
";
