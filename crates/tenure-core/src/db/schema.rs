//! Canonical `SQLite` schema for the attribute history.
//!
//! - `attribute_history` holds one row per validity interval. Dates are ISO
//!   `YYYY-MM-DD` text, so string comparison is date comparison.
//! - a partial unique index keeps at most one open row per key
//! - `run_meta` is a singleton row with the schema version and the resume
//!   cursor of the last committed date

/// Migration v1: history table, open-record guard, and run metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS attribute_history (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id TEXT NOT NULL CHECK (length(trim(entity_id)) > 0),
    attribute_type TEXT NOT NULL
        CHECK (attribute_type IN ('SECTOR', 'MARKET', 'NAME', 'DEPARTMENT', 'SHARES')),
    start_date TEXT NOT NULL CHECK (length(start_date) = 10),
    end_date TEXT CHECK (end_date IS NULL OR length(end_date) = 10),
    value TEXT,
    CHECK (end_date IS NULL OR end_date >= start_date)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_attribute_history_one_open
    ON attribute_history(entity_id, attribute_type)
    WHERE end_date IS NULL;

CREATE TABLE IF NOT EXISTS run_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_committed_date TEXT
);

INSERT OR IGNORE INTO run_meta (id, schema_version, last_committed_date)
VALUES (1, 0, NULL);
";

/// Migration v2: lookup indexes for `show`, `as-of` and range audits.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_attribute_history_key_start
    ON attribute_history(entity_id, attribute_type, start_date);

CREATE INDEX IF NOT EXISTS idx_attribute_history_type_start
    ON attribute_history(attribute_type, start_date);
";

/// Indexes every migrated database must carry.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_attribute_history_one_open",
    "idx_attribute_history_key_start",
    "idx_attribute_history_type_start",
];
