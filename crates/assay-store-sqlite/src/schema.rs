//! SQL schema for the Assay SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Catalog ───────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS forms (
    form_id     TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    scope       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS categories (
    category_id TEXT PRIMARY KEY,
    form_id     TEXT NOT NULL REFERENCES forms(form_id),
    name        TEXT NOT NULL,
    sort_order  INTEGER NOT NULL DEFAULT 0,
    UNIQUE (form_id, name)
);

CREATE TABLE IF NOT EXISTS indicators (
    indicator_id     TEXT PRIMARY KEY,
    form_id          TEXT NOT NULL REFERENCES forms(form_id),
    category_id      TEXT REFERENCES categories(category_id),
    text             TEXT NOT NULL,
    assessor_type    TEXT NOT NULL,   -- 'manager' | 'hr' | 'executive'
    weight           REAL NOT NULL CHECK (weight > 0),
    rating_scale_max INTEGER NOT NULL CHECK (rating_scale_max BETWEEN 3 AND 10),
    guide            TEXT NOT NULL DEFAULT '{}',
    sort_order       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS indicators_form_idx ON indicators(form_id);

-- ── Inputs (append-only) ──────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS ratings (
    rating_id     TEXT PRIMARY KEY,
    indicator_id  TEXT NOT NULL REFERENCES indicators(indicator_id),
    assessor_type TEXT NOT NULL,
    rater_id      TEXT NOT NULL,
    subject_id    TEXT NOT NULL,
    cycle_id      TEXT NOT NULL,
    value         REAL NOT NULL,
    submitted_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ratings_subject_cycle_idx ON ratings(subject_id, cycle_id);
CREATE INDEX IF NOT EXISTS ratings_cycle_idx         ON ratings(cycle_id);
CREATE INDEX IF NOT EXISTS ratings_indicator_idx     ON ratings(indicator_id);

CREATE TABLE IF NOT EXISTS evidence (
    evidence_id  TEXT PRIMARY KEY,
    subject_id   TEXT NOT NULL,
    source_table TEXT NOT NULL,
    kind         TEXT NOT NULL,
    value_json   TEXT NOT NULL DEFAULT 'null',
    timestamp    TEXT NOT NULL,
    rater_id     TEXT,
    flagged_bias INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS evidence_subject_idx ON evidence(subject_id, timestamp);

-- ── Computed records (append-only except is_current) ──────────────────────

CREATE TABLE IF NOT EXISTS composite_scores (
    score_id      TEXT PRIMARY KEY,
    subject_id    TEXT NOT NULL,
    cycle_id      TEXT NOT NULL,
    overall_score REAL NOT NULL,
    sub_scores    TEXT NOT NULL,   -- JSON array of AssessorScore
    computed_band TEXT NOT NULL,
    band_override TEXT,            -- JSON BandOverride or NULL
    is_current    INTEGER NOT NULL,
    version       INTEGER NOT NULL,
    input_digest  TEXT NOT NULL,
    computed_at   TEXT NOT NULL,
    UNIQUE (subject_id, cycle_id, version)
);

-- At most one current record per subject and cycle.
CREATE UNIQUE INDEX IF NOT EXISTS composite_current_idx
    ON composite_scores(subject_id, cycle_id) WHERE is_current = 1;

CREATE TABLE IF NOT EXISTS gap_records (
    gap_id             TEXT PRIMARY KEY,
    subject_id         TEXT NOT NULL,
    cycle_id           TEXT NOT NULL,
    competency         TEXT NOT NULL,
    self_score         REAL NOT NULL,
    others_average     REAL NOT NULL,
    others_rater_count INTEGER NOT NULL,
    gap                REAL NOT NULL,
    classification     TEXT NOT NULL,
    input_digest       TEXT NOT NULL,
    computed_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS gap_subject_cycle_idx ON gap_records(subject_id, cycle_id, computed_at);

CREATE TABLE IF NOT EXISTS confidence_records (
    confidence_id       TEXT PRIMARY KEY,
    subject_id          TEXT NOT NULL,
    confidence_score    REAL NOT NULL,
    bias_risk_level     TEXT NOT NULL,
    source_count        INTEGER NOT NULL,
    signal_count        INTEGER NOT NULL,
    rater_count         INTEGER NOT NULL,
    data_freshness_days INTEGER NOT NULL,
    freshness           TEXT NOT NULL,
    input_digest        TEXT NOT NULL,
    computed_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS confidence_subject_idx  ON confidence_records(subject_id, computed_at);
CREATE INDEX IF NOT EXISTS confidence_computed_idx ON confidence_records(computed_at);

CREATE TABLE IF NOT EXISTS drift_snapshots (
    snapshot_id        TEXT PRIMARY KEY,
    key                TEXT NOT NULL,
    period_end         TEXT NOT NULL,
    baseline_avg       REAL NOT NULL,
    current_avg        REAL NOT NULL,
    drift_score        REAL NOT NULL,
    threshold_breached INTEGER NOT NULL,
    alert_raised       INTEGER NOT NULL,
    observations       INTEGER NOT NULL,
    computed_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS drift_key_idx ON drift_snapshots(key, period_end);

CREATE TABLE IF NOT EXISTS audit_log (
    entry_id    TEXT PRIMARY KEY,
    action      TEXT NOT NULL,
    actor       TEXT NOT NULL,   -- JSON Actor
    subject_id  TEXT,
    cycle_id    TEXT,
    record_id   TEXT,
    rationale   TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS audit_subject_idx ON audit_log(subject_id);

PRAGMA user_version = 1;
";
