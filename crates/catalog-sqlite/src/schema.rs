pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE bridges (
  fingerprint     TEXT PRIMARY KEY,
  address         TEXT NOT NULL,
  port            INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
  transport       TEXT NOT NULL,
  first_seen_ms   INTEGER NOT NULL,
  last_seen_ms    INTEGER NOT NULL,
  sources_json    TEXT NOT NULL
);

CREATE TABLE sessions (
  session_id      TEXT PRIMARY KEY,
  operation       TEXT NOT NULL,
  started_at      INTEGER NOT NULL,
  finished_at     INTEGER,
  descriptor_count INTEGER DEFAULT 0,
  error_count     INTEGER DEFAULT 0
);

CREATE INDEX idx_bridges_seen ON bridges(last_seen_ms);

COMMIT;
"#
;
