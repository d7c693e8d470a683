use rusqlite::Connection;

/// Initial schema. Timestamps are RFC 3339 UTC strings with microsecond
/// precision, so text ordering equals chronological ordering.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    team_id     TEXT NOT NULL,               -- UUID v4
    title       TEXT NOT NULL,
    description TEXT,
    status      TEXT NOT NULL CHECK (status IN ('Active', 'Completed', 'Archived')),
    tags        TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_projects_team ON projects(team_id, created_at);

CREATE TABLE IF NOT EXISTS tasks (
    id          TEXT PRIMARY KEY NOT NULL,
    project_id  TEXT NOT NULL,               -- FK -> projects(id)
    title       TEXT NOT NULL,
    description TEXT,
    status      TEXT NOT NULL CHECK (status IN
                    ('Not Started', 'Started', 'In Progress', 'Pending', 'Completed')),
    assigned_to TEXT,                        -- auth user id
    due_date    TEXT,                        -- YYYY-MM-DD
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,

    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id, created_at);

CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,
    sender_id   TEXT NOT NULL,
    receiver_id TEXT,
    project_id  TEXT,                        -- NULL = global channel
    message     TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_project ON messages(project_id, created_at);

CREATE TABLE IF NOT EXISTS profiles (
    id          TEXT PRIMARY KEY NOT NULL,   -- same id as auth_users(id)
    username    TEXT,
    phone       TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS auth_users (
    id            TEXT PRIMARY KEY NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_salt TEXT NOT NULL,             -- hex
    password_hash TEXT NOT NULL,             -- hex BLAKE3 derive_key output
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS preferences (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
