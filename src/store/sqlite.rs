use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use flowbox_common::{Container, ContainerStatus, Flow, FlowStatus, NewContainer};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::RecordStore;

const CONTAINER_COLUMNS: &str = "id, type, name, image, status, local_id, local_dir, flow_id";

/// Async-safe SQLite record store.
///
/// Wraps `StoreDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<std::sync::Mutex<StoreDb>>,
}

impl SqliteStore {
    pub fn new(db: StoreDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(StoreDb::new(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(StoreDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&StoreDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    pub async fn create_flow(&self, status: FlowStatus) -> Result<Flow> {
        self.call(move |db| db.create_flow(status)).await
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create_container(&self, new: NewContainer) -> Result<Container> {
        self.call(move |db| db.create_container(&new)).await
    }

    async fn update_container_status(
        &self,
        id: i64,
        status: ContainerStatus,
    ) -> Result<Container> {
        self.call(move |db| db.update_container_status(id, status))
            .await
    }

    async fn update_container_status_local_id(
        &self,
        id: i64,
        status: ContainerStatus,
        local_id: &str,
    ) -> Result<Container> {
        let local_id = local_id.to_string();
        self.call(move |db| db.update_container_status_local_id(id, status, &local_id))
            .await
    }

    async fn update_container_image(&self, id: i64, image: &str) -> Result<Container> {
        let image = image.to_string();
        self.call(move |db| db.update_container_image(id, &image))
            .await
    }

    async fn get_container(&self, id: i64) -> Result<Option<Container>> {
        self.call(move |db| db.get_container(id)).await
    }

    async fn list_containers(&self) -> Result<Vec<Container>> {
        self.call(|db| db.list_containers()).await
    }

    async fn list_flow_containers(&self, flow_id: i64) -> Result<Vec<Container>> {
        self.call(move |db| db.list_flow_containers(flow_id)).await
    }

    async fn get_flow(&self, id: i64) -> Result<Option<Flow>> {
        self.call(move |db| db.get_flow(id)).await
    }

    async fn list_flows(&self) -> Result<Vec<Flow>> {
        self.call(|db| db.list_flows()).await
    }

    async fn update_flow_status(&self, id: i64, status: FlowStatus) -> Result<Flow> {
        self.call(move |db| db.update_flow_status(id, status)).await
    }
}

pub struct StoreDb {
    conn: Connection,
}

impl StoreDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS flows (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    status TEXT NOT NULL DEFAULT 'created',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS containers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    type TEXT NOT NULL DEFAULT 'primary',
                    name TEXT NOT NULL,
                    image TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'starting',
                    local_id TEXT NOT NULL DEFAULT '',
                    local_dir TEXT NOT NULL DEFAULT '',
                    flow_id INTEGER NOT NULL REFERENCES flows(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_containers_flow ON containers(flow_id);
                CREATE INDEX IF NOT EXISTS idx_containers_status ON containers(status);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Flows ─────────────────────────────────────────────────────────

    pub fn create_flow(&self, status: FlowStatus) -> Result<Flow> {
        self.conn
            .execute(
                "INSERT INTO flows (status) VALUES (?1)",
                params![status.as_str()],
            )
            .context("Failed to insert flow")?;
        let id = self.conn.last_insert_rowid();
        self.get_flow(id)?.context("Flow not found after insert")
    }

    pub fn get_flow(&self, id: i64) -> Result<Option<Flow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, status FROM flows WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("Failed to query flow")?;
        row.map(|(id, status)| flow_from_parts(id, &status))
            .transpose()
    }

    pub fn list_flows(&self) -> Result<Vec<Flow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, status FROM flows ORDER BY id")
            .context("Failed to prepare list_flows")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .context("Failed to query flows")?;
        let mut flows = Vec::new();
        for row in rows {
            let (id, status) = row.context("Failed to read flow row")?;
            flows.push(flow_from_parts(id, &status)?);
        }
        Ok(flows)
    }

    pub fn update_flow_status(&self, id: i64, status: FlowStatus) -> Result<Flow> {
        let changed = self
            .conn
            .execute(
                "UPDATE flows SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), id],
            )
            .context("Failed to update flow status")?;
        if changed == 0 {
            bail!("Flow {} not found", id);
        }
        self.get_flow(id)?
            .context("Flow not found after status update")
    }

    // ── Containers ────────────────────────────────────────────────────

    pub fn create_container(&self, new: &NewContainer) -> Result<Container> {
        self.conn
            .execute(
                "INSERT INTO containers (type, name, image, status, local_id, local_dir, flow_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new.container_type.as_str(),
                    new.name,
                    new.image,
                    new.status.as_str(),
                    new.local_id,
                    new.local_dir,
                    new.flow_id,
                ],
            )
            .context("Failed to insert container")?;
        let id = self.conn.last_insert_rowid();
        self.get_container(id)?
            .context("Container not found after insert")
    }

    pub fn get_container(&self, id: i64) -> Result<Option<Container>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM containers WHERE id = ?1", CONTAINER_COLUMNS),
                params![id],
                ContainerRow::from_row,
            )
            .optional()
            .context("Failed to query container")?;
        row.map(ContainerRow::into_container).transpose()
    }

    pub fn list_containers(&self) -> Result<Vec<Container>> {
        self.query_containers(
            &format!("SELECT {} FROM containers ORDER BY id", CONTAINER_COLUMNS),
            params![],
        )
    }

    pub fn list_flow_containers(&self, flow_id: i64) -> Result<Vec<Container>> {
        self.query_containers(
            &format!(
                "SELECT {} FROM containers WHERE flow_id = ?1 ORDER BY id",
                CONTAINER_COLUMNS
            ),
            params![flow_id],
        )
    }

    pub fn update_container_status(&self, id: i64, status: ContainerStatus) -> Result<Container> {
        let changed = self
            .conn
            .execute(
                "UPDATE containers SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), id],
            )
            .context("Failed to update container status")?;
        self.container_after_update(id, changed)
    }

    pub fn update_container_status_local_id(
        &self,
        id: i64,
        status: ContainerStatus,
        local_id: &str,
    ) -> Result<Container> {
        let changed = self
            .conn
            .execute(
                "UPDATE containers SET status = ?1, local_id = ?2, updated_at = datetime('now')
                 WHERE id = ?3",
                params![status.as_str(), local_id, id],
            )
            .context("Failed to update container status and local id")?;
        self.container_after_update(id, changed)
    }

    pub fn update_container_image(&self, id: i64, image: &str) -> Result<Container> {
        let changed = self
            .conn
            .execute(
                "UPDATE containers SET image = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![image, id],
            )
            .context("Failed to update container image")?;
        self.container_after_update(id, changed)
    }

    fn container_after_update(&self, id: i64, changed: usize) -> Result<Container> {
        if changed == 0 {
            bail!("Container {} not found", id);
        }
        self.get_container(id)?
            .context("Container not found after update")
    }

    fn query_containers(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Container>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare container query")?;
        let rows = stmt
            .query_map(params, ContainerRow::from_row)
            .context("Failed to query containers")?;
        let mut containers = Vec::new();
        for row in rows {
            containers.push(row.context("Failed to read container row")?.into_container()?);
        }
        Ok(containers)
    }
}

fn flow_from_parts(id: i64, status: &str) -> Result<Flow> {
    Ok(Flow {
        id,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
    })
}

struct ContainerRow {
    id: i64,
    container_type: String,
    name: String,
    image: String,
    status: String,
    local_id: String,
    local_dir: String,
    flow_id: i64,
}

impl ContainerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            container_type: row.get(1)?,
            name: row.get(2)?,
            image: row.get(3)?,
            status: row.get(4)?,
            local_id: row.get(5)?,
            local_dir: row.get(6)?,
            flow_id: row.get(7)?,
        })
    }

    fn into_container(self) -> Result<Container> {
        Ok(Container {
            id: self.id,
            container_type: self.container_type.parse().map_err(|e: String| anyhow!(e))?,
            name: self.name,
            image: self.image,
            status: self.status.parse().map_err(|e: String| anyhow!(e))?,
            local_id: self.local_id,
            local_dir: self.local_dir,
            flow_id: self.flow_id,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use flowbox_common::ContainerType;

    fn new_container(flow_id: i64, name: &str) -> NewContainer {
        NewContainer {
            container_type: ContainerType::Primary,
            name: name.to_string(),
            image: "debian:latest".to_string(),
            status: ContainerStatus::Starting,
            local_id: String::new(),
            local_dir: String::new(),
            flow_id,
        }
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = StoreDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('flows', 'containers')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 2, "Expected 2 tables to exist");
        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("flowbox.db");
        let flow_id = StoreDb::new(&path)?.create_flow(FlowStatus::Running)?.id;

        let reopened = StoreDb::new(&path)?;
        let flow = reopened.get_flow(flow_id)?.expect("flow should survive reopen");
        assert_eq!(flow.status, FlowStatus::Running);
        Ok(())
    }

    #[test]
    fn test_create_and_update_flow() -> Result<()> {
        let db = StoreDb::new_in_memory()?;
        let flow = db.create_flow(FlowStatus::Created)?;
        assert!(flow.id > 0);
        assert_eq!(flow.status, FlowStatus::Created);

        let updated = db.update_flow_status(flow.id, FlowStatus::Failed)?;
        assert_eq!(updated.status, FlowStatus::Failed);
        assert_eq!(db.list_flows()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_update_missing_flow_fails() -> Result<()> {
        let db = StoreDb::new_in_memory()?;
        let err = db.update_flow_status(99, FlowStatus::Failed).unwrap_err();
        assert!(err.to_string().contains("99"));
        Ok(())
    }

    #[test]
    fn test_container_status_and_local_id() -> Result<()> {
        let db = StoreDb::new_in_memory()?;
        let flow = db.create_flow(FlowStatus::Running)?;
        let container = db.create_container(&new_container(flow.id, "flowbox-terminal-1"))?;
        assert_eq!(container.status, ContainerStatus::Starting);
        assert!(container.local_id.is_empty());

        let running =
            db.update_container_status_local_id(container.id, ContainerStatus::Running, "abc123")?;
        assert_eq!(running.status, ContainerStatus::Running);
        assert_eq!(running.local_id, "abc123");

        let stopped = db.update_container_status(container.id, ContainerStatus::Stopped)?;
        assert_eq!(stopped.status, ContainerStatus::Stopped);
        assert_eq!(stopped.local_id, "abc123");

        let retagged = db.update_container_image(container.id, "alpine:3")?;
        assert_eq!(retagged.image, "alpine:3");
        Ok(())
    }

    #[test]
    fn test_update_missing_container_fails() -> Result<()> {
        let db = StoreDb::new_in_memory()?;
        assert!(db.update_container_status(7, ContainerStatus::Stopped).is_err());
        assert!(db.get_container(7)?.is_none());
        Ok(())
    }

    #[test]
    fn test_list_flow_containers_filters_by_flow() -> Result<()> {
        let db = StoreDb::new_in_memory()?;
        let a = db.create_flow(FlowStatus::Running)?;
        let b = db.create_flow(FlowStatus::Running)?;
        db.create_container(&new_container(a.id, "a-1"))?;
        db.create_container(&new_container(a.id, "a-2"))?;
        db.create_container(&new_container(b.id, "b-1"))?;

        assert_eq!(db.list_containers()?.len(), 3);
        let names: Vec<_> = db
            .list_flow_containers(a.id)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["a-1", "a-2"]);
        Ok(())
    }

    #[test]
    fn test_container_requires_existing_flow() -> Result<()> {
        let db = StoreDb::new_in_memory()?;
        assert!(db.create_container(&new_container(42, "orphan")).is_err());
        Ok(())
    }

    #[test]
    fn test_unknown_status_in_row_is_an_error() -> Result<()> {
        let db = StoreDb::new_in_memory()?;
        let flow = db.create_flow(FlowStatus::Running)?;
        db.conn.execute(
            "UPDATE flows SET status = 'paused' WHERE id = ?1",
            params![flow.id],
        )?;
        assert!(db.get_flow(flow.id).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_async_store_round_trip() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let flow = store.create_flow(FlowStatus::Waiting).await?;
        let container = store
            .create_container(new_container(flow.id, "flowbox-terminal-1"))
            .await?;
        let fetched = store.get_container(container.id).await?.expect("container");
        assert_eq!(fetched, container);
        assert_eq!(store.list_flows().await?, vec![flow]);
        Ok(())
    }
}
