use std::str::FromStr;

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

use crate::{
    db,
    error::{ErrorKind, STEP8_ACTIVE_EXISTS, STEP8_DECODE_ERROR},
    id::new_uuid_v7,
    model_step8::{
        validate_user_id, AmendsEntry, EntryChanges, EntryDraft, EntryPatch, Inventory,
        InventoryStatus, NewAmendsEntry, Priority, Progress, WillingnessStatus,
    },
    step8_report::{handoff_entries, AmendsHandoff, AmendsStats, EntryFilter},
    time::now_ms,
    AppError, AppResult,
};

/// Persistence boundary for Step 8 inventories, keyed by user id.
///
/// Every entry mutation and the progress recount it triggers are applied
/// atomically by implementations. Mutators validate their typed inputs
/// before anything reaches the store.
#[allow(async_fn_in_trait)]
pub trait InventoryRepository {
    /// The user's non-archived inventory, creating an empty one if needed.
    async fn find_or_create_for_user(&self, user_id: &str) -> AppResult<Inventory>;

    async fn active_for_user(&self, user_id: &str) -> AppResult<Option<Inventory>>;

    async fn get_inventory(&self, inventory_id: &str, user_id: &str) -> AppResult<Inventory>;

    async fn set_status(
        &self,
        inventory_id: &str,
        user_id: &str,
        status: InventoryStatus,
    ) -> AppResult<Inventory>;

    /// Archive the active inventory, if any, and open a new empty one.
    async fn start_fresh(&self, user_id: &str) -> AppResult<Inventory>;

    async fn append_entry(
        &self,
        inventory_id: &str,
        user_id: &str,
        draft: EntryDraft,
    ) -> AppResult<Inventory>;

    async fn apply_entry_changes(
        &self,
        inventory_id: &str,
        user_id: &str,
        entry_id: &str,
        changes: EntryChanges,
    ) -> AppResult<Inventory>;

    async fn delete_entry(
        &self,
        inventory_id: &str,
        user_id: &str,
        entry_id: &str,
    ) -> AppResult<Inventory>;

    /// Recount the cached progress from the entry list and persist it.
    async fn recompute_progress(&self, inventory_id: &str, user_id: &str) -> AppResult<Progress>;

    async fn add_entry(
        &self,
        inventory_id: &str,
        user_id: &str,
        input: NewAmendsEntry,
    ) -> AppResult<Inventory> {
        validate_user_id(user_id)?;
        let draft = input.validate()?;
        self.append_entry(inventory_id, user_id, draft).await
    }

    async fn update_entry(
        &self,
        inventory_id: &str,
        user_id: &str,
        entry_id: &str,
        patch: EntryPatch,
    ) -> AppResult<Inventory> {
        validate_user_id(user_id)?;
        let changes = patch.validate()?;
        self.apply_entry_changes(inventory_id, user_id, entry_id, changes)
            .await
    }

    async fn stats_for_user(&self, user_id: &str) -> AppResult<AmendsStats> {
        Ok(self
            .active_for_user(user_id)
            .await?
            .map(|inventory| AmendsStats::from_entries(&inventory.entries))
            .unwrap_or_else(AmendsStats::empty))
    }

    async fn list_entries(&self, user_id: &str, filter: &EntryFilter) -> AppResult<Vec<AmendsEntry>> {
        Ok(self
            .active_for_user(user_id)
            .await?
            .map(|inventory| filter.apply(&inventory.entries))
            .unwrap_or_default())
    }

    async fn handoff_for_user(&self, user_id: &str) -> AppResult<Vec<AmendsHandoff>> {
        Ok(self
            .active_for_user(user_id)
            .await?
            .map(|inventory| handoff_entries(&inventory))
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteInventoryRepository {
    pool: SqlitePool,
}

/// Wrap store and unexpected failures behind a generic message; not-found
/// and validation errors pass through untouched.
fn wrap(operation: &'static str, message: &'static str) -> impl FnOnce(AppError) -> AppError {
    move |err| match err.kind() {
        ErrorKind::Store | ErrorKind::Other => AppError::store(operation, message, err),
        ErrorKind::NotFound | ErrorKind::Validation => err,
    }
}

fn decode<T>(value: &str, field: &'static str) -> AppResult<T>
where
    T: FromStr<Err = AppError>,
{
    value.parse::<T>().map_err(|err| {
        AppError::new(STEP8_DECODE_ERROR, format!("Stored {field} is not recognised."))
            .with_context("value", value.to_string())
            .with_cause(err)
    })
}

fn entry_from_row(row: &SqliteRow) -> AppResult<AmendsEntry> {
    let status: String = row.try_get("willingness_status")?;
    let priority: String = row.try_get("priority")?;
    Ok(AmendsEntry {
        id: row.try_get("id")?,
        person: row.try_get("person")?,
        harm_done: row.try_get("harm_done")?,
        willingness_status: decode::<WillingnessStatus>(&status, "willingness status")?,
        plan_for_amends: row.try_get("plan_for_amends")?,
        priority: decode::<Priority>(&priority, "priority")?,
        notes: row.try_get("notes")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const ENTRY_COLUMNS: &str = "id, person, harm_done, willingness_status, plan_for_amends, \
     priority, notes, completed_at, created_at, updated_at";

const INVENTORY_COLUMNS: &str = "id, user_id, status, started_at, completed_at, updated_at, \
     total_entries, entries_willing, entries_completed, is_encrypted";

async fn load_entries(conn: &mut SqliteConnection, inventory_id: &str) -> AppResult<Vec<AmendsEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM step8_entries WHERE inventory_id = ? ORDER BY position, created_at"
    );
    let rows = sqlx::query(&sql)
        .bind(inventory_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(entry_from_row).collect()
}

async fn inventory_from_row(conn: &mut SqliteConnection, row: SqliteRow) -> AppResult<Inventory> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let entries = load_entries(conn, &id).await?;
    Ok(Inventory {
        user_id: row.try_get("user_id")?,
        status: decode::<InventoryStatus>(&status, "inventory status")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        updated_at: row.try_get("updated_at")?,
        progress: Progress {
            total_entries: row.try_get("total_entries")?,
            entries_willing: row.try_get("entries_willing")?,
            entries_completed: row.try_get("entries_completed")?,
        },
        is_encrypted: row.try_get::<i64, _>("is_encrypted")? != 0,
        entries,
        id,
    })
}

async fn load_inventory(
    conn: &mut SqliteConnection,
    inventory_id: &str,
    user_id: &str,
) -> AppResult<Option<Inventory>> {
    let sql = format!("SELECT {INVENTORY_COLUMNS} FROM step8_inventories WHERE id = ? AND user_id = ?");
    let row = sqlx::query(&sql)
        .bind(inventory_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(Some(inventory_from_row(conn, row).await?)),
        None => Ok(None),
    }
}

async fn load_active(conn: &mut SqliteConnection, user_id: &str) -> AppResult<Option<Inventory>> {
    let sql = format!(
        "SELECT {INVENTORY_COLUMNS} FROM step8_inventories WHERE user_id = ? AND status <> 'archived'"
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(Some(inventory_from_row(conn, row).await?)),
        None => Ok(None),
    }
}

async fn require_inventory(
    conn: &mut SqliteConnection,
    inventory_id: &str,
    user_id: &str,
) -> AppResult<Inventory> {
    load_inventory(conn, inventory_id, user_id)
        .await?
        .ok_or_else(|| AppError::inventory_not_found(inventory_id).with_context("user_id", user_id))
}

async fn ensure_owned(conn: &mut SqliteConnection, inventory_id: &str, user_id: &str) -> AppResult<()> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM step8_inventories WHERE id = ? AND user_id = ?")
            .bind(inventory_id)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(AppError::inventory_not_found(inventory_id).with_context("user_id", user_id)),
    }
}

async fn insert_inventory_if_absent(
    conn: &mut SqliteConnection,
    user_id: &str,
    now: i64,
) -> AppResult<bool> {
    let res = sqlx::query(
        "INSERT INTO step8_inventories (id, user_id, status, started_at, updated_at) \
         SELECT ?, ?, 'in_progress', ?, ? \
         WHERE NOT EXISTS (SELECT 1 FROM step8_inventories WHERE user_id = ? AND status <> 'archived')",
    )
    .bind(new_uuid_v7())
    .bind(user_id)
    .bind(now)
    .bind(now)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Recount progress for `inventory_id` from its entry rows and store it.
async fn recount(conn: &mut SqliteConnection, inventory_id: &str, now: i64) -> AppResult<Progress> {
    let (total_entries, entries_willing, entries_completed): (i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), \
                COALESCE(SUM(CASE WHEN willingness_status IN ('willing', 'completed') THEN 1 ELSE 0 END), 0), \
                COALESCE(SUM(CASE WHEN willingness_status = 'completed' THEN 1 ELSE 0 END), 0) \
         FROM step8_entries WHERE inventory_id = ?",
    )
    .bind(inventory_id)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        "UPDATE step8_inventories \
         SET total_entries = ?, entries_willing = ?, entries_completed = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(total_entries)
    .bind(entries_willing)
    .bind(entries_completed)
    .bind(now)
    .bind(inventory_id)
    .execute(&mut *conn)
    .await?;

    let progress = Progress {
        total_entries,
        entries_willing,
        entries_completed,
    };
    tracing::debug!(
        target: "companion",
        event = "progress_recomputed",
        inventory_id,
        total = total_entries,
        willing = entries_willing,
        completed = entries_completed
    );
    Ok(progress)
}

impl SqliteInventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find_or_create_inner(&self, user_id: &str) -> AppResult<Inventory> {
        validate_user_id(user_id)?;
        let mut tx = db::begin_immediate(&self.pool).await?;
        if insert_inventory_if_absent(&mut tx, user_id, now_ms()).await? {
            tracing::info!(target: "companion", event = "inventory_created", user_id);
        }
        let inventory = load_active(&mut tx, user_id)
            .await?
            .ok_or_else(|| AppError::new(AppError::UNKNOWN_CODE, "Active inventory vanished."))?;
        db::commit(tx).await?;
        Ok(inventory)
    }

    async fn active_inner(&self, user_id: &str) -> AppResult<Option<Inventory>> {
        let mut conn = self.pool.acquire().await?;
        load_active(&mut conn, user_id).await
    }

    async fn get_inner(&self, inventory_id: &str, user_id: &str) -> AppResult<Inventory> {
        let mut conn = self.pool.acquire().await?;
        require_inventory(&mut conn, inventory_id, user_id).await
    }

    async fn set_status_inner(
        &self,
        inventory_id: &str,
        user_id: &str,
        status: InventoryStatus,
    ) -> AppResult<Inventory> {
        let mut tx = db::begin_immediate(&self.pool).await?;
        let mut inventory = require_inventory(&mut tx, inventory_id, user_id).await?;

        if inventory.status == InventoryStatus::Archived && status != InventoryStatus::Archived {
            if let Some(active) = load_active(&mut tx, user_id).await? {
                return Err(AppError::new(
                    STEP8_ACTIVE_EXISTS,
                    "Another Step 8 inventory is already active.",
                )
                .with_context("inventory_id", inventory_id.to_string())
                .with_context("active_inventory_id", active.id));
            }
        }

        let previous = inventory.status;
        inventory.apply_status(status, now_ms());
        sqlx::query(
            "UPDATE step8_inventories SET status = ?, completed_at = ?, updated_at = ? \
             WHERE id = ? AND user_id = ?",
        )
        .bind(inventory.status.as_str())
        .bind(inventory.completed_at)
        .bind(inventory.updated_at)
        .bind(inventory_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        db::commit(tx).await?;

        tracing::info!(
            target: "companion",
            event = "inventory_status_changed",
            inventory_id,
            from = previous.as_str(),
            to = status.as_str()
        );
        Ok(inventory)
    }

    async fn start_fresh_inner(&self, user_id: &str) -> AppResult<Inventory> {
        validate_user_id(user_id)?;
        let now = now_ms();
        let mut tx = db::begin_immediate(&self.pool).await?;
        let archived = sqlx::query(
            "UPDATE step8_inventories SET status = 'archived', updated_at = ? \
             WHERE user_id = ? AND status <> 'archived'",
        )
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        insert_inventory_if_absent(&mut tx, user_id, now).await?;
        let inventory = load_active(&mut tx, user_id)
            .await?
            .ok_or_else(|| AppError::new(AppError::UNKNOWN_CODE, "Active inventory vanished."))?;
        db::commit(tx).await?;

        tracing::info!(
            target: "companion",
            event = "inventory_superseded",
            user_id,
            archived,
            inventory_id = %inventory.id
        );
        Ok(inventory)
    }

    async fn append_inner(
        &self,
        inventory_id: &str,
        user_id: &str,
        draft: EntryDraft,
    ) -> AppResult<Inventory> {
        let now = now_ms();
        let mut tx = db::begin_immediate(&self.pool).await?;
        ensure_owned(&mut tx, inventory_id, user_id).await?;

        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM step8_entries WHERE inventory_id = ?",
        )
        .bind(inventory_id)
        .fetch_one(&mut *tx)
        .await?;

        let entry = AmendsEntry::from_draft(new_uuid_v7(), draft, now);
        sqlx::query(
            "INSERT INTO step8_entries (id, inventory_id, position, person, harm_done, \
             willingness_status, plan_for_amends, priority, notes, completed_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(inventory_id)
        .bind(position)
        .bind(&entry.person)
        .bind(&entry.harm_done)
        .bind(entry.willingness_status.as_str())
        .bind(&entry.plan_for_amends)
        .bind(entry.priority.as_str())
        .bind(&entry.notes)
        .bind(entry.completed_at)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await?;

        recount(&mut tx, inventory_id, now).await?;
        let inventory = require_inventory(&mut tx, inventory_id, user_id).await?;
        db::commit(tx).await?;
        tracing::info!(target: "companion", event = "entry_added", inventory_id, entry_id = %entry.id);
        Ok(inventory)
    }

    async fn update_inner(
        &self,
        inventory_id: &str,
        user_id: &str,
        entry_id: &str,
        changes: EntryChanges,
    ) -> AppResult<Inventory> {
        let now = now_ms();
        let mut tx = db::begin_immediate(&self.pool).await?;
        ensure_owned(&mut tx, inventory_id, user_id).await?;

        let sql = format!("SELECT {ENTRY_COLUMNS} FROM step8_entries WHERE id = ? AND inventory_id = ?");
        let row = sqlx::query(&sql)
            .bind(entry_id)
            .bind(inventory_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::entry_not_found(inventory_id, entry_id))?;
        let mut entry = entry_from_row(&row)?;
        changes.apply(&mut entry, now);

        sqlx::query(
            "UPDATE step8_entries SET person = ?, harm_done = ?, willingness_status = ?, \
             plan_for_amends = ?, priority = ?, notes = ?, completed_at = ?, updated_at = ? \
             WHERE id = ? AND inventory_id = ?",
        )
        .bind(&entry.person)
        .bind(&entry.harm_done)
        .bind(entry.willingness_status.as_str())
        .bind(&entry.plan_for_amends)
        .bind(entry.priority.as_str())
        .bind(&entry.notes)
        .bind(entry.completed_at)
        .bind(entry.updated_at)
        .bind(entry_id)
        .bind(inventory_id)
        .execute(&mut *tx)
        .await?;

        recount(&mut tx, inventory_id, now).await?;
        let inventory = require_inventory(&mut tx, inventory_id, user_id).await?;
        db::commit(tx).await?;
        tracing::info!(target: "companion", event = "entry_updated", inventory_id, entry_id);
        Ok(inventory)
    }

    async fn delete_inner(
        &self,
        inventory_id: &str,
        user_id: &str,
        entry_id: &str,
    ) -> AppResult<Inventory> {
        let mut tx = db::begin_immediate(&self.pool).await?;
        ensure_owned(&mut tx, inventory_id, user_id).await?;

        let removed = sqlx::query("DELETE FROM step8_entries WHERE id = ? AND inventory_id = ?")
            .bind(entry_id)
            .bind(inventory_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Err(AppError::entry_not_found(inventory_id, entry_id));
        }

        recount(&mut tx, inventory_id, now_ms()).await?;
        let inventory = require_inventory(&mut tx, inventory_id, user_id).await?;
        db::commit(tx).await?;
        tracing::info!(target: "companion", event = "entry_deleted", inventory_id, entry_id);
        Ok(inventory)
    }

    async fn recompute_inner(&self, inventory_id: &str, user_id: &str) -> AppResult<Progress> {
        let mut tx = db::begin_immediate(&self.pool).await?;
        ensure_owned(&mut tx, inventory_id, user_id).await?;
        let progress = recount(&mut tx, inventory_id, now_ms()).await?;
        db::commit(tx).await?;
        Ok(progress)
    }
}

impl InventoryRepository for SqliteInventoryRepository {
    async fn find_or_create_for_user(&self, user_id: &str) -> AppResult<Inventory> {
        self.find_or_create_inner(user_id).await.map_err(wrap(
            "find_or_create",
            "Failed to find or create Step 8 inventory",
        ))
    }

    async fn active_for_user(&self, user_id: &str) -> AppResult<Option<Inventory>> {
        self.active_inner(user_id)
            .await
            .map_err(wrap("active_for_user", "Failed to fetch Step 8 inventory"))
    }

    async fn get_inventory(&self, inventory_id: &str, user_id: &str) -> AppResult<Inventory> {
        self.get_inner(inventory_id, user_id)
            .await
            .map_err(wrap("get_inventory", "Failed to fetch Step 8 inventory"))
    }

    async fn set_status(
        &self,
        inventory_id: &str,
        user_id: &str,
        status: InventoryStatus,
    ) -> AppResult<Inventory> {
        self.set_status_inner(inventory_id, user_id, status)
            .await
            .map_err(wrap("set_status", "Failed to update Step 8 inventory"))
    }

    async fn start_fresh(&self, user_id: &str) -> AppResult<Inventory> {
        self.start_fresh_inner(user_id)
            .await
            .map_err(wrap("start_fresh", "Failed to start a new Step 8 inventory"))
    }

    async fn append_entry(
        &self,
        inventory_id: &str,
        user_id: &str,
        draft: EntryDraft,
    ) -> AppResult<Inventory> {
        self.append_inner(inventory_id, user_id, draft)
            .await
            .map_err(wrap("add_entry", "Failed to add amends entry"))
    }

    async fn apply_entry_changes(
        &self,
        inventory_id: &str,
        user_id: &str,
        entry_id: &str,
        changes: EntryChanges,
    ) -> AppResult<Inventory> {
        self.update_inner(inventory_id, user_id, entry_id, changes)
            .await
            .map_err(wrap("update_entry", "Failed to update amends entry"))
    }

    async fn delete_entry(
        &self,
        inventory_id: &str,
        user_id: &str,
        entry_id: &str,
    ) -> AppResult<Inventory> {
        self.delete_inner(inventory_id, user_id, entry_id)
            .await
            .map_err(wrap("delete_entry", "Failed to delete amends entry"))
    }

    async fn recompute_progress(&self, inventory_id: &str, user_id: &str) -> AppResult<Progress> {
        self.recompute_inner(inventory_id, user_id)
            .await
            .map_err(wrap("recompute_progress", "Failed to update progress counters"))
    }
}
