//! Caller-facing Step 8 operations. Each command resolves the user's
//! inventory when none is named, delegates to the repository and logs the
//! outcome with timing.

use std::future::Future;
use std::time::Instant;

use serde::Deserialize;

use crate::{
    error::ErrorKind,
    model_step8::{
        AmendsEntry, EntryPatch, Inventory, InventoryStatus, NewAmendsEntry, Progress,
    },
    repo_step8::InventoryRepository,
    step8_report::{AmendsHandoff, AmendsStats, EntryFilter},
    AppError, AppResult,
};

#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    #[serde(default, alias = "inventoryId")]
    pub inventory_id: Option<String>,
    pub status: InventoryStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryAddRequest {
    #[serde(default, alias = "inventoryId")]
    pub inventory_id: Option<String>,
    #[serde(flatten)]
    pub entry: NewAmendsEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryUpdateRequest {
    #[serde(default, alias = "inventoryId")]
    pub inventory_id: Option<String>,
    #[serde(alias = "entryId")]
    pub entry_id: String,
    #[serde(flatten)]
    pub patch: EntryPatch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryDeleteRequest {
    #[serde(default, alias = "inventoryId")]
    pub inventory_id: Option<String>,
    #[serde(alias = "entryId")]
    pub entry_id: String,
}

fn log_command_start(cmd: &'static str, user_id: &str) {
    tracing::debug!(target: "companion", area = "step8", cmd, user_id, "ipc_enter");
}

fn log_command_success(cmd: &'static str, start: Instant, user_id: &str, row_count: usize) {
    tracing::info!(
        target: "companion",
        area = "step8",
        cmd,
        user_id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        row_count,
        "ipc_success"
    );
}

fn log_command_error(cmd: &'static str, start: Instant, err: &AppError, user_id: &str) {
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match err.kind() {
        ErrorKind::Validation | ErrorKind::NotFound => tracing::warn!(
            target: "companion",
            area = "step8",
            cmd,
            user_id,
            code = err.code(),
            message = err.message(),
            elapsed_ms,
            "ipc_failure"
        ),
        ErrorKind::Store | ErrorKind::Other => tracing::error!(
            target: "companion",
            area = "step8",
            cmd,
            user_id,
            code = err.code(),
            message = err.message(),
            elapsed_ms,
            "ipc_failure"
        ),
    }
}

async fn instrumented<T, F, C>(cmd: &'static str, user_id: &str, count: C, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
    C: Fn(&T) -> usize,
{
    log_command_start(cmd, user_id);
    let start = Instant::now();
    match fut.await {
        Ok(value) => {
            log_command_success(cmd, start, user_id, count(&value));
            Ok(value)
        }
        Err(err) => {
            let err = err.with_context("cmd", cmd);
            log_command_error(cmd, start, &err, user_id);
            Err(err)
        }
    }
}

async fn resolve_inventory_id<R: InventoryRepository>(
    repo: &R,
    user_id: &str,
    inventory_id: Option<String>,
) -> AppResult<String> {
    match inventory_id {
        Some(id) => Ok(id),
        None => Ok(repo.find_or_create_for_user(user_id).await?.id),
    }
}

fn entry_count(inventory: &Inventory) -> usize {
    inventory.entries.len()
}

pub async fn step8_get<R: InventoryRepository>(repo: &R, user_id: &str) -> AppResult<Inventory> {
    instrumented(
        "step8_get",
        user_id,
        entry_count,
        repo.find_or_create_for_user(user_id),
    )
    .await
}

pub async fn step8_set_status<R: InventoryRepository>(
    repo: &R,
    user_id: &str,
    request: StatusRequest,
) -> AppResult<Inventory> {
    instrumented("step8_set_status", user_id, entry_count, async move {
        let inventory_id = resolve_inventory_id(repo, user_id, request.inventory_id).await?;
        repo.set_status(&inventory_id, user_id, request.status).await
    })
    .await
}

pub async fn step8_start_fresh<R: InventoryRepository>(
    repo: &R,
    user_id: &str,
) -> AppResult<Inventory> {
    instrumented(
        "step8_start_fresh",
        user_id,
        entry_count,
        repo.start_fresh(user_id),
    )
    .await
}

pub async fn step8_entry_add<R: InventoryRepository>(
    repo: &R,
    user_id: &str,
    request: EntryAddRequest,
) -> AppResult<Inventory> {
    instrumented("step8_entry_add", user_id, entry_count, async move {
        let inventory_id = resolve_inventory_id(repo, user_id, request.inventory_id).await?;
        repo.add_entry(&inventory_id, user_id, request.entry).await
    })
    .await
}

pub async fn step8_entry_update<R: InventoryRepository>(
    repo: &R,
    user_id: &str,
    request: EntryUpdateRequest,
) -> AppResult<Inventory> {
    instrumented("step8_entry_update", user_id, entry_count, async move {
        let inventory_id = resolve_inventory_id(repo, user_id, request.inventory_id).await?;
        repo.update_entry(&inventory_id, user_id, &request.entry_id, request.patch)
            .await
    })
    .await
}

pub async fn step8_entry_delete<R: InventoryRepository>(
    repo: &R,
    user_id: &str,
    request: EntryDeleteRequest,
) -> AppResult<Inventory> {
    instrumented("step8_entry_delete", user_id, entry_count, async move {
        let inventory_id = resolve_inventory_id(repo, user_id, request.inventory_id).await?;
        repo.delete_entry(&inventory_id, user_id, &request.entry_id)
            .await
    })
    .await
}

pub async fn step8_entries_list<R: InventoryRepository>(
    repo: &R,
    user_id: &str,
    filter: EntryFilter,
) -> AppResult<Vec<AmendsEntry>> {
    instrumented("step8_entries_list", user_id, Vec::len, async move {
        repo.list_entries(user_id, &filter).await
    })
    .await
}

pub async fn step8_stats<R: InventoryRepository>(repo: &R, user_id: &str) -> AppResult<AmendsStats> {
    instrumented(
        "step8_stats",
        user_id,
        |stats: &AmendsStats| stats.total_entries as usize,
        repo.stats_for_user(user_id),
    )
    .await
}

pub async fn step8_handoff<R: InventoryRepository>(
    repo: &R,
    user_id: &str,
) -> AppResult<Vec<AmendsHandoff>> {
    instrumented("step8_handoff", user_id, Vec::len, repo.handoff_for_user(user_id)).await
}

pub async fn step8_recompute<R: InventoryRepository>(
    repo: &R,
    user_id: &str,
    inventory_id: Option<String>,
) -> AppResult<Progress> {
    instrumented(
        "step8_recompute",
        user_id,
        |progress: &Progress| progress.total_entries as usize,
        async move {
            let inventory_id = resolve_inventory_id(repo, user_id, inventory_id).await?;
            repo.recompute_progress(&inventory_id, user_id).await
        },
    )
    .await
}
