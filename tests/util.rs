#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use companion_lib::{migrate, Inventory, Progress, SqliteInventoryRepository};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

pub async fn temp_repo() -> SqliteInventoryRepository {
    SqliteInventoryRepository::new(temp_pool().await)
}

/// Stored counters must always agree with a direct count of the entries.
pub fn assert_progress_consistent(inventory: &Inventory) {
    assert_eq!(
        inventory.progress,
        Progress::from_entries(&inventory.entries),
        "stored progress drifted from entries of {}",
        inventory.id
    );
}

pub fn progress(total: i64, willing: i64, completed: i64) -> Progress {
    Progress {
        total_entries: total,
        entries_willing: willing,
        entries_completed: completed,
    }
}
