use anyhow::Result;
use companion_lib::{
    commands_step8::{
        step8_entries_list, step8_entry_add, step8_entry_delete, step8_entry_update, step8_get,
        step8_handoff, step8_recompute, step8_set_status, step8_start_fresh, step8_stats,
        EntryAddRequest, EntryDeleteRequest, EntryUpdateRequest, StatusRequest,
    },
    error::{STEP8_ENTRY_NOT_FOUND, VALIDATION_INVALID_VALUE},
    EntryFilter, InventoryStatus, WillingnessStatus,
};
use serde_json::json;

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn commands_accept_camel_case_payloads() -> Result<()> {
    let repo = util::temp_repo().await;

    let add: EntryAddRequest = serde_json::from_value(json!({
        "person": "Jane",
        "harmDone": "Said cruel things",
        "priority": "high"
    }))?;
    assert!(add.inventory_id.is_none());
    let inventory = step8_entry_add(&repo, "user-1", add).await?;
    assert_eq!(inventory.progress.total_entries, 1);
    let entry_id = inventory.entries[0].id.clone();

    let update: EntryUpdateRequest = serde_json::from_value(json!({
        "inventoryId": inventory.id,
        "entryId": entry_id,
        "willingnessStatus": "completed",
        "planForAmends": "Write her a letter"
    }))?;
    let inventory = step8_entry_update(&repo, "user-1", update).await?;
    let entry = &inventory.entries[0];
    assert_eq!(entry.willingness_status, WillingnessStatus::Completed);
    assert_eq!(entry.plan_for_amends.as_deref(), Some("Write her a letter"));
    assert_eq!(inventory.progress.entries_completed, 1);

    let same = step8_get(&repo, "user-1").await?;
    assert_eq!(same.id, inventory.id);
    Ok(())
}

#[tokio::test]
async fn unknown_status_in_payload_is_rejected() -> Result<()> {
    let err = serde_json::from_value::<StatusRequest>(json!({ "status": "paused" }))
        .map_err(companion_lib::AppError::from)
        .unwrap_err();
    assert!(err.code().starts_with("JSON/"));

    let err = "paused".parse::<InventoryStatus>().unwrap_err();
    assert_eq!(err.code(), VALIDATION_INVALID_VALUE);
    Ok(())
}

#[tokio::test]
async fn delete_of_unknown_entry_reports_command_context() -> Result<()> {
    let repo = util::temp_repo().await;
    let err = step8_entry_delete(
        &repo,
        "user-1",
        EntryDeleteRequest {
            inventory_id: None,
            entry_id: "missing".into(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), STEP8_ENTRY_NOT_FOUND);
    assert_eq!(
        err.context().get("cmd").map(String::as_str),
        Some("step8_entry_delete")
    );
    Ok(())
}

#[tokio::test]
async fn read_commands_follow_the_active_inventory() -> Result<()> {
    let repo = util::temp_repo().await;
    let add: EntryAddRequest = serde_json::from_value(json!({
        "person": "Tom",
        "harm_done": "Borrowed money",
        "willingness_status": "willing"
    }))?;
    let inventory = step8_entry_add(&repo, "user-1", add).await?;

    assert_eq!(step8_stats(&repo, "user-1").await?.willingness_percentage, 100);
    assert_eq!(step8_handoff(&repo, "user-1").await?.len(), 1);
    assert_eq!(
        step8_entries_list(&repo, "user-1", EntryFilter::default())
            .await?
            .len(),
        1
    );
    assert_eq!(
        step8_recompute(&repo, "user-1", None).await?.total_entries,
        1
    );

    let completed = step8_set_status(
        &repo,
        "user-1",
        StatusRequest {
            inventory_id: Some(inventory.id.clone()),
            status: InventoryStatus::Completed,
        },
    )
    .await?;
    assert!(completed.completed_at.is_some());

    let fresh = step8_start_fresh(&repo, "user-1").await?;
    assert_ne!(fresh.id, inventory.id);
    assert_eq!(step8_stats(&repo, "user-1").await?.total_entries, 0);
    assert!(step8_handoff(&repo, "user-1").await?.is_empty());
    Ok(())
}
