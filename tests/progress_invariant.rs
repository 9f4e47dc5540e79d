use companion_lib::{EntryPatch, InventoryRepository, NewAmendsEntry, WillingnessStatus};
use proptest::prelude::*;

#[path = "util.rs"]
mod util;

#[derive(Debug, Clone)]
enum Op {
    Add(WillingnessStatus),
    SetStatus(usize, WillingnessStatus),
    Delete(usize),
}

fn status() -> impl Strategy<Value = WillingnessStatus> {
    prop::sample::select(WillingnessStatus::ALL.to_vec())
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => status().prop_map(Op::Add),
        2 => (any::<usize>(), status()).prop_map(|(i, s)| Op::SetStatus(i, s)),
        1 => any::<usize>().prop_map(Op::Delete),
    ]
}

fn run_ops(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    rt.block_on(async move {
        let repo = util::temp_repo().await;
        let mut inventory = repo.find_or_create_for_user("user-1").await.unwrap();
        for op in ops {
            inventory = match op {
                Op::Add(status) => repo
                    .add_entry(
                        &inventory.id,
                        "user-1",
                        NewAmendsEntry::new("Someone", "Something").with_status(status),
                    )
                    .await
                    .unwrap(),
                Op::SetStatus(_, _) | Op::Delete(_) if inventory.entries.is_empty() => inventory,
                Op::SetStatus(i, status) => {
                    let entry_id = inventory.entries[i % inventory.entries.len()].id.clone();
                    repo.update_entry(&inventory.id, "user-1", &entry_id, EntryPatch::status(status))
                        .await
                        .unwrap()
                }
                Op::Delete(i) => {
                    let entry_id = inventory.entries[i % inventory.entries.len()].id.clone();
                    repo.delete_entry(&inventory.id, "user-1", &entry_id)
                        .await
                        .unwrap()
                }
            };
            util::assert_progress_consistent(&inventory);
        }
        let stored = repo.get_inventory(&inventory.id, "user-1").await.unwrap();
        prop_assert_eq!(stored.progress.total_entries, stored.entries.len() as i64);
        prop_assert_eq!(stored.progress, inventory.progress);
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn stored_progress_matches_entries(ops in prop::collection::vec(op(), 0..20)) {
        run_ops(ops)?;
    }
}
