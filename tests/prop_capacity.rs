use std::sync::Arc;

use proptest::prelude::*;
use ulid::Ulid;

use prioritize::directory::{DepartmentEntry, DirectoryFile, StaticDirectory};
use prioritize::engine::{now_ms, peak_concurrency, Engine, EngineError, EngineSettings};
use prioritize::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use prioritize::model::*;
use prioritize::store::MemoryStore;

async fn engine(slots: u32) -> (Engine, Principal, Ulid) {
    let (dept, rid) = (Ulid::new(), Ulid::new());
    let dir = StaticDirectory::new(DirectoryFile {
        departments: vec![DepartmentEntry {
            id: dept,
            name: "Lab".into(),
            token: "lab".into(),
        }],
        resources: vec![Resource {
            id: rid,
            uuid: "r".into(),
            name: "R".into(),
            description: None,
            group: "G".into(),
            department: dept,
            slots,
            attributes: Default::default(),
        }],
        users: Vec::new(),
    });
    let engine = Engine::open(Arc::new(MemoryStore::new()), Arc::new(dir), EngineSettings::default())
        .await
        .unwrap();
    let user = Principal {
        user_id: Ulid::new(),
        departments: vec![dept],
        admin: false,
    };
    (engine, user, rid)
}

fn spans() -> impl Strategy<Value = Vec<(Ms, Ms)>> {
    prop::collection::vec((0i64..500, 1i64..120), 1..40)
        .prop_map(|v| v.into_iter().map(|(s, len)| (s, s + len)).collect())
}

proptest! {
    #[test]
    fn admitted_never_exceed_slots(slots in 1u32..4, requests in spans()) {
        let (admitted, numbered, rejected) = tokio_test::block_on(async {
            let (engine, user, rid) = engine(slots).await;
            let mut admitted = Vec::new();
            let mut numbered = Vec::new();
            let mut rejected = Vec::new();
            for (start, end) in requests {
                let req = NewReservation {
                    id: Ulid::new(),
                    resource_id: rid,
                    start,
                    end,
                    title: None,
                    description: None,
                };
                match engine.try_reserve(&user, req).await {
                    Ok(r) => {
                        admitted.push(r.span);
                        numbered.push((r.span, r.slot));
                    }
                    // Judged against what was in at the time, not what got in later.
                    Err(EngineError::CapacityExceeded(_)) => {
                        rejected.push((Span::new(start, end), admitted.clone()))
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            (admitted, numbered, rejected)
        });

        prop_assert!(peak_concurrency(&admitted) <= slots);

        // Overlapping reservations never share a slot number.
        for (i, (a, slot_a)) in numbered.iter().enumerate() {
            prop_assert!(slot_a.is_none_or(|n| n < slots));
            for (b, slot_b) in &numbered[i + 1..] {
                if a.overlaps(b) && slot_a.is_some() {
                    prop_assert_ne!(slot_a, slot_b);
                }
            }
        }

        // Every refusal was forced: adding it to what was in would overbook.
        for (span, before) in rejected {
            let mut with = before;
            with.push(span);
            let clipped: Vec<Span> = with
                .iter()
                .filter(|s| s.start < span.end && span.start < s.end)
                .map(|s| Span::new(s.start.max(span.start), s.end.min(span.end)))
                .collect();
            prop_assert!(peak_concurrency(&clipped) > slots);
        }
    }

    #[test]
    fn abutting_chain_fills_single_slot(start in 0i64..1000, lens in prop::collection::vec(1i64..100, 1..30)) {
        tokio_test::block_on(async {
            let (engine, user, rid) = engine(1).await;
            let mut at = start;
            for len in lens {
                let req = NewReservation {
                    id: Ulid::new(),
                    resource_id: rid,
                    start: at,
                    end: at + len,
                    title: None,
                    description: None,
                };
                engine.try_reserve(&user, req).await.unwrap();
                at += len;
            }
        });
    }
}

#[test]
fn wall_clock_is_a_valid_timestamp() {
    let now = now_ms();
    assert!((MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&now));
}
