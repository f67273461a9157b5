//! Chunked execution with per-item failure isolation.

use std::cell::RefCell;
use std::collections::BTreeSet;

use pretty_assertions::assert_eq;

use mailbridge::batch::{BatchExecutor, BatchJob, FailureReason};
use mailbridge::error::MailbridgeError;

#[derive(Debug, Clone, PartialEq)]
struct OpError(String);

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[tokio::test]
async fn failing_chunk_recovers_item_by_item() {
    let calls = RefCell::new(Vec::<Vec<&str>>::new());
    let executor = BatchExecutor::new(2).unwrap();

    let result = executor
        .run(vec!["a", "b", "c", "d", "e"], |chunk: Vec<&str>| {
            calls.borrow_mut().push(chunk.clone());
            async move {
                if chunk == ["c", "d"] {
                    Err(OpError("chunk rejected".into()))
                } else {
                    Ok(chunk.iter().map(|s| s.to_uppercase()).collect::<Vec<_>>())
                }
            }
        })
        .await;

    assert_eq!(result.successes, vec!["A", "B", "C", "D", "E"]);
    assert!(result.failures.is_empty());
    assert_eq!(
        calls.into_inner(),
        vec![
            vec!["a", "b"],
            vec!["c", "d"],
            vec!["c"],
            vec!["d"],
            vec!["e"],
        ]
    );
}

#[tokio::test]
async fn only_the_bad_item_fails() {
    let executor = BatchExecutor::new(3).unwrap();

    let result = executor
        .run((1..=7).collect::<Vec<u32>>(), |chunk: Vec<u32>| async move {
            if chunk.contains(&5) {
                Err(OpError(format!("cannot apply to {chunk:?}")))
            } else {
                Ok(chunk.iter().map(|n| n * 10).collect::<Vec<_>>())
            }
        })
        .await;

    assert_eq!(result.successes, vec![10, 20, 30, 40, 60, 70]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].item, 5);
    assert_eq!(
        result.failures[0].reason,
        FailureReason::Operation(OpError("cannot apply to [5]".into()))
    );
    assert_eq!(result.summary(), "6 of 7 succeeded");
}

#[tokio::test]
async fn every_item_lands_in_exactly_one_side() {
    let executor = BatchExecutor::new(4).unwrap();
    let items: Vec<u32> = (0..23).collect();

    let result = executor
        .run(items.clone(), |chunk: Vec<u32>| async move {
            if chunk.len() > 1 && chunk.iter().any(|n| n % 3 == 0) {
                return Err(OpError("chunk contains a multiple of three".into()));
            }
            if chunk.len() == 1 && chunk[0] % 6 == 0 {
                return Err(OpError("multiple of six".into()));
            }
            Ok(chunk)
        })
        .await;

    let succeeded: BTreeSet<u32> = result.successes.iter().copied().collect();
    let failed: BTreeSet<u32> = result.failed_items().copied().collect();
    assert!(succeeded.is_disjoint(&failed));
    assert_eq!(result.total(), items.len());
    assert_eq!(
        succeeded.union(&failed).copied().collect::<Vec<_>>(),
        items
    );
    assert_eq!(failed, BTreeSet::from([0, 6, 12, 18]));
}

#[tokio::test]
async fn items_from_successful_chunks_are_not_retried() {
    let attempts = RefCell::new(Vec::<u32>::new());
    let executor = BatchExecutor::new(2).unwrap();

    executor
        .run(vec![1, 2, 3, 4], |chunk: Vec<u32>| {
            attempts.borrow_mut().extend(chunk.iter().copied());
            async move {
                if chunk == [3, 4] {
                    Err(OpError("boom".into()))
                } else {
                    Ok(chunk)
                }
            }
        })
        .await;

    assert_eq!(attempts.into_inner(), vec![1, 2, 3, 4, 3, 4]);
}

#[tokio::test]
async fn chunk_size_larger_than_input_is_one_chunk() {
    let calls = RefCell::new(0);
    let executor = BatchExecutor::new(100).unwrap();

    let result = executor
        .run(vec!["x", "y"], |chunk: Vec<&str>| {
            *calls.borrow_mut() += 1;
            async move { Ok::<_, OpError>(chunk) }
        })
        .await;

    assert_eq!(calls.into_inner(), 1);
    assert!(result.is_complete_success());
}

#[tokio::test]
async fn single_item_chunks_are_retried_once_more() {
    let calls = RefCell::new(0);
    let executor = BatchExecutor::new(1).unwrap();

    let result = executor
        .run(vec!["only"], |_chunk: Vec<&str>| {
            *calls.borrow_mut() += 1;
            async move { Err::<Vec<()>, _>(OpError("always".into())) }
        })
        .await;

    assert_eq!(calls.into_inner(), 2);
    assert_eq!(result.failure_count(), 1);
    assert_eq!(result.failures[0].item, "only");
}

#[tokio::test]
async fn short_result_counts_trigger_item_retries() {
    let executor = BatchExecutor::new(3).unwrap();

    let result = executor
        .run(vec![1, 2, 3], |chunk: Vec<u32>| async move {
            // Silently drops item 2, and returns nothing for it alone.
            Ok::<_, OpError>(chunk.into_iter().filter(|n| *n != 2).collect::<Vec<_>>())
        })
        .await;

    assert_eq!(result.successes, vec![1, 3]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].item, 2);
    assert_eq!(
        result.failures[0].reason,
        FailureReason::ResultCountMismatch {
            expected: 1,
            returned: 0
        }
    );
}

#[tokio::test]
async fn batch_job_uses_its_own_chunk_size() {
    let sizes = RefCell::new(Vec::new());
    let job = BatchJob::new((0..5).collect::<Vec<u32>>()).with_chunk_size(2);

    let result = BatchExecutor::run_job(job, |chunk: Vec<u32>| {
        sizes.borrow_mut().push(chunk.len());
        async move { Ok::<_, OpError>(chunk) }
    })
    .await
    .unwrap();

    assert_eq!(sizes.into_inner(), vec![2, 2, 1]);
    assert_eq!(result.success_count(), 5);
}

#[tokio::test]
async fn batch_job_with_zero_chunk_size_is_rejected() {
    let job = BatchJob::new(vec![1u32]).with_chunk_size(0);

    let err = BatchExecutor::run_job(job, |chunk: Vec<u32>| async move {
        Ok::<_, OpError>(chunk)
    })
    .await
    .unwrap_err();

    assert!(matches!(err, MailbridgeError::InvalidArgument(_)));
}

#[tokio::test]
async fn one_bad_item_is_isolated_at_every_chunk_size() {
    let items: Vec<u32> = (0..9).collect();
    let bad = 4;
    let mut per_size_successes = Vec::new();

    for chunk_size in 1..=items.len() + 1 {
        let executor = BatchExecutor::new(chunk_size).unwrap();
        let result = executor
            .run(items.clone(), |chunk: Vec<u32>| async move {
                if chunk.contains(&bad) {
                    Err(OpError(format!("{bad} is rejected")))
                } else {
                    Ok(chunk)
                }
            })
            .await;

        let succeeded: BTreeSet<u32> = result.successes.iter().copied().collect();
        let failed: BTreeSet<u32> = result.failed_items().copied().collect();
        assert_eq!(result.successes.len(), succeeded.len(), "size {chunk_size}");
        assert_eq!(result.failures.len(), failed.len(), "size {chunk_size}");
        assert!(succeeded.is_disjoint(&failed), "size {chunk_size}");
        assert_eq!(
            succeeded.union(&failed).copied().collect::<Vec<_>>(),
            items,
            "size {chunk_size}"
        );
        assert_eq!(failed, BTreeSet::from([bad]), "size {chunk_size}");
        per_size_successes.push(succeeded);
    }

    assert!(per_size_successes.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn multi_item_chunk_failures_match_single_item_runs() {
    let items: Vec<u32> = (0..7).collect();
    let op = |chunk: Vec<u32>| async move {
        if chunk.len() > 1 {
            return Err(OpError("bulk call unavailable".into()));
        }
        if chunk[0] == 5 {
            return Err(OpError("item 5 rejected".into()));
        }
        Ok(chunk.into_iter().map(|n| n + 100).collect::<Vec<_>>())
    };

    let single = BatchExecutor::new(1).unwrap().run(items.clone(), op).await;
    let baseline: BTreeSet<u32> = single.successes.iter().copied().collect();
    assert_eq!(single.failed_items().copied().collect::<Vec<_>>(), vec![5]);

    for chunk_size in 2..=items.len() + 1 {
        let result = BatchExecutor::new(chunk_size)
            .unwrap()
            .run(items.clone(), op)
            .await;
        let successes: BTreeSet<u32> = result.successes.iter().copied().collect();
        assert_eq!(successes, baseline, "size {chunk_size}");
        assert_eq!(
            result.failed_items().copied().collect::<Vec<_>>(),
            vec![5],
            "size {chunk_size}"
        );
    }
}
