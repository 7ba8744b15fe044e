use rand::Rng;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;
use tmcache::transaction::{self, TransactionContext, TransactionState};
use tmcache::TransactionalCache;
use tmcache_int_test::test_util::{
    cleanup, create_bounded_test_context, create_test_context, create_test_context_with, run_test,
    snapshot, TestCache,
};

#[ctor::ctor]
fn init() {
    colog::init();
}

fn key_space() -> Vec<String> {
    (0..16).map(|i| format!("item-{}", i)).collect()
}

fn seed(cache: &TestCache, keys: &[String]) -> tmcache::CacheResult<()> {
    let mut txn = TransactionContext::new();
    for (i, key) in keys.iter().enumerate() {
        if i % 2 == 0 {
            cache.put(&mut txn, key.clone(), i as i64)?;
        }
    }
    txn.commit();
    Ok(())
}

/// Applies random puts, evicts and gets, mirroring the writes in `model`.
fn random_workload(
    cache: &TestCache,
    txn: &mut TransactionContext,
    keys: &[String],
    model: &mut BTreeMap<String, Option<i64>>,
) -> tmcache::CacheResult<()> {
    let mut rng = rand::rng();
    for _ in 0..64 {
        let key = &keys[rng.random_range(0..keys.len())];
        match rng.random_range(0..3) {
            0 => {
                let value = rng.random_range(0..1_000);
                cache.put(txn, key.clone(), value)?;
                model.insert(key.clone(), Some(value));
            }
            1 => {
                cache.evict(txn, key)?;
                model.insert(key.clone(), None);
            }
            _ => {
                let value = cache.get(txn, key)?.map(|v| *v);
                assert_eq!(&value, model.get(key).unwrap_or(&None));
            }
        }
    }
    Ok(())
}

#[test]
fn test_rollback_restores_prior_mapping() {
    run_test(
        create_test_context,
        |ctx| {
            let cache = ctx.cache();
            let keys = key_space();
            seed(&cache, &keys)?;

            for _ in 0..20 {
                let before = snapshot(&cache, &keys)?;
                let mut model = before.clone();
                let mut txn = TransactionContext::new();
                random_workload(&cache, &mut txn, &keys, &mut model)?;
                txn.rollback();

                assert_eq!(txn.state(), TransactionState::Aborted);
                assert_eq!(snapshot(&cache, &keys)?, before);
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_rollback_restores_prior_mapping_with_bounded_retention() {
    run_test(
        || create_bounded_test_context(1),
        |ctx| {
            let cache = ctx.cache();
            let keys = key_space();
            seed(&cache, &keys)?;

            for _ in 0..20 {
                let before = snapshot(&cache, &keys)?;
                let mut model = before.clone();
                let mut txn = TransactionContext::new();
                random_workload(&cache, &mut txn, &keys, &mut model)?;
                txn.rollback();
                assert_eq!(snapshot(&cache, &keys)?, before);
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_commit_applies_exactly_the_mutations() {
    run_test(
        create_test_context,
        |ctx| {
            let cache = ctx.cache();
            let keys = key_space();
            seed(&cache, &keys)?;

            for _ in 0..20 {
                let mut model = snapshot(&cache, &keys)?;
                let mut txn = TransactionContext::new();
                random_workload(&cache, &mut txn, &keys, &mut model)?;
                txn.commit();
                assert_eq!(snapshot(&cache, &keys)?, model);

                // the undo log went with the commit
                txn.rollback();
                assert_eq!(snapshot(&cache, &keys)?, model);
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_committed_writes_survive_a_rolled_back_overwrite() {
    run_test(
        || create_test_context_with(4, Duration::from_secs(2)),
        |ctx| {
            let cache = ctx.cache();
            let a = "a".to_string();
            let b = "b".to_string();

            let writer = cache.clone();
            thread::spawn(move || {
                let mut txn = TransactionContext::new();
                writer.put(&mut txn, "a".to_string(), 1)?;
                writer.put(&mut txn, "b".to_string(), 2)?;
                transaction::commit(&mut txn);
                Ok::<_, tmcache::CacheError>(())
            })
            .join()
            .expect("first writer panicked")?;

            let mut txn = TransactionContext::new();
            assert_eq!(cache.get(&mut txn, &a)?.as_deref(), Some(&1));
            assert_eq!(cache.get(&mut txn, &b)?.as_deref(), Some(&2));
            txn.commit();

            let overwriter = cache.clone();
            thread::spawn(move || {
                let mut txn = TransactionContext::new();
                overwriter.put(&mut txn, "a".to_string(), 99)?;
                transaction::rollback(&mut txn);
                Ok::<_, tmcache::CacheError>(())
            })
            .join()
            .expect("second writer panicked")?;

            assert_eq!(cache.get(&mut txn, &a)?.as_deref(), Some(&1));
            txn.commit();
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_evict_absent_key_records_nothing() {
    run_test(
        create_test_context,
        |ctx| {
            let cache = ctx.cache();
            let present = "present".to_string();
            let absent = "absent".to_string();

            let mut txn = TransactionContext::new();
            cache.put(&mut txn, present.clone(), 7)?;
            txn.commit();

            cache.evict(&mut txn, &absent)?;
            assert_eq!(txn.pending_undo(), 0);
            txn.rollback();

            assert_eq!(cache.get(&mut txn, &present)?.as_deref(), Some(&7));
            assert!(cache.get(&mut txn, &absent)?.is_none());
            txn.commit();
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_rollback_spans_several_caches() {
    let users: TransactionalCache<u32, String> = TransactionalCache::new(4).unwrap();
    let scores: TransactionalCache<u32, u64> = TransactionalCache::new(4).unwrap();

    let mut txn = TransactionContext::new();
    users.put(&mut txn, 1, "ada".to_string()).unwrap();
    scores.put(&mut txn, 1, 10).unwrap();
    txn.commit();

    users.put(&mut txn, 1, "grace".to_string()).unwrap();
    scores.evict(&mut txn, &1).unwrap();
    TransactionalCache::<u32, String>::rollback(&mut txn);

    assert_eq!(users.get(&mut txn, &1).unwrap().as_deref().map(String::as_str), Some("ada"));
    assert_eq!(scores.get(&mut txn, &1).unwrap().as_deref(), Some(&10));
    txn.commit();
}

#[test]
fn test_dropped_context_rolls_back_and_unlocks() {
    run_test(
        create_test_context,
        |ctx| {
            let cache = ctx.cache();
            let key = "dropped".to_string();

            let worker = cache.clone();
            let worker_key = key.clone();
            thread::spawn(move || {
                // context dropped without commit
                let mut txn = TransactionContext::new();
                worker.put(&mut txn, worker_key, 5)
            })
            .join()
            .expect("worker panicked")?;

            assert!(!cache.shard_lock(&key).is_locked());
            let mut txn = TransactionContext::new();
            assert!(cache.get(&mut txn, &key)?.is_none());
            txn.commit();
            Ok(())
        },
        cleanup,
    )
}
