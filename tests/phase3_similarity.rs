//! Phase 3 tests: Exact and approximate lookup, ranking, index maintenance.

use fuzzy_store::config::BackendConfig;
use fuzzy_store::types::{
    CheckCmd, Digest, FuzzyCmd, ShingleSet, DIGEST_LEN, MAX_CANDIDATES, SHINGLE_COUNT,
};
use fuzzy_store::FuzzyBackend;

use tempfile::tempdir;

const T: u64 = 1_700_000_000;
const DAY: u64 = 86_400;

fn digest(b: u8) -> Digest {
    Digest::new([b; DIGEST_LEN])
}

fn base() -> ShingleSet {
    let mut values = [0u64; SHINGLE_COUNT];
    for (i, v) in values.iter_mut().enumerate() {
        *v = 0x5eed_0000 + i as u64;
    }
    ShingleSet::new(values)
}

/// `base()` with its first `changed` positions replaced by values unique to `marker`.
fn variant(changed: usize, marker: u64) -> ShingleSet {
    let mut values = *base().values();
    for (i, v) in values.iter_mut().take(changed).enumerate() {
        *v = marker << 32 | i as u64;
    }
    ShingleSet::new(values)
}

fn open(dir: &tempfile::TempDir) -> FuzzyBackend {
    FuzzyBackend::open(dir.path().join("fuzzy.db"), false).unwrap()
}

fn commit(backend: &FuzzyBackend, cmds: &[FuzzyCmd], now: u64) {
    backend.prepare_update_at("mirror", now).unwrap();
    for cmd in cmds {
        backend.add(cmd).unwrap();
    }
    backend.finish_update_at("mirror", true, now).unwrap();
}

// ==================== Exact and Approximate Scoring ====================

#[test]
fn test_exact_and_self_similarity() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    commit(
        &backend,
        &[FuzzyCmd::new(digest(1)).shingles(base()).weight(4)],
        T,
    );

    let exact = backend.check_at(&CheckCmd::new(digest(1)), DAY, T);
    assert_eq!(exact.probability, 1.0);

    let same_shingles = CheckCmd::new(digest(9)).shingles(base());
    let reply = backend.check_at(&same_shingles, DAY, T);
    assert_eq!(reply.probability, 1.0);
    assert_eq!(reply.weight, 4);
}

#[test]
fn test_approximate_match_scores_shared_fraction() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    commit(
        &backend,
        &[FuzzyCmd::new(digest(1)).shingles(base()).flag(2).weight(9)],
        T,
    );

    let query = CheckCmd::new(digest(9)).shingles(variant(8, 77));
    let reply = backend.check_at(&query, DAY, T);
    assert_eq!(reply.probability, 24.0 / 32.0);
    assert!(reply.probability > 0.0 && reply.probability < 1.0);
    assert_eq!(reply.weight, 9);
    assert_eq!(reply.flag, 2);
}

#[test]
fn test_no_shared_shingles_is_miss() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    commit(&backend, &[FuzzyCmd::new(digest(1)).shingles(base())], T);

    let query = CheckCmd::new(digest(9)).shingles(variant(SHINGLE_COUNT, 5));
    let reply = backend.check_at(&query, DAY, T);
    assert_eq!(reply.probability, 0.0);
    assert_eq!(reply.weight, 0);

    let no_shingles = backend.check_at(&CheckCmd::new(digest(9)), DAY, T);
    assert!(!no_shingles.is_match());
}

#[test]
fn test_min_shingle_matches_threshold() {
    let dir = tempdir().unwrap();
    let mut config = BackendConfig::new(dir.path().join("fuzzy.db"));
    config.min_shingle_matches = 10;
    let backend = FuzzyBackend::open_with_config(config).unwrap();
    commit(&backend, &[FuzzyCmd::new(digest(1)).shingles(base())], T);

    let weak = CheckCmd::new(digest(9)).shingles(variant(27, 3));
    assert!(!backend.check_at(&weak, DAY, T).is_match());

    let strong = CheckCmd::new(digest(9)).shingles(variant(20, 3));
    assert_eq!(backend.check_at(&strong, DAY, T).probability, 12.0 / 32.0);
}

// ==================== Ranking ====================

#[test]
fn test_ranking_by_shared_then_weight_then_recency() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    commit(
        &backend,
        &[
            FuzzyCmd::new(digest(1)).shingles(variant(12, 1)).weight(1),
            FuzzyCmd::new(digest(2)).shingles(variant(12, 2)).weight(5),
            FuzzyCmd::new(digest(3)).shingles(variant(7, 3)).weight(1),
        ],
        T,
    );
    commit(
        &backend,
        &[FuzzyCmd::new(digest(4)).shingles(variant(12, 4)).weight(1)],
        T + 10,
    );

    let ranked = backend.candidates_at(&base(), None, DAY, T + 10);
    let order: Vec<Digest> = ranked.iter().map(|c| c.digest).collect();
    assert_eq!(order, vec![digest(3), digest(2), digest(4), digest(1)]);
    assert_eq!(ranked[0].shared, 25);
    assert_eq!(ranked[1].shared, 20);

    let reply = backend.check_at(&CheckCmd::new(digest(9)).shingles(base()), DAY, T + 10);
    assert_eq!(reply.probability, 25.0 / 32.0);
}

#[test]
fn test_candidates_bounded_to_top_k() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    let cmds: Vec<FuzzyCmd> = (0..15u8)
        .map(|i| {
            FuzzyCmd::new(digest(i + 1))
                .shingles(variant(i as usize, 100 + i as u64))
                .weight(1)
        })
        .collect();
    commit(&backend, &cmds, T);

    let ranked = backend.candidates_at(&base(), None, DAY, T);
    assert_eq!(ranked.len(), MAX_CANDIDATES);
    assert_eq!(ranked[0].shared, SHINGLE_COUNT);
    assert!(ranked.windows(2).all(|w| w[0].shared >= w[1].shared));
    assert_eq!(ranked[MAX_CANDIDATES - 1].shared, SHINGLE_COUNT - 9);
}

// ==================== Filters ====================

#[test]
fn test_flag_filter() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    commit(
        &backend,
        &[
            FuzzyCmd::new(digest(1)).shingles(variant(2, 1)).flag(1),
            FuzzyCmd::new(digest(2)).shingles(variant(6, 2)).flag(2),
        ],
        T,
    );

    let any = backend.check_at(&CheckCmd::new(digest(9)).shingles(base()), DAY, T);
    assert_eq!(any.flag, 1);

    let only_two = CheckCmd::new(digest(9)).shingles(base()).flag_filter(2);
    let reply = backend.check_at(&only_two, DAY, T);
    assert_eq!(reply.flag, 2);
    assert_eq!(reply.probability, 26.0 / 32.0);

    let exact_wrong_flag = CheckCmd::new(digest(1)).flag_filter(3);
    assert!(!backend.check_at(&exact_wrong_flag, DAY, T).is_match());
}

#[test]
fn test_expire_excludes_without_deleting() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    commit(&backend, &[FuzzyCmd::new(digest(1)).shingles(base())], T);

    let exact = CheckCmd::new(digest(1));
    let similar = CheckCmd::new(digest(9)).shingles(base());
    assert!(!backend.check_at(&exact, 100, T + 200).is_match());
    assert!(!backend.check_at(&similar, 100, T + 200).is_match());
    assert_eq!(backend.count(), 1);

    assert!(backend.check_at(&exact, 100, T + 50).is_match());
    assert!(backend.check_at(&exact, 300, T + 200).is_match());
}

#[test]
fn test_stale_exact_hit_falls_back_to_fresh_candidate() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    commit(&backend, &[FuzzyCmd::new(digest(1)).shingles(base()).weight(1)], T);
    commit(
        &backend,
        &[FuzzyCmd::new(digest(2)).shingles(variant(4, 2)).weight(8)],
        T + 500,
    );

    let query = CheckCmd::new(digest(1)).shingles(base());
    let reply = backend.check_at(&query, 100, T + 550);
    assert_eq!(reply.probability, 28.0 / 32.0);
    assert_eq!(reply.weight, 8);
}

// ==================== Index Maintenance ====================

#[test]
fn test_readd_replaces_shingle_refs() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    commit(&backend, &[FuzzyCmd::new(digest(1)).shingles(base())], T);
    let other = variant(SHINGLE_COUNT, 42);
    commit(&backend, &[FuzzyCmd::new(digest(1)).shingles(other)], T + 1);

    assert!(!backend
        .check_at(&CheckCmd::new(digest(9)).shingles(base()), DAY, T + 1)
        .is_match());
    assert_eq!(
        backend
            .check_at(&CheckCmd::new(digest(9)).shingles(other), DAY, T + 1)
            .probability,
        1.0
    );
    assert_eq!(backend.stats().index_refs, SHINGLE_COUNT);
    assert!(!backend.rebuild_index());
}

#[test]
fn test_delete_drops_index_refs() {
    let dir = tempdir().unwrap();
    let backend = open(&dir);
    commit(&backend, &[FuzzyCmd::new(digest(1)).shingles(base())], T);
    assert_eq!(backend.stats().index_buckets, SHINGLE_COUNT);

    backend.prepare_update_at("mirror", T).unwrap();
    backend.del(&digest(1)).unwrap();
    backend.finish_update_at("mirror", true, T).unwrap();

    let stats = backend.stats();
    assert_eq!(stats.index_refs, 0);
    assert_eq!(stats.index_buckets, 0);
}

#[test]
fn test_index_rebuilt_identically_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fuzzy.db");
    let cmds: Vec<FuzzyCmd> = (0..6u8)
        .map(|i| {
            FuzzyCmd::new(digest(i + 1))
                .shingles(variant(i as usize * 3, i as u64))
                .weight(i as u64)
        })
        .collect();

    let before = {
        let backend = FuzzyBackend::open(&path, false).unwrap();
        commit(&backend, &cmds, T);
        backend.vacuum().unwrap();
        let ranked = backend.candidates_at(&base(), None, DAY, T);
        backend.close().unwrap();
        ranked
    };

    let backend = FuzzyBackend::open(&path, false).unwrap();
    assert_eq!(backend.candidates_at(&base(), None, DAY, T), before);
    assert!(!backend.rebuild_index());
    assert_eq!(backend.stats().shingled_entries, 6);
}
