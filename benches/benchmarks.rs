//! Criterion benchmarks for the fuzzy store.

use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use tempfile::{tempdir, NamedTempFile};

use fuzzy_store::format::{StoreReader, StoreWriter};
use fuzzy_store::store::EntryTable;
use fuzzy_store::types::{CheckCmd, Digest, FuzzyCmd, ShingleSet, DIGEST_LEN, SHINGLE_COUNT};
use fuzzy_store::FuzzyBackend;

const NOW: u64 = 1_700_000_000;
const DAY: u64 = 86_400;

fn random_digest(rng: &mut impl Rng) -> Digest {
    let mut bytes = [0u8; DIGEST_LEN];
    rng.fill(&mut bytes[..]);
    Digest::new(bytes)
}

/// Shingles drawn from a small value space so that unrelated sets still
/// share a few positions, like real near-duplicate traffic.
fn random_shingles(rng: &mut impl Rng) -> ShingleSet {
    let mut values = [0u64; SHINGLE_COUNT];
    for v in &mut values {
        *v = rng.gen_range(0..4_096);
    }
    ShingleSet::new(values)
}

/// Build a populated table directly, bypassing the journal.
fn make_table(entry_count: usize) -> (EntryTable, Vec<ShingleSet>) {
    let mut rng = rand::thread_rng();
    let mut table = EntryTable::new(1);
    let mut sets = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let shingles = random_shingles(&mut rng);
        table.upsert(
            random_digest(&mut rng),
            rng.gen_range(1..5),
            rng.gen_range(1..100),
            DAY,
            Some(shingles),
            NOW - rng.gen_range(0..DAY),
        );
        sets.push(shingles);
    }
    (table, sets)
}

fn bench_upsert(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let mut table = EntryTable::new(1);

    c.bench_function("upsert", |b| {
        b.iter(|| {
            let shingles = random_shingles(&mut rng);
            table.upsert(random_digest(&mut rng), 1, 1, DAY, Some(shingles), NOW);
        })
    });
}

fn bench_check_exact_10k(c: &mut Criterion) {
    let (table, _) = make_table(10_000);
    let digest = table.entries().next().map(|e| e.digest).unwrap();
    let cmd = CheckCmd::new(digest);

    c.bench_function("check_exact_10k", |b| {
        b.iter(|| table.check(&cmd, DAY, NOW, 1))
    });
}

fn bench_check_similar_10k(c: &mut Criterion) {
    let (table, sets) = make_table(10_000);
    let mut rng = rand::thread_rng();
    let mut values = *sets[0].values();
    for v in values.iter_mut().take(8) {
        *v = rng.gen();
    }
    let cmd = CheckCmd::new(random_digest(&mut rng)).shingles(ShingleSet::new(values));

    c.bench_function("check_similar_10k", |b| {
        b.iter(|| table.check(&cmd, DAY, NOW, 1))
    });
}

fn bench_rebuild_index_10k(c: &mut Criterion) {
    let (mut table, _) = make_table(10_000);

    c.bench_function("rebuild_index_10k", |b| b.iter(|| table.rebuild_index()));
}

fn bench_write_snapshot_10k(c: &mut Criterion) {
    let (table, _) = make_table(10_000);
    let writer = StoreWriter::new(true);

    c.bench_function("write_snapshot_10k", |b| {
        b.iter(|| {
            let tmp = NamedTempFile::new().unwrap();
            writer.write_synced(&table, tmp.path()).unwrap();
        })
    });
}

fn bench_read_snapshot_10k(c: &mut Criterion) {
    let (table, _) = make_table(10_000);
    let tmp = NamedTempFile::new().unwrap();
    StoreWriter::new(true)
        .write_synced(&table, tmp.path())
        .unwrap();

    c.bench_function("read_snapshot_10k", |b| {
        b.iter(|| {
            let _ = StoreReader::read_from_file(tmp.path()).unwrap();
        })
    });
}

fn bench_commit_100(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let backend = FuzzyBackend::open(dir.path().join("bench.db"), false).unwrap();
    let mut rng = rand::thread_rng();

    c.bench_function("commit_100", |b| {
        b.iter(|| {
            backend.prepare_update("bench").unwrap();
            for _ in 0..100 {
                let cmd = FuzzyCmd::new(random_digest(&mut rng))
                    .shingles(random_shingles(&mut rng));
                backend.add(&cmd).unwrap();
            }
            backend.finish_update("bench", true).unwrap();
        })
    });
}

fn bench_sync_10k(c: &mut Criterion) {
    let (table, _) = make_table(10_000);
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.db");
    StoreWriter::new(true).replace_file(&table, &path).unwrap();
    let backend = FuzzyBackend::open(&path, false).unwrap();

    c.bench_function("sync_10k", |b| {
        b.iter(|| backend.sync_at(2 * DAY, true, NOW).unwrap())
    });
}

criterion_group!(
    benches,
    bench_upsert,
    bench_check_exact_10k,
    bench_check_similar_10k,
    bench_rebuild_index_10k,
    bench_write_snapshot_10k,
    bench_read_snapshot_10k,
    bench_commit_100,
    bench_sync_10k,
);
criterion_main!(benches);
