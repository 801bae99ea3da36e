
use marker_index::{
    host_mem::{
        MemGrid,
        MemMetadata,
    },
    thread_pool::WorkerPool,
    CascadingFilter,
    ChunkPos,
    Host,
    IndexSettings,
    MarkerService,
    Position,
    TieredIndex,
};
use chunk_data::ChunkGrid;
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::Arc,
    thread,
    time::{
        Duration,
        Instant,
    },
};
use rand::prelude::*;


const THREADS: i32 = 8;
const OPS: usize = 10_000;

#[test]
fn concurrent_mutation_loses_nothing() {
    let index = Arc::new(TieredIndex::new(ChunkGrid::default()));
    let handles = (0..THREADS)
        .map(|t| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                let mut expected = HashSet::new();
                for _ in 0..OPS {
                    // interleave positions so threads share chunks but never positions
                    let x = rng.gen_range(0..64) * THREADS + t;
                    let z = rng.gen_range(-32..32);
                    let pos = Position::new("overworld", x, 64, z);
                    if rng.gen_bool(0.6) {
                        index.register(&pos);
                        expected.insert(pos);
                    } else {
                        index.unregister(&pos);
                        expected.remove(&pos);
                    }
                }
                expected
            })
        })
        .collect::<Vec<_>>();

    let mut expected = HashSet::new();
    for handle in handles {
        expected.extend(handle.join().expect("worker panicked"));
    }

    assert_eq!(index.len(), expected.len());
    let actual = index.snapshot().into_iter().collect::<HashSet<_>>();
    assert_eq!(actual, expected);

    let grid = index.grid();
    let mut by_chunk: HashMap<ChunkPos, HashSet<Position>> = HashMap::new();
    for pos in &expected {
        by_chunk.entry(grid.chunk_of(pos)).or_default().insert(pos.clone());
    }
    assert_eq!(index.stats().total_chunks, by_chunk.len());
    for (chunk, members) in &by_chunk {
        assert_eq!(&index.members_of_chunk(chunk), members);
    }
}

#[test]
fn cascading_filter_agrees_with_is_marked() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let index = TieredIndex::new(ChunkGrid::default());
    let worlds = ["overworld", "nether", "the_end"];
    let random_pos = |rng: &mut StdRng| Position::new(
        worlds[rng.gen_range(0..2)],
        rng.gen_range(-100..100),
        rng.gen_range(0..4),
        rng.gen_range(-100..100),
    );
    for _ in 0..2_000 {
        let pos = random_pos(&mut rng);
        if rng.gen_bool(0.7) {
            index.register(&pos);
        } else {
            index.unregister(&pos);
        }
    }

    let filter = CascadingFilter::new(&index);
    for _ in 0..20_000 {
        let pos = Position::new(
            worlds[rng.gen_range(0..worlds.len())],
            rng.gen_range(-120..120),
            rng.gen_range(0..4),
            rng.gen_range(-120..120),
        );
        assert_eq!(filter.passes(&pos), index.is_marked(&pos), "{}", pos);
    }
}

// poll until `cond` holds, or give up after a generous deadline
fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn worker_pool_serializes_record_writes_per_chunk() {
    let grid = Arc::new(MemGrid::new());
    let metadata = Arc::new(MemMetadata::new());
    let service = MarkerService::new(IndexSettings::default(), Host {
        grid: grid.clone(),
        metadata: metadata.clone(),
        scheduler: Arc::new(WorkerPool::with_threads(4)),
    });

    // few chunks, many writers, so unserialized read-modify-writes would lose entries
    let handles = (0..THREADS)
        .map(|t| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                for i in 0..50 {
                    service.register(&Position::new("overworld", i % 32, t, i / 32));
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("writer panicked");
    }

    let chunks = [ChunkPos::new("overworld", 0, 0), ChunkPos::new("overworld", 1, 0)];
    let settled = eventually(|| chunks
        .iter()
        .all(|chunk| {
            let record = metadata.get(chunk, "marked_positions").unwrap_or_default();
            record.split(';').filter(|entry| !entry.is_empty()).count()
                == service.members_of_chunk(chunk).len()
        }));
    assert!(settled, "records never caught up with index");
    assert_eq!(service.stats().total_members, (THREADS * 50) as usize);
    assert_eq!(service.persist_failures(), 0);
}

#[test]
fn worker_pool_drives_periodic_sweep() {
    let grid = Arc::new(MemGrid::new());
    let service = MarkerService::new(
        IndexSettings { sweep_interval_secs: 1, ..Default::default() },
        Host {
            grid: grid.clone(),
            metadata: Arc::new(MemMetadata::new()),
            scheduler: Arc::new(WorkerPool::with_threads(2)),
        },
    );
    let pos = Position::new("overworld", 0, 0, 0);
    grid.set_occupied(&pos);
    service.register(&pos);
    service.start();
    grid.set_empty(&pos);

    assert!(eventually(|| !service.is_marked(&pos)), "sweep never ran");
    assert_eq!(service.stats().sweep_removed, 1);
    service.shutdown();
}
