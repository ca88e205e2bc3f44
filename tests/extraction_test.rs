use blitzpack::extract::{parse_archive, restore_archive, worker_count, ExtractOptions};
use blitzpack::{build_archive, CompressOptions, ProgressTracker};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Deterministic, poorly compressible bytes.
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

fn populate(root: &Path, count: usize) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("group{}/file{:03}.bin", i % 4, i);
        let data = if i % 5 == 0 {
            Vec::new()
        } else {
            noise(512 + i * 97, i as u64)
        };
        let path = root.join(&name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, &data).unwrap();
        files.push((name, data));
    }
    files
}

#[test]
fn more_entries_than_cpus_for_every_pool_size() {
    let count = num_cpus::get() + 5;
    let src = tempdir().unwrap();
    let root = src.path().join("many");
    let files = populate(&root, count);
    let archive = src.path().join("many.bzpk");
    build_archive(
        &root,
        &archive,
        &CompressOptions::default(),
        &ProgressTracker::silent(),
    )
    .unwrap();

    for threads in 1..=count {
        let out = tempdir().unwrap();
        restore_archive(
            &archive,
            Some(out.path()),
            &ExtractOptions { threads },
            &ProgressTracker::silent(),
        )
        .unwrap_or_else(|e| panic!("restore with {threads} threads failed: {e}"));

        for (name, data) in &files {
            let restored = fs::read(out.path().join(name)).unwrap();
            assert_eq!(&restored, data, "{name} differs with {threads} threads");
        }
    }
}

#[test]
fn oversubscribed_pool_still_completes() {
    let src = tempdir().unwrap();
    let root = src.path().join("few");
    let files = populate(&root, 3);
    let archive = src.path().join("few.bzpk");
    build_archive(
        &root,
        &archive,
        &CompressOptions { level: 19 },
        &ProgressTracker::silent(),
    )
    .unwrap();

    let out = tempdir().unwrap();
    restore_archive(
        &archive,
        Some(out.path()),
        &ExtractOptions {
            threads: num_cpus::get() * 4,
        },
        &ProgressTracker::silent(),
    )
    .unwrap();
    for (name, data) in &files {
        assert_eq!(&fs::read(out.path().join(name)).unwrap(), data);
    }
    assert_eq!(worker_count(num_cpus::get() * 4, files.len()), 3);
}

#[test]
fn tasks_follow_sorted_walk_order() {
    let src = tempdir().unwrap();
    let root = src.path().join("ordered");
    populate(&root, 8);
    let archive = src.path().join("ordered.bzpk");
    build_archive(
        &root,
        &archive,
        &CompressOptions::default(),
        &ProgressTracker::silent(),
    )
    .unwrap();

    let parsed = parse_archive(&archive, Some(src.path())).unwrap();
    let names: Vec<_> = parsed.tasks.iter().map(|t| t.rel_path.clone()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert!(parsed.tasks.iter().all(|t| t.dest_path.starts_with(src.path())));
}
