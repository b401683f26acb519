//! Exercises the one property a single process can never demonstrate:
//! `fcntl` record locks are scoped per-process, so two file descriptors
//! open in the same process never contend with each other. This spawns
//! real child processes (re-executing this same test binary, filtered
//! down to just this test) that each insert a disjoint block of keys
//! into the same database concurrently, then checks that every key
//! survived and none collided.

use std::env;
use std::path::PathBuf;
use std::process::Command;

use chainkv::{Database, Options, StoreMode, StoreOutcome};

const WORKER_ENV: &str = "CHAINKV_CONCURRENCY_WORKER";
const PATH_ENV: &str = "CHAINKV_CONCURRENCY_DB_PATH";

const WORKERS: u32 = 6;
const KEYS_PER_WORKER: u32 = 50;

fn worker_keys(worker_id: u32) -> impl Iterator<Item = String> {
    (0..KEYS_PER_WORKER).map(move |i| format!("w{}-k{}", worker_id, i))
}

#[test]
fn concurrent_disjoint_key_inserts_all_survive() {
    if let Ok(id) = env::var(WORKER_ENV) {
        // We are a re-exec'd worker: open the shared database and insert
        // our block of keys, then exit without spawning anything further.
        let worker_id: u32 = id.parse().expect("worker id must be numeric");
        let db_path = env::var(PATH_ENV).expect("worker requires db path");
        let mut db = Database::open_existing(&db_path, Options::default()).expect("worker open");
        for key in worker_keys(worker_id) {
            let outcome = db.store(key.as_bytes(), b"payload", StoreMode::Insert);
            assert_eq!(outcome, StoreOutcome::Inserted, "worker {} key {}", worker_id, key);
        }
        return;
    }

    let mut dir = std::env::temp_dir();
    dir.push(format!("chainkv-concurrency-{}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    let db_path: PathBuf = dir.join("db");

    // Create the database up front so every worker opens an existing,
    // already-headered pair of files rather than racing each other on
    // first creation.
    drop(Database::create(&db_path, Options::default()).unwrap());

    let exe = env::current_exe().expect("current_exe");
    let mut children = Vec::new();
    for worker_id in 0..WORKERS {
        let child = Command::new(&exe)
            .arg("concurrent_disjoint_key_inserts_all_survive")
            .arg("--exact")
            .arg("--test-threads=1")
            .env(WORKER_ENV, worker_id.to_string())
            .env(PATH_ENV, &db_path)
            .spawn()
            .expect("spawn worker process");
        children.push((worker_id, child));
    }

    for (worker_id, child) in children {
        let status = child.wait_with_output().expect("wait for worker").status;
        assert!(status.success(), "worker {} exited with {:?}", worker_id, status);
    }

    let mut db = Database::open_existing(&db_path, Options::default()).unwrap();
    for worker_id in 0..WORKERS {
        for key in worker_keys(worker_id) {
            assert_eq!(db.fetch(key.as_bytes()), Some(b"payload".to_vec()), "missing key {}", key);
        }
    }

    db.rewind();
    let mut count = 0;
    while db.next_record().is_some() {
        count += 1;
    }
    assert_eq!(count, (WORKERS * KEYS_PER_WORKER) as usize);

    std::fs::remove_dir_all(&dir).unwrap();
}
