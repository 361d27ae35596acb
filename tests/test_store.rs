// Copyright 2020 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::os::unix::fs::MetadataExt;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use test_case::test_case;
use treestore::{StoreError, Store};

fn count_entries(dir: &std::path::Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[test]
fn commit_one_tree() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();

    let tree = store.new(None).unwrap();
    let guard = tree.write().unwrap();
    fs::write(guard.path().join("A"), b"hello").unwrap();
    drop(guard);
    store.commit(&tree, "a").unwrap();

    assert_eq!(count_entries(&root.path().join("refs")), 1);
    assert_eq!(count_entries(&root.path().join("objects")), 1);
    assert!(root.path().join("refs/a/A").exists());
}

#[test]
fn dedup_two_refs() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();

    let a = store.new(None).unwrap();
    let guard = a.write().unwrap();
    fs::write(guard.path().join("A"), b"hello").unwrap();
    drop(guard);
    store.commit(&a, "a").unwrap();

    let b = store.new(None).unwrap();
    let guard = b.write().unwrap();
    fs::copy(root.path().join("refs/a/A"), guard.path().join("A")).unwrap();
    drop(guard);
    store.commit(&b, "b").unwrap();

    assert_eq!(count_entries(&root.path().join("refs")), 2);
    assert_eq!(count_entries(&root.path().join("objects")), 1);
    assert!(root.path().join("refs/b/A").exists());
}

#[test]
fn chained_bases() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();

    let a = store.new(None).unwrap();
    let guard = a.write().unwrap();
    fs::write(guard.path().join("A"), b"hello").unwrap();
    drop(guard);
    store.commit(&a, "a").unwrap();

    let b = store.new(Some("a")).unwrap();
    store.commit(&b, "b").unwrap();

    let c = store.new(Some("b")).unwrap();
    let guard = c.write().unwrap();
    fs::write(guard.path().join("C"), b"world").unwrap();
    drop(guard);
    store.commit(&c, "c").unwrap();

    assert_eq!(count_entries(&root.path().join("refs")), 3);
    assert_eq!(count_entries(&root.path().join("objects")), 2);
    assert!(root.path().join("refs/c/A").exists());
    assert!(root.path().join("refs/c/C").exists());
}

#[test]
fn copy_on_write_inode_sharing() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();

    let x = store.new(None).unwrap();
    let guard = x.write().unwrap();
    fs::write(guard.path().join("data"), b"original").unwrap();
    drop(guard);
    let x_sum = store.commit(&x, "x").unwrap();

    let derived = store.new(Some("x")).unwrap();
    let read_guard = derived.read().unwrap();
    let base_ino = fs::metadata(root.path().join("refs/x/data")).unwrap().ino();
    let derived_ino = fs::metadata(read_guard.path().join("data")).unwrap().ino();
    assert_eq!(base_ino, derived_ino);
    drop(read_guard);

    let write_guard = derived.write().unwrap();
    fs::write(write_guard.path().join("data"), b"changed").unwrap();
    let written_ino = fs::metadata(write_guard.path().join("data")).unwrap().ino();
    drop(write_guard);

    assert_ne!(base_ino, written_ino);
    assert_eq!(fs::read(root.path().join("refs/x/data")).unwrap(), b"original");
    assert_ne!(derived.treesum().unwrap(), x_sum);
}

#[test]
fn lease_discipline() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();
    let tree = store.new(None).unwrap();

    let r1 = tree.read().unwrap();
    let r2 = tree.read().unwrap();
    assert_matches!(tree.write(), Err(StoreError::State(_)));
    drop(r1);
    drop(r2);

    let w = tree.write().unwrap();
    assert_matches!(tree.read(), Err(StoreError::State(_)));
    assert_matches!(tree.write(), Err(StoreError::State(_)));
    drop(w);

    tree.write().unwrap();
}

#[test]
fn treesum_rejects_a_populated_cache_while_a_writer_is_active() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();
    let tree = store.new(None).unwrap();

    let guard = tree.write().unwrap();
    fs::write(guard.path().join("A"), b"hello").unwrap();
    drop(guard);
    // Populates treesum_cache.
    let sum_before = tree.treesum().unwrap();

    // A second write reuses the already-materialized tree, so nothing
    // forces the stale cache to be recomputed on entry; it must still be
    // rejected outright while this writer is active.
    let guard = tree.write().unwrap();
    fs::write(guard.path().join("A"), b"changed").unwrap();
    assert_matches!(tree.treesum(), Err(StoreError::State(_)));
    drop(guard);

    assert_ne!(tree.treesum().unwrap(), sum_before);
}

#[test]
fn host_tree_is_read_only() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();
    let host = store.host_tree();

    let guard = host.read().unwrap();
    assert_eq!(guard.path(), std::path::Path::new("/"));
    assert!(fs::read_dir(guard.path()).is_ok());

    assert_matches!(host.write(), Err(StoreError::State(_)));
}

#[test]
fn sealed_tree_rejects_further_use() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();
    let tree = store.new(None).unwrap();

    let tmp_path = tree.write().unwrap().path().to_path_buf();
    tree.close();

    assert_matches!(tree.write(), Err(StoreError::State(_)));
    assert!(!tmp_path.exists());
}

#[test]
fn treesum_is_pure_across_revert() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();

    let tree = store.new(None).unwrap();
    let guard = tree.write().unwrap();
    fs::write(guard.path().join("A"), b"hello").unwrap();
    drop(guard);
    let sum_before = tree.treesum().unwrap();

    let guard = tree.write().unwrap();
    fs::write(guard.path().join("A"), b"changed").unwrap();
    drop(guard);
    assert_ne!(tree.treesum().unwrap(), sum_before);

    let guard = tree.write().unwrap();
    fs::write(guard.path().join("A"), b"hello").unwrap();
    drop(guard);
    assert_eq!(tree.treesum().unwrap(), sum_before);
}

#[test]
fn unwritten_tree_scope_exit_leaves_no_tmp_entry() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();
    let tmp_path;
    {
        let tree = store.new(None).unwrap();
        tmp_path = tree.write().unwrap().path().to_path_buf();
    }
    assert!(!tmp_path.exists());
}

#[test]
fn base_reassignment_after_write_is_a_state_error() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();

    let a = store.new(None).unwrap();
    let guard = a.write().unwrap();
    fs::write(guard.path().join("A"), b"x").unwrap();
    drop(guard);
    store.commit(&a, "a").unwrap();

    let tree = store.new(None).unwrap();
    let guard = tree.write().unwrap();
    fs::write(guard.path().join("B"), b"y").unwrap();
    drop(guard);

    assert_matches!(tree.set_base(Some("a")), Err(StoreError::State(_)));
}

#[test_case("read" ; "read after close")]
#[test_case("write" ; "write after close")]
#[test_case("base" ; "base after close")]
#[test_case("is_committed" ; "is_committed after close")]
fn every_operation_rejects_a_sealed_tree(op: &str) {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();
    let tree = store.new(None).unwrap();
    tree.close();

    let result: Result<(), StoreError> = match op {
        "read" => tree.read().map(drop),
        "write" => tree.write().map(drop),
        "base" => tree.base().map(drop),
        "is_committed" => tree.is_committed().map(drop),
        other => panic!("unknown operation {other}"),
    };
    assert_matches!(result, Err(StoreError::State(_)));
}

#[test]
fn recommitting_same_tree_after_further_writes() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();

    let tree = store.new(None).unwrap();
    let guard = tree.write().unwrap();
    fs::write(guard.path().join("A"), b"hello").unwrap();
    drop(guard);
    assert!(!store.contains("a"));
    store.commit(&tree, "a").unwrap();
    assert!(store.contains("a"));

    // The same handle keeps going: its next write re-materializes from the
    // base it was just committed onto, so "B" lands alongside a carried-over
    // copy of "A" rather than replacing it.
    let guard = tree.write().unwrap();
    fs::write(guard.path().join("B"), b"world").unwrap();
    drop(guard);
    store.commit(&tree, "b").unwrap();

    assert!(root.path().join("refs/a/A").exists());
    assert!(!root.path().join("refs/a/B").exists());
    assert!(root.path().join("refs/b/A").exists());
    assert!(root.path().join("refs/b/B").exists());
}

#[test]
fn store_close_sweeps_tmp_entries_of_trees_still_in_scope() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();

    let tree = store.new(None).unwrap();
    assert_eq!(count_entries(&root.path().join("tmp")), 1);
    let guard = tree.write().unwrap();
    fs::write(guard.path().join("A"), b"hello").unwrap();
    drop(guard);

    // `tree` is still alive and was never committed or explicitly closed,
    // but the store sweeps every `tmp/` entry it created regardless.
    store.close().unwrap();
    assert_eq!(count_entries(&root.path().join("tmp")), 0);
}

#[test]
fn resolve_ref_of_none_is_always_none() {
    let root = TempDir::new().unwrap();
    let store = Store::open(root.path()).unwrap();
    assert_eq!(store.resolve_ref(None), None);

    let tree = store.new(None).unwrap();
    store.commit(&tree, "a").unwrap();
    assert_eq!(store.resolve_ref(None), None);
    assert!(store.resolve_ref(Some("a")).is_some());
    assert!(store.contains("a"));
    assert!(!store.contains("nope"));
}
