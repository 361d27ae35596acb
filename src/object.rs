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

use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::instrument;

use crate::error::{StoreError, StoreResult};
use crate::file_util;
use crate::store::Layout;
use crate::treesum;

struct ObjectState {
    /// The tree's current `tmp/` entry. Allocated eagerly at construction
    /// and again immediately after each commit, so it is always valid for
    /// an `Object` in the `usable` state.
    path: PathBuf,
    base: Option<String>,
    treesum_cache: Option<String>,
    readers: u32,
    writer: bool,
    /// Whether the copy-on-write layer has been materialized into `path`
    /// since construction or the last commit. While `false` and `base` is
    /// set, reads are served directly from the base's ref path.
    materialized: bool,
    committed: bool,
    usable: bool,
}

/// A mutable or read-only working tree under `tmp/`.
///
/// Only one of "any number of readers" or "a single writer" may be active
/// at a time; see [`Object::read`] and [`Object::write`]. The counters
/// exist to catch lease-discipline mistakes within one logical caller, not
/// to synchronize across threads — `Object` holds its state in `RefCell`s
/// and is neither `Send` nor `Sync`.
pub struct Object {
    layout: Rc<Layout>,
    state: RefCell<ObjectState>,
}

impl Object {
    pub(crate) fn new(layout: Rc<Layout>, path: PathBuf, base: Option<&str>) -> Object {
        Object {
            layout,
            state: RefCell::new(ObjectState {
                path,
                base: base.map(String::from),
                treesum_cache: None,
                readers: 0,
                writer: false,
                materialized: false,
                committed: false,
                usable: true,
            }),
        }
    }

    fn effective_read_path(&self, state: &ObjectState) -> PathBuf {
        if !state.materialized {
            if let Some(base) = &state.base {
                return self.layout.ref_path(base);
            }
        }
        state.path.clone()
    }

    /// Acquires a read lease and returns a scoped guard to the tree's
    /// current content. Any number of reads may be nested or overlap, but
    /// none may overlap a write.
    pub fn read(&self) -> StoreResult<ReadGuard<'_>> {
        let mut state = self.state.borrow_mut();
        if !state.usable {
            return Err(StoreError::state("working tree is sealed"));
        }
        if state.writer {
            return Err(StoreError::state("cannot read while a writer is active"));
        }
        state.readers += 1;
        let path = self.effective_read_path(&state);
        Ok(ReadGuard { object: self, path })
    }

    /// Acquires the exclusive write lease, materializing the copy-on-write
    /// layer from `base` on first use, and returns a scoped guard to the
    /// tree's mutable working directory.
    #[instrument(skip(self))]
    pub fn write(&self) -> StoreResult<WriteGuard<'_>> {
        let mut state = self.state.borrow_mut();
        if !state.usable {
            return Err(StoreError::state("working tree is sealed"));
        }
        if state.writer {
            return Err(StoreError::state("cannot write while a writer is already active"));
        }
        if state.readers > 0 {
            return Err(StoreError::state("cannot write while a reader is active"));
        }
        if !state.materialized {
            if let Some(base) = state.base.clone() {
                let base_path = self.layout.ref_path(&base);
                file_util::clone_tree_into(&base_path, &state.path)?;
            }
            state.materialized = true;
        }
        state.writer = true;
        let path = state.path.clone();
        Ok(WriteGuard { object: self, path })
    }

    /// The tree's content hash, computed (and cached until the next write)
    /// by taking an internal read lease. Fails if a writer is active.
    pub fn treesum(&self) -> StoreResult<String> {
        {
            let state = self.state.borrow();
            if state.writer {
                return Err(StoreError::state("cannot read treesum while a writer is active"));
            }
            if let Some(cached) = &state.treesum_cache {
                return Ok(cached.clone());
            }
        }
        let guard = self.read()?;
        let sum = treesum::treesum_of_path(guard.path())?;
        drop(guard);
        self.state.borrow_mut().treesum_cache = Some(sum.clone());
        Ok(sum)
    }

    /// The ref this tree currently derives from, if any. Readable only
    /// while no lease is held.
    pub fn base(&self) -> StoreResult<Option<String>> {
        let state = self.state.borrow();
        if !state.usable {
            return Err(StoreError::state("working tree is sealed"));
        }
        if state.writer || state.readers > 0 {
            return Err(StoreError::state("cannot inspect base while a lease is held"));
        }
        Ok(state.base.clone())
    }

    /// Re-links this tree's base. Only defined before any content has been
    /// written since construction or the last commit; reassigning after a
    /// write is a `StateError` rather than guessed semantics.
    pub fn set_base(&self, base: Option<&str>) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.usable {
            return Err(StoreError::state("working tree is sealed"));
        }
        if state.writer || state.readers > 0 {
            return Err(StoreError::state("cannot change base while a lease is held"));
        }
        if state.materialized {
            return Err(StoreError::state(
                "base cannot be reassigned after content has been written",
            ));
        }
        state.base = base.map(String::from);
        state.treesum_cache = None;
        Ok(())
    }

    /// Promotes this tree into `objects/<treesum>` (or discards it in favor
    /// of an identical existing object) and links `refs/<ref_name>` to it.
    pub(crate) fn commit(&self, ref_name: &str) -> StoreResult<String> {
        {
            let state = self.state.borrow();
            if !state.usable {
                return Err(StoreError::state("working tree is sealed"));
            }
            if state.writer || state.readers > 0 {
                return Err(StoreError::state(
                    "cannot commit a tree with an active reader or writer",
                ));
            }
        }

        let treesum = self.treesum()?;
        let objects_path = self.layout.object_path(&treesum);
        let my_tmp_path = self.state.borrow().path.clone();

        let promoted = file_util::persist_content_addressed_dir(&my_tmp_path, &objects_path)?;
        if !promoted {
            // A byte-identical object already exists — including the case
            // where this tree was never materialized and `my_tmp_path` is
            // still empty, its treesum having been lazily reused from
            // `base`. Either way, our own tmp copy contributes nothing.
            let _ = fs::remove_dir_all(&my_tmp_path);
        }

        let ref_path = self.layout.ref_path(ref_name);
        symlink(&objects_path, &ref_path)?;

        let new_tmp_path = self.layout.new_tmp_dir()?;
        let mut state = self.state.borrow_mut();
        state.path = new_tmp_path;
        state.base = Some(ref_name.to_string());
        state.materialized = false;
        state.committed = true;
        state.treesum_cache = Some(treesum.clone());
        Ok(treesum)
    }

    /// Whether this tree has ever been committed. Readable only while no
    /// lease is held, matching `base`'s access discipline.
    pub fn is_committed(&self) -> StoreResult<bool> {
        let state = self.state.borrow();
        if !state.usable {
            return Err(StoreError::state("working tree is sealed"));
        }
        if state.writer || state.readers > 0 {
            return Err(StoreError::state(
                "cannot inspect commit status while a lease is held",
            ));
        }
        Ok(state.committed)
    }

    /// Ends this tree's owning scope: marks it permanently unusable and, if
    /// its current `tmp/` entry was never committed, removes it from disk.
    /// Idempotent; also invoked by `Drop`, so callers don't need to call
    /// this explicitly on the ordinary success path.
    pub fn close(&self) {
        let mut state = self.state.borrow_mut();
        if !state.usable {
            return;
        }
        state.usable = false;
        let _ = fs::remove_dir_all(&state.path);
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        self.close();
    }
}

/// A scoped read lease over an [`Object`]'s content, yielded by
/// [`Object::read`]. Dropping it releases the lease.
pub struct ReadGuard<'a> {
    object: &'a Object,
    path: PathBuf,
}

impl ReadGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.object.state.borrow_mut().readers -= 1;
    }
}

/// A scoped write lease over an [`Object`]'s mutable working directory,
/// yielded by [`Object::write`]. Dropping it releases the lease and
/// invalidates the cached treesum.
pub struct WriteGuard<'a> {
    object: &'a Object,
    path: PathBuf,
}

impl WriteGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.object.state.borrow_mut();
        state.writer = false;
        state.treesum_cache = None;
    }
}
