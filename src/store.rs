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
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::instrument;

use crate::error::StoreResult;
use crate::host_tree::HostTree;
use crate::object::Object;

/// Owns the three well-known subdirectories of a store root and the naming
/// scheme within them. `Object` keeps its own `Rc<Layout>` so it can resolve
/// its base ref and allocate a fresh `tmp/` entry after a commit without
/// reaching back through a borrowed `Store`.
pub(crate) struct Layout {
    root: PathBuf,
}

impl Layout {
    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn refs_dir(&self) -> PathBuf {
        self.root.join("refs")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub(crate) fn object_path(&self, treesum: &str) -> PathBuf {
        self.objects_dir().join(treesum)
    }

    pub(crate) fn ref_path(&self, name: &str) -> PathBuf {
        self.refs_dir().join(name)
    }

    /// Allocates a uniquely named, already-created, empty directory under
    /// `tmp/` and hands back its path without tempfile's usual
    /// delete-on-drop behavior: the working tree that owns this directory
    /// manages its own lifecycle via `Object::close`.
    pub(crate) fn new_tmp_dir(&self) -> std::io::Result<PathBuf> {
        Ok(tempfile::Builder::new()
            .prefix("work-")
            .tempdir_in(self.tmp_dir())?
            .into_path())
    }
}

/// A handle to a root directory holding a content-addressed object store.
///
/// `objects/` holds committed, immutable trees named by their treesum.
/// `refs/` holds named links into `objects/`. `tmp/` holds working trees not
/// yet committed; the store owns every entry under it and sweeps them on
/// [`Store::close`].
pub struct Store {
    layout: Rc<Layout>,
}

impl Store {
    /// Binds to `root`, creating `objects/`, `refs/`, and `tmp/` if absent.
    /// Idempotent: calling this again on an existing store root is a no-op
    /// beyond the directory checks.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Store> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("refs"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Store {
            layout: Rc::new(Layout { root }),
        })
    }

    /// Allocates a fresh working tree under `tmp/`. If `base` is given, the
    /// tree derives its initial content from that ref lazily: nothing is
    /// copied until the first `write()`.
    #[instrument(skip(self))]
    pub fn new(&self, base: Option<&str>) -> StoreResult<Object> {
        let path = self.layout.new_tmp_dir()?;
        Ok(Object::new(Rc::clone(&self.layout), path, base))
    }

    /// Computes `tree`'s treesum, promotes its materialized content into
    /// `objects/<treesum>` (or discards it in favor of an existing object
    /// with the same treesum), and links `refs/<ref_name>` to it. `tree`
    /// must not be currently held by any reader or writer.
    pub fn commit(&self, tree: &Object, ref_name: &str) -> StoreResult<String> {
        tree.commit(ref_name)
    }

    /// True iff `refs/<ref_name>` exists.
    pub fn contains(&self, ref_name: &str) -> bool {
        self.layout.ref_path(ref_name).exists()
    }

    /// The absolute path of `refs/<ref_name>`, or `None` if it doesn't
    /// exist. `resolve_ref(None)` is always `None`.
    pub fn resolve_ref(&self, ref_name: Option<&str>) -> Option<PathBuf> {
        let ref_name = ref_name?;
        let path = self.layout.ref_path(ref_name);
        path.exists().then_some(path)
    }

    /// A read-only view onto the host filesystem root. It shares none of
    /// the store's on-disk state; the method lives here only so callers
    /// obtain it the same way they obtain a working tree.
    pub fn host_tree(&self) -> HostTree {
        HostTree::new()
    }

    /// Removes every entry under `tmp/` that this store created. Does not
    /// touch `objects/` or `refs/`. Safe to call more than once.
    pub fn close(&self) -> StoreResult<()> {
        let tmp_dir = self.layout.tmp_dir();
        let entries = match fs::read_dir(&tmp_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            fs::remove_dir_all(entry.path())?;
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
