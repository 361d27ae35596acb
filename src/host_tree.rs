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

use std::cell::Cell;
use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// A capability-restricted, permanently read-only view onto the host
/// filesystem root. Unlike [`crate::Object`] it has no base, no treesum,
/// and no write path: `write()` always fails, so a caller can never obtain
/// a mutable handle to the live host root through this abstraction.
pub struct HostTree {
    readers: Cell<u32>,
}

impl HostTree {
    pub(crate) fn new() -> HostTree {
        HostTree {
            readers: Cell::new(0),
        }
    }

    /// Always succeeds, yielding the host root.
    pub fn read(&self) -> StoreResult<HostReadGuard<'_>> {
        self.readers.set(self.readers.get() + 1);
        Ok(HostReadGuard { tree: self })
    }

    /// Always fails: callers must never receive a mutable path to the host
    /// root through this type. If a caller somehow obtained a writable
    /// path some other way and tried to use it, the filesystem itself is
    /// the backstop (`EROFS` or equivalent on the read path this type
    /// hands out).
    pub fn write(&self) -> StoreResult<()> {
        Err(StoreError::state(
            "the host tree is permanently read-only",
        ))
    }
}

/// A scoped read lease over the host root, yielded by [`HostTree::read`].
pub struct HostReadGuard<'a> {
    tree: &'a HostTree,
}

impl HostReadGuard<'_> {
    pub fn path(&self) -> &Path {
        Path::new("/")
    }
}

impl Drop for HostReadGuard<'_> {
    fn drop(&mut self) {
        self.tree.readers.set(self.tree.readers.get() - 1);
    }
}
