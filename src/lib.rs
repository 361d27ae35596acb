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

//! A content-addressed object store for filesystem trees.
//!
//! A store is a root directory holding three well-known subdirectories:
//! `objects/` (committed, immutable trees named by their treesum),
//! `refs/` (named links into `objects/`), and `tmp/` (working trees not
//! yet committed). Callers obtain a mutable [`Object`] via [`Store::new`],
//! write into it through its lease-guarded [`Object::write`], and
//! [`Store::commit`] it under a ref name. Deriving a new tree from an
//! existing ref is cheap: content is only cloned on first write
//! (copy-on-write), and byte-identical trees committed under different
//! names share a single object.
//!
//! This crate models only the store engine itself — working tree
//! lifecycle, reader/writer arbitration, copy-on-write materialization,
//! tree hashing, and commit/ref resolution. It has no opinion about what
//! writes into a working tree or how refs are named.

mod error;
mod file_util;
mod host_tree;
mod object;
mod store;
mod treesum;

pub use error::{StoreError, StoreResult};
pub use host_tree::{HostReadGuard, HostTree};
pub use object::{Object, ReadGuard, WriteGuard};
pub use store::Store;
