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

use std::io;

use thiserror::Error;

/// Errors raised by the store and its working trees.
///
/// `NotFound` is intentionally absent: `Store::contains` and
/// `Store::resolve_ref` report absence through `bool`/`Option`, never by
/// raising.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A lease-discipline or lifecycle violation: a write attempted while a
    /// reader or writer is active, an operation issued on a sealed tree, or
    /// `base` reassigned after content has been written. Not recoverable by
    /// retrying; the caller's protocol is wrong.
    #[error("{0}")]
    State(String),

    /// Any filesystem failure: copy, link, rename, stat. Surfaced verbatim.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    pub(crate) fn state(message: impl Into<String>) -> Self {
        StoreError::State(message.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
