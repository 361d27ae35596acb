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

//! Deterministic content hash ("treesum") over a directory tree.
//!
//! Normalization follows the tree-hasher contract: entries within a
//! directory are visited in sorted byte-lexicographic order of their name;
//! each entry contributes its name, a one-byte type tag, and type-specific
//! data (file bytes + mode, a recursive digest for directories, or the
//! symlink target). The hash function is BLAKE2b-512, matching the
//! `blake2b_hash` used for content-addressing elsewhere in this family of
//! tools; it is fixed once chosen because treesums are persisted as
//! directory names under `objects/`.

use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use blake2::Blake2b512;
use digest::{Digest, Output};

const TAG_FILE: u8 = b'F';
const TAG_DIR: u8 = b'D';
const TAG_SYMLINK: u8 = b'L';

const CHUNK_SIZE: usize = 1 << 16;

/// Computes the treesum of `path`, which must be a directory, and returns it
/// as a lowercase hex string.
pub fn treesum_of_path(path: &Path) -> io::Result<String> {
    let digest = hash_dir(path)?;
    Ok(hex::encode(digest))
}

fn hash_dir(path: &Path) -> io::Result<Output<Blake2b512>> {
    let mut entries: Vec<_> = fs::read_dir(path)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut hasher = Blake2b512::new();
    for entry in entries {
        let name = entry.file_name();
        let name_bytes = name.to_str().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non-UTF-8 file name under {}", path.display()),
            )
        })?;
        update_len_prefixed(&mut hasher, name_bytes.as_bytes());

        let file_type = entry.file_type()?;
        let entry_path = entry.path();
        if file_type.is_symlink() {
            hasher.update([TAG_SYMLINK]);
            let target = fs::read_link(&entry_path)?;
            let target_bytes = target.to_str().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non-UTF-8 symlink target at {}", entry_path.display()),
                )
            })?;
            update_len_prefixed(&mut hasher, target_bytes.as_bytes());
        } else if file_type.is_dir() {
            hasher.update([TAG_DIR]);
            let sub_digest = hash_dir(&entry_path)?;
            hasher.update(sub_digest);
        } else if file_type.is_file() {
            hasher.update([TAG_FILE]);
            let mode = entry.metadata()?.permissions().mode();
            hasher.update(mode.to_le_bytes());
            hash_file_contents(&mut hasher, &entry_path)?;
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "unsupported file type at {}: neither file, directory, nor symlink",
                    entry_path.display()
                ),
            ));
        }
    }
    Ok(hasher.finalize())
}

fn hash_file_contents(hasher: &mut Blake2b512, path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    hasher.update((metadata.size()).to_le_bytes());

    let mut file = File::open(path)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}

fn update_len_prefixed(hasher: &mut Blake2b512, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
