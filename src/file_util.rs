// Copyright 2021 Google LLC
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
use std::io;
use std::os::unix::fs::symlink;
use std::path::Path;

/// Renames `tmp_dir` to `new_path`, succeeding if the target already exists
/// (signalling to the caller that a duplicate object is present) rather
/// than erroring the way a plain `rename` overwrite would. Like
/// `NamedTempFile::persist`, but for a directory and content-addressed by
/// construction: two different processes computing the same treesum are
/// racing to create the *same* bytes at `new_path`, so whichever wins the
/// rename is an equally valid occupant.
///
/// Returns `true` if `tmp_dir` was moved into place, `false` if the
/// destination already existed and `tmp_dir` was left untouched for the
/// caller to discard.
pub fn persist_content_addressed_dir(tmp_dir: &Path, new_path: &Path) -> io::Result<bool> {
    if new_path.exists() {
        return Ok(false);
    }
    match fs::rename(tmp_dir, new_path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        // Some platforms report the destination-exists race as NotFound on
        // the source once another process wins the rename first.
        Err(_) if new_path.exists() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Recursively recreates `src`'s contents under `dst`, which must already
/// exist and be empty. Regular files are reflinked where the filesystem
/// supports it (so `stat(dst/f).ino != stat(src/f).ino` but the extents are
/// shared copy-on-write), falling back to a full byte copy. Hardlinking is
/// deliberately not used as a fallback: it would share `src`'s inode with
/// `dst` until the first write, so a caller that `stat`s a file right after
/// materializing (before writing to it) would still observe the base's
/// inode, breaking the guarantee that materialization alone already yields
/// an independent copy. Directories and symlinks are always recreated,
/// since neither benefits from reflinking.
pub fn clone_tree_into(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            fs::create_dir(&dst_path)?;
            clone_tree_into(&src_path, &dst_path)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            symlink(target, &dst_path)?;
        } else if file_type.is_file() {
            clone_file(&src_path, &dst_path)?;
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("cannot materialize special file at {}", src_path.display()),
            ));
        }
    }
    Ok(())
}

fn clone_file(src: &Path, dst: &Path) -> io::Result<()> {
    if reflink_copy::reflink(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst)?;
    Ok(())
}
