// SPDX-License-Identifier: MPL-2.0

//! Path resolution inside one volume: walk slash-delimited components from
//! the root inode, following symlinks to a bounded depth.

use crate::dir;
use crate::fs::Ext2;
use crate::inode::{FileType, Inode};
use crate::prelude::*;

/// How many symlinks one resolution may traverse.
pub(crate) const SYMLINK_MAX_DEPTH: usize = 8;

/// Resolves a volume-relative path to its inode. Empty components (leading,
/// trailing or doubled slashes) are skipped; the empty path is the root.
pub(crate) fn resolve(fs: &Arc<Ext2>, path: &str) -> Result<Arc<Inode>> {
    let root = fs.root_inode()?;
    let mut depth = 0;
    resolve_from(fs, root, path, &mut depth)
}

fn resolve_from(
    fs: &Arc<Ext2>,
    base: Arc<Inode>,
    path: &str,
    depth: &mut usize,
) -> Result<Arc<Inode>> {
    let mut current = base;
    for component in path.split('/') {
        if component.is_empty() {
            continue;
        }
        if current.type_() != FileType::Dir {
            return_errno!(FsError::NotDir);
        }
        let ino = dir::lookup(&current, component)?.ok_or(Error::new(FsError::NotFound))?;
        let child = fs.lookup_inode(ino)?;

        if child.type_() == FileType::Symlink {
            *depth += 1;
            if *depth > SYMLINK_MAX_DEPTH {
                return_errno!(FsError::TooManySymlinks);
            }
            let target = child.read_link()?;
            let link_base = if target.starts_with('/') {
                fs.root_inode()?
            } else {
                current.clone()
            };
            current = resolve_from(fs, link_base, &target, depth)?;
        } else {
            current = child;
        }
    }
    Ok(current)
}

/// Splits a path into its parent path and final component. Trailing slashes
/// are shed first; a bare name's parent is the root (the empty path).
pub(crate) fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_parent_and_leaf() {
        assert_eq!(split_parent("/a/b/c"), ("/a/b", "c"));
        assert_eq!(split_parent("a"), ("", "a"));
        assert_eq!(split_parent("/a"), ("", "a"));
        assert_eq!(split_parent("/a/b/"), ("/a", "b"));
        assert_eq!(split_parent(""), ("", ""));
        assert_eq!(split_parent("/"), ("", ""));
    }
}
