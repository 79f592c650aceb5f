//! Path resolution
//!
//! Walks the dentry tree one component at a time: child cache first, then
//! the directory inode's `lookup` op, crossing mount points as it goes.
//! Absolute paths start at the process root (or the namespace root when no
//! process context exists); relative paths start at the process cwd.

use alloc::string::String;
use alloc::sync::Arc;

use super::dentry::Dentry;
use super::mount::{follow_mount, namespace_root};
use crate::task;
use crate::{KernelError, KernelResult};

/// Lookup behavior flags
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupFlags {
    /// The final component must resolve to a directory
    pub must_be_dir: bool,
}

fn starting_dentry(path: &str) -> KernelResult<Arc<Dentry>> {
    let proc = task::current_process();
    let start = if path.starts_with('/') {
        proc.as_ref()
            .and_then(|p| p.fs.root())
            .or_else(namespace_root)
    } else {
        proc.as_ref()
            .and_then(|p| p.fs.cwd())
            .or_else(|| proc.as_ref().and_then(|p| p.fs.root()))
            .or_else(namespace_root)
    };
    start.ok_or(KernelError::NotFound)
}

/// Resolve one component under `dir`
pub fn lookup_one(dir: &Arc<Dentry>, name: &str) -> KernelResult<Arc<Dentry>> {
    match name {
        "" | "." => return Ok(dir.clone()),
        ".." => return Ok(dir.get_parent().unwrap_or_else(|| dir.clone())),
        _ => {}
    }

    if let Some(child) = dir.lookup_child(name) {
        return Ok(follow_mount(child));
    }

    let dir_inode = dir.get_inode().ok_or(KernelError::NotFound)?;
    if !dir_inode.mode().is_dir() {
        return Err(KernelError::NotDirectory);
    }
    let inode = dir_inode.i_op.lookup(&dir_inode, name)?;
    let child = Arc::new(Dentry::new(
        String::from(name),
        Some(inode),
        dir.sb.clone(),
    ));
    child.set_parent(dir);
    dir.add_child(child.clone());
    Ok(follow_mount(child))
}

/// Resolve a full path to a dentry
pub fn lookup_path(path: &str, flags: LookupFlags) -> KernelResult<Arc<Dentry>> {
    if path.is_empty() {
        return Err(KernelError::NotFound);
    }

    let mut cur = follow_mount(starting_dentry(path)?);
    let must_be_dir = flags.must_be_dir || path.ends_with('/');

    for comp in path.split('/') {
        if comp.is_empty() {
            continue;
        }
        let cur_inode = cur.get_inode().ok_or(KernelError::NotFound)?;
        if !cur_inode.mode().is_dir() {
            return Err(KernelError::NotDirectory);
        }
        cur = lookup_one(&cur, comp)?;
    }

    if must_be_dir {
        let inode = cur.get_inode().ok_or(KernelError::NotFound)?;
        if !inode.mode().is_dir() {
            return Err(KernelError::NotDirectory);
        }
    }
    Ok(cur)
}

/// Resolve a path's directory prefix, returning the parent dentry and the
/// final component name
///
/// Used by the operations that create or remove the final component.
pub fn lookup_parent(path: &str) -> KernelResult<(Arc<Dentry>, String)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        // the root itself has no parent to create in
        return Err(KernelError::AlreadyExists);
    }

    let (dir_part, name) = super::inode::split_parent(trimmed);
    if name.is_empty() || name == "." || name == ".." {
        return Err(KernelError::InvalidArgument);
    }

    let parent = lookup_path(&dir_part, LookupFlags { must_be_dir: true })?;
    Ok((parent, name))
}
