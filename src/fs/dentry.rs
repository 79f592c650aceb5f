//! Dentry - directory entry cache
//!
//! A dentry maps one name to one inode and caches the directory tree shape.
//! Each dentry carries a single RwLock (`d_lock`) protecting all mutable
//! state; `name` and `sb` are immutable after creation.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::RwLock;

use super::inode::Inode;
use super::superblock::SuperBlock;

struct DentryInner {
    /// The inode this dentry points to (None for a negative dentry)
    inode: Option<Arc<Inode>>,
    /// Parent dentry (None for a filesystem root)
    parent: Option<Weak<Dentry>>,
    /// Cached children, by name
    children: BTreeMap<String, Arc<Dentry>>,
    /// Something is mounted on this dentry
    mounted: bool,
}

/// A directory entry
pub struct Dentry {
    /// Name of this entry (empty for a filesystem root)
    pub name: String,

    /// Back pointer to the owning superblock
    pub sb: Weak<SuperBlock>,

    d_lock: RwLock<DentryInner>,
}

impl Dentry {
    pub fn new(name: String, inode: Option<Arc<Inode>>, sb: Weak<SuperBlock>) -> Self {
        Self {
            name,
            sb,
            d_lock: RwLock::new(DentryInner {
                inode,
                parent: None,
                children: BTreeMap::new(),
                mounted: false,
            }),
        }
    }

    /// Root dentry for a filesystem instance
    pub fn new_root(inode: Arc<Inode>, sb: Weak<SuperBlock>) -> Self {
        Self::new(String::new(), Some(inode), sb)
    }

    /// Anonymous dentry for objects with no name in any tree (pipes, sockets)
    pub fn new_anonymous(name: String, inode: Option<Arc<Inode>>) -> Self {
        Self::new(name, inode, Weak::new())
    }

    pub fn get_inode(&self) -> Option<Arc<Inode>> {
        self.d_lock.read().inode.clone()
    }

    pub fn set_inode(&self, inode: Arc<Inode>) {
        self.d_lock.write().inode = Some(inode);
    }

    pub fn is_negative(&self) -> bool {
        self.d_lock.read().inode.is_none()
    }

    pub fn get_parent(&self) -> Option<Arc<Dentry>> {
        self.d_lock.read().parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_parent(&self, parent: &Arc<Dentry>) {
        self.d_lock.write().parent = Some(Arc::downgrade(parent));
    }

    pub fn lookup_child(&self, name: &str) -> Option<Arc<Dentry>> {
        self.d_lock.read().children.get(name).cloned()
    }

    pub fn add_child(&self, child: Arc<Dentry>) {
        let name = child.name.clone();
        self.d_lock.write().children.insert(name, child);
    }

    pub fn remove_child(&self, name: &str) -> Option<Arc<Dentry>> {
        self.d_lock.write().children.remove(name)
    }

    pub fn is_mountpoint(&self) -> bool {
        self.d_lock.read().mounted
    }

    pub fn set_mountpoint(&self, mounted: bool) {
        self.d_lock.write().mounted = mounted;
    }

    pub fn superblock(&self) -> Option<Arc<SuperBlock>> {
        self.sb.upgrade()
    }

    pub fn num_children(&self) -> usize {
        self.d_lock.read().children.len()
    }

    /// Iterate cached children (readdir)
    pub fn for_each_child<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<Dentry>),
    {
        let inner = self.d_lock.read();
        for (name, dentry) in inner.children.iter() {
            f(name, dentry);
        }
    }

    /// Absolute path from the namespace root to this dentry
    pub fn full_path(self: &Arc<Self>) -> String {
        let mut components = Vec::new();
        let mut current = Some(self.clone());
        while let Some(dentry) = current {
            if !dentry.name.is_empty() {
                components.push(dentry.name.clone());
            }
            current = dentry.get_parent();
        }
        components.reverse();
        if components.is_empty() {
            String::from("/")
        } else {
            let mut path = String::new();
            for comp in components {
                path.push('/');
                path.push_str(&comp);
            }
            path
        }
    }
}

/// Whether `ancestor` is `child` itself or an ancestor of it
///
/// Used by rename to refuse moving a directory into its own subtree.
pub fn is_subdir(child: &Arc<Dentry>, ancestor: &Arc<Dentry>) -> bool {
    if Arc::ptr_eq(child, ancestor) {
        return true;
    }
    let mut current = child.get_parent();
    while let Some(parent) = current {
        if Arc::ptr_eq(&parent, ancestor) {
            return true;
        }
        current = parent.get_parent();
    }
    false
}
