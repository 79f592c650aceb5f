//! tinix - a monolithic kernel core
//!
//! This crate implements the cooperating triad at the heart of a small
//! i386-era Unix-like kernel:
//!
//! - the thread scheduler with its wait/wake primitives,
//! - the virtual file system dispatch layer (superblock/inode/dentry/mount),
//! - the socket/packet-buffer network pipeline (ARP, UDP, raw/packet sockets).
//!
//! Sockets and pipes block threads through the scheduler's wait queues; the
//! VFS treats sockets, pipes and device nodes uniformly through the `FileOps`
//! trait; and the semaphore/spinlock primitives gate every blocking VFS and
//! network call.
//!
//! Physical memory management, interrupt controller bring-up and real device
//! drivers are outside this crate; they are consumed only through the narrow
//! interfaces in [`irq`], [`storage`] and [`time`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod chardev;
pub mod error;
pub mod fs;
pub mod irq;
pub mod net;
pub mod pipe;
pub mod poll;
pub mod storage;
pub mod sync;
pub mod task;
pub mod time;
pub mod timer;
pub mod waitqueue;

pub use error::{KernelError, KernelResult};
