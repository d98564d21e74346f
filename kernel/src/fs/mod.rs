//! File system implementation.
//!
//! Five layers:
//!
//! * Blocks: allocator for raw disk blocks.
//! * Log: crash recovery for multi-step updates.
//! * Inodes: individual files, each with a unique inode number and some
//!   blocks holding its content.
//! * Directories: an inode with a special content (a list of
//!   (name, inode number) pairs).
//! * Names: paths like `/usr/rtm/xv6/fs.c` for convenient naming.
//!
//! This file contains the low-level file system manipulation routines.
//! The (higher-level) system call implementations are in `syscall`.

use core::fmt;

use once_init::OnceInit;
pub use ov6_fs_types::{BlockNo, InodeNo};
pub use repr::{T_DEVICE, T_DIR, T_FILE};

pub use self::inode::{DirInode, Inode, LockedTxInode, TxInode};
use self::repr::SuperBlock;
use crate::sync::WaitError;

mod block_io;
mod data_block;
mod inode;
mod log;
pub mod ops;
pub mod path;
mod repr;
mod stat;
mod virtio;
pub mod virtio_disk;

/// Identifies a block storage device.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DeviceNo(u32);

impl DeviceNo {
    /// The (only) disk device backing the root file system.
    pub const ROOT: Self = Self(1);
    /// The console device, registered as a character device in the
    /// file table but never backed by a disk block.
    pub const CONSOLE: Self = Self(1);

    #[must_use]
    pub fn new(no: u32) -> Self {
        Self(no)
    }

    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for DeviceNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceNo({})", self.0)
    }
}

impl fmt::Display for DeviceNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static SUPER_BLOCK: OnceInit<SuperBlock> = OnceInit::new();

/// A handle to an in-flight file system transaction.
///
/// All multi-block updates to the file system happen inside a `Tx`, so
/// that the log can replay or discard them atomically after a crash.
/// `READ_ONLY` transactions never modify blocks and are not recorded
/// in the log.
pub struct Tx<const READ_ONLY: bool> {
    dev: DeviceNo,
    /// Whether dropping this handle should end the underlying logged
    /// operation. `false` for read-only transactions and for
    /// secondary handles returned by [`Tx::to_writable()`] on an
    /// already-writable transaction.
    logged: bool,
}

impl<const READ_ONLY: bool> Tx<READ_ONLY> {
    fn new(dev: DeviceNo, logged: bool) -> Self {
        Self { dev, logged }
    }

    #[must_use]
    pub fn dev(&self) -> DeviceNo {
        self.dev
    }

    /// Fetches the buffer cache entry for block `block_no` on `dev`.
    ///
    /// If this transaction is writable, the block is registered with
    /// (and pinned into) the log before it is returned, so that any
    /// modification made through the returned handle is captured by
    /// the next commit.
    fn get_block(&self, dev: DeviceNo, block_no: BlockNo) -> block_io::BlockHandle<'static> {
        let bh = block_io::get(dev, block_no);
        if !READ_ONLY {
            log::track_write(&bh);
        }
        bh
    }

    /// Ends the transaction.
    ///
    /// Equivalent to dropping `self`; provided so call sites can end a
    /// transaction explicitly before other cleanup that does not
    /// itself need the transaction.
    pub fn end(self) {
        // The rest of the work happens in `Drop`.
    }
}

impl Tx<false> {
    /// Returns a writable handle to the same transaction.
    ///
    /// Since `self` is already writable, no new log transaction is
    /// started; the returned handle is a non-owning view that does
    /// not end the log operation when dropped.
    fn to_writable(&self) -> Option<Tx<false>> {
        Some(Tx::new(self.dev, false))
    }
}

impl Tx<true> {
    /// Starts a nested writable transaction on the same device.
    ///
    /// Used when code holding only a read-only transaction discovers
    /// it must write (e.g. freeing an inode whose last in-memory
    /// reference was dropped while read-only).
    fn to_writable(&self) -> Option<Tx<false>> {
        log::begin_op(self.dev).ok()
    }
}

impl<const READ_ONLY: bool> Drop for Tx<READ_ONLY> {
    fn drop(&mut self) {
        if self.logged {
            log::end_op();
        }
    }
}

/// Starts a file system transaction, sleeping while the log is close
/// to full.
///
/// Returns `Err` if this process is killed while waiting.
pub fn begin_tx() -> Result<Tx<false>, WaitError> {
    log::begin_op(DeviceNo::ROOT)
}

/// Like [`begin_tx()`], but keeps waiting even if the calling process
/// is killed.
#[must_use]
pub fn force_begin_tx() -> Tx<false> {
    log::force_begin_op(DeviceNo::ROOT)
}

/// Starts a read-only transaction.
///
/// Read-only transactions never touch the log, so this never blocks.
#[must_use]
pub fn begin_readonly_tx() -> Tx<true> {
    Tx::new(DeviceNo::ROOT, false)
}

/// Initializes the disk driver and block buffer cache.
///
/// Must run once, early, before any process context exists.
pub fn init() {
    virtio_disk::init();
    block_io::init(ov6_kernel_params::NBUF);
}

/// Reads the super block and initializes the log.
///
/// Must run in the context of a regular process, since reading the
/// log may sleep waiting for disk I/O.
pub fn init_in_proc(dev: DeviceNo) {
    let mut bh = block_io::get(dev, SuperBlock::SUPER_BLOCK_NO);
    let Ok(bg) = bh.lock().read();
    let on_disk = bg.data::<SuperBlock>();
    let sb = SuperBlock {
        magic: on_disk.magic,
        size: on_disk.size,
        nblocks: on_disk.nblocks,
        ninodes: on_disk.ninodes,
        nlog: on_disk.nlog,
        logstart: on_disk.logstart,
        inodestart: on_disk.inodestart,
        bmapstart: on_disk.bmapstart,
    };
    assert_eq!(sb.magic, SuperBlock::FS_MAGIC, "invalid file system");
    drop(bg);

    SUPER_BLOCK.init(sb);
    log::init(dev, SUPER_BLOCK.get());
}
