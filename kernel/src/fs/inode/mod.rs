//! Inodes.
//!
//! An inode describes a single unnamed file.
//! The inode disk structure holds metadata: the file's type,
//! its size, the number of links referring to it, and the
//! list of blocks holding the file's content.
//!
//! The inodes are laid out sequentially on disk at block
//! `sb.inodestart`. Each inode has a number, indicating its
//! position on the disk.
//!
//! The kernel keeps a table of in-use inodes in memory to provide a
//! place for synchronizing access to inodes used by multiple
//! processes. The in-memory inodes include book-keeping information
//! that is not stored on disk.
//!
//! An inode and its in-memory representation go through a sequence of
//! states before they can be used by the rest of the file system
//! code:
//!
//! * Allocation: an inode is allocated if its type (on disk) is
//!   non-zero. [`TxInode::alloc()`] allocates, and [`TxInode::drop()`]
//!   or [`TxInode::put()`] frees it once both the reference and link
//!   counts have fallen to zero.
//! * Referencing in table: an entry in the inode table is free if its
//!   reference count is zero. Otherwise it tracks the number of
//!   in-memory pointers to the entry (open files and current
//!   directories). [`TxInode::get()`] finds or creates a table entry
//!   and increments its ref count.
//! * Valid: the information in an inode table entry is only correct
//!   once it has been read from disk, which happens the first time it
//!   is locked.
//! * Locked: file system code may only examine and modify an inode's
//!   information after locking it with [`TxInode::lock()`] (or one of
//!   its variants).
//!
//! [`TxInode::lock()`] is separate from [`TxInode::get()`] so that
//! system calls can hold a long-term reference to an inode (as for an
//! open file) and only lock it for short periods. The separation also
//! helps avoid deadlock and races during pathname lookup.

use alloc::sync::Arc;

use ov6_kernel_params::NINODE;

use super::{BlockNo, DeviceNo, InodeNo, SUPER_BLOCK, Tx, repr, stat::Stat};
use crate::{
    error::KernelError,
    sync::{SleepLock, SleepLockGuard, SpinLock},
};

mod content;
mod directory;

pub use directory::DirInode;

type InodeDataPtr = Arc<SleepLock<Option<InodeData>>>;
type InodeDataGuard<'a> = SleepLockGuard<'a, Option<InodeData>>;

/// A long-lived, transaction-independent handle to an in-memory inode.
///
/// Held by `File`s and by a process's current-working-directory slot.
#[derive(Clone)]
pub struct Inode {
    dev: DeviceNo,
    ino: InodeNo,
    data: InodeDataPtr,
}

/// In-memory reference to an inode, bound to the transaction it was
/// looked up under.
#[derive(Clone)]
pub struct TxInode<'tx, const READ_ONLY: bool> {
    tx: &'tx Tx<READ_ONLY>,
    dev: DeviceNo,
    ino: InodeNo,
    data: InodeDataPtr,
}

pub(super) struct InodeData {
    pub(super) ty: i16,
    pub(super) major: i16,
    pub(super) minor: i16,
    pub(super) nlink: i16,
    size: u32,
    addrs: [Option<BlockNo>; repr::NUM_DIRECT_REFS + 1],
}

impl InodeData {
    fn from_repr(r: &repr::Inode) -> Self {
        let mut addrs = [None; repr::NUM_DIRECT_REFS + 1];
        r.read_addrs(&mut addrs);
        Self {
            ty: r.ty,
            major: r.major,
            minor: r.minor,
            nlink: r.nlink,
            size: r.size,
            addrs,
        }
    }

    fn write_repr(&self, r: &mut repr::Inode) {
        r.ty = self.ty;
        r.major = self.major;
        r.minor = self.minor;
        r.nlink = self.nlink;
        r.size = self.size;
        r.write_addrs(&self.addrs);
    }
}

pub struct LockedTxInode<'tx, 'i, const READ_ONLY: bool> {
    tx: &'tx Tx<READ_ONLY>,
    dev: DeviceNo,
    ino: InodeNo,
    data: InodeDataPtr,
    locked: InodeDataGuard<'i>,
}

struct InodeEntry {
    dev: DeviceNo,
    ino: InodeNo,
    data: InodeDataPtr,
}

impl InodeEntry {
    fn new(dev: DeviceNo, ino: InodeNo) -> Self {
        Self {
            dev,
            ino,
            data: Arc::new(SleepLock::new(None)),
        }
    }

    /// Resets the entry to refer to a different inode.
    ///
    /// Caller must ensure no other reference to this entry exists.
    fn reset(&mut self, dev: DeviceNo, ino: InodeNo) {
        let data = Arc::get_mut(&mut self.data).expect("inode entry still referenced");
        *data.try_lock().expect("inode entry still locked") = None;
        self.dev = dev;
        self.ino = ino;
    }
}

static INODE_TABLE: SpinLock<[Option<InodeEntry>; NINODE]> =
    SpinLock::new([const { None }; NINODE]);

impl<const READ_ONLY: bool> TxInode<'_, READ_ONLY> {
    pub fn dev(&self) -> DeviceNo {
        self.dev
    }

    pub fn ino(&self) -> InodeNo {
        self.ino
    }
}

impl Inode {
    pub fn from_tx<const READ_ONLY: bool>(tx: &TxInode<'_, READ_ONLY>) -> Self {
        Self {
            dev: tx.dev,
            ino: tx.ino,
            data: Arc::clone(&tx.data),
        }
    }

    pub fn from_locked<const READ_ONLY: bool>(locked: &LockedTxInode<'_, '_, READ_ONLY>) -> Self {
        Self {
            dev: locked.dev,
            ino: locked.ino,
            data: Arc::clone(&locked.data),
        }
    }

    /// Rebinds this inode to the given transaction.
    #[must_use]
    pub fn into_tx<const READ_ONLY: bool>(self, tx: &Tx<READ_ONLY>) -> TxInode<'_, READ_ONLY> {
        TxInode {
            tx,
            dev: self.dev,
            ino: self.ino,
            data: self.data,
        }
    }
}

impl<'tx, const READ_ONLY: bool> TxInode<'tx, READ_ONLY> {
    fn new(tx: &'tx Tx<READ_ONLY>, dev: DeviceNo, ino: InodeNo, data: InodeDataPtr) -> Self {
        Self {
            tx,
            dev,
            ino,
            data,
        }
    }

    /// Returns the root inode of the device `tx` was opened on.
    pub fn root(tx: &'tx Tx<READ_ONLY>) -> Self {
        Self::get(tx, tx.dev(), InodeNo::ROOT)
    }

    /// Finds the inode with number `ino` on device `dev`.
    ///
    /// Returns the in-memory inode copy, allocating a table entry for
    /// it if one does not already exist.
    pub fn get(tx: &'tx Tx<READ_ONLY>, dev: DeviceNo, ino: InodeNo) -> Self {
        let mut table = INODE_TABLE.lock();

        let mut empty = None;
        let found = table.iter_mut().find_map(|entry_ref| {
            let Some(entry) = entry_ref else {
                empty = Some(entry_ref);
                return None;
            };

            if Arc::get_mut(&mut entry.data).is_some() {
                empty = Some(entry_ref);
                return None;
            }

            if entry.dev != dev || entry.ino != ino {
                return None;
            }
            Some(Self::new(tx, dev, ino, Arc::clone(&entry.data)))
        });

        if let Some(found) = found {
            return found;
        }

        let empty = empty.expect("no inodes");
        let data = match empty {
            Some(entry) => {
                entry.reset(dev, ino);
                Arc::clone(&entry.data)
            }
            None => {
                let entry = InodeEntry::new(dev, ino);
                let data = Arc::clone(&entry.data);
                *empty = Some(entry);
                data
            }
        };

        Self::new(tx, dev, ino, data)
    }

    /// Drops a reference to an in-memory inode.
    ///
    /// If this was the last reference and the inode has no links left,
    /// the inode (and its content) is freed on disk. Must be called
    /// inside a transaction in case it has to free the inode.
    pub fn put(self) {
        // The rest of the work happens in `Drop`.
    }

    /// Locks the inode without blocking.
    ///
    /// Reads the inode from disk if it is not already in memory.
    /// Returns `Err` if the inode is already locked.
    pub fn try_lock(&mut self) -> Result<LockedTxInode<'tx, '_, READ_ONLY>, KernelError> {
        let locked = self
            .data
            .try_lock()
            .map_err(|_| KernelError::CallerProcessAlreadyKilled)?;
        Ok(LockedTxInode::new(
            self.tx,
            self.dev,
            self.ino,
            Arc::clone(&self.data),
            locked,
        ))
    }

    /// Locks the inode, sleeping while it is held by another process.
    ///
    /// Reads the inode from disk if it is not already in memory.
    /// Returns `Err` if this process is killed while waiting.
    pub fn wait_lock(&mut self) -> Result<LockedTxInode<'tx, '_, READ_ONLY>, KernelError> {
        let locked = self
            .data
            .lock()
            .map_err(|_| KernelError::CallerProcessAlreadyKilled)?;
        Ok(LockedTxInode::new(
            self.tx,
            self.dev,
            self.ino,
            Arc::clone(&self.data),
            locked,
        ))
    }

    /// Like [`wait_lock()`](Self::wait_lock), but keeps waiting even if
    /// this process is killed.
    pub fn force_wait_lock(&mut self) -> LockedTxInode<'tx, '_, READ_ONLY> {
        let locked = self.data.force_lock();
        LockedTxInode::new(self.tx, self.dev, self.ino, Arc::clone(&self.data), locked)
    }
}

impl<'tx> TxInode<'tx, false> {
    /// Allocates an inode on device `dev`.
    ///
    /// Returns an unlocked but allocated and referenced inode, or an
    /// error if there is no free inode.
    pub fn alloc(tx: &'tx Tx<false>, dev: DeviceNo, ty: i16) -> Result<Self, KernelError> {
        let ino = alloc_ino(tx, dev, ty)?;
        Ok(Self::get(tx, dev, ino))
    }
}

impl<const READ_ONLY: bool> Drop for TxInode<'_, READ_ONLY> {
    fn drop(&mut self) {
        let table = INODE_TABLE.lock();

        if Arc::strong_count(&self.data) > 2 {
            return;
        }

        // strong_count == 2 means no other process can have this inode
        // locked, so this lock acquisition cannot block.
        let Ok(lip) = self.try_lock() else {
            return;
        };

        if lip.data().nlink > 0 {
            return;
        }

        // Inode has no links and no other references: truncate and free.
        drop(table);

        if let Some(tx) = lip.tx.to_writable() {
            let mut lip = LockedTxInode {
                tx: &tx,
                dev: lip.dev,
                ino: lip.ino,
                data: lip.data,
                locked: lip.locked,
            };
            lip.truncate();
            lip.free();
        }
    }
}

impl<'tx, 'i, const READ_ONLY: bool> LockedTxInode<'tx, 'i, READ_ONLY> {
    fn new(
        tx: &'tx Tx<READ_ONLY>,
        dev: DeviceNo,
        ino: InodeNo,
        data: InodeDataPtr,
        mut locked: InodeDataGuard<'i>,
    ) -> Self {
        if locked.is_none() {
            let sb = SUPER_BLOCK.get();
            let mut br = tx.get_block(dev, sb.inode_block(ino));
            let Ok(bg) = br.lock().read();
            let dip = bg.data::<repr::InodeBlock>().inode(ino);
            *locked = Some(InodeData::from_repr(dip));
        }

        Self {
            tx,
            dev,
            ino,
            data,
            locked,
        }
    }

    pub fn dev(&self) -> DeviceNo {
        self.dev
    }

    pub fn ino(&self) -> InodeNo {
        self.ino
    }

    pub fn ty(&self) -> i16 {
        self.data().ty
    }

    pub fn major(&self) -> i16 {
        self.data().major
    }

    pub fn minor(&self) -> i16 {
        self.data().minor
    }

    pub fn nlink(&self) -> i16 {
        self.data().nlink
    }

    pub fn size(&self) -> u32 {
        self.data().size
    }

    pub(super) fn data(&self) -> &InodeData {
        self.locked.as_ref().unwrap()
    }

    pub(super) fn data_mut(&mut self) -> &mut InodeData {
        self.locked.as_mut().unwrap()
    }

    /// Copies stat information from the inode.
    pub fn stat(&self) -> Stat {
        let data = self.data();
        Stat {
            dev: self.dev,
            ino: self.ino,
            ty: data.ty,
            nlink: data.nlink,
            size: u64::from(data.size),
        }
    }

    /// Unlocks the inode.
    pub fn unlock(self) {
        // The rest of the work happens in `Drop`.
    }
}

/// Allocates an inode on device `dev`, marking it allocated with type `ty`.
fn alloc_ino(tx: &Tx<false>, dev: DeviceNo, ty: i16) -> Result<InodeNo, KernelError> {
    let sb = SUPER_BLOCK.get();

    for ino in 1..sb.ninodes {
        let ino = InodeNo::new(ino);
        let mut br = tx.get_block(dev, sb.inode_block(ino));
        let Ok(mut bg) = br.lock().read();
        let disk_ip = bg.data_mut::<repr::InodeBlock>().inode_mut(ino);
        if disk_ip.is_free() {
            disk_ip.allocate(ty);
            return Ok(ino);
        }
    }
    crate::println!("no free inodes");
    Err(KernelError::StorageOutOfInodes)
}
