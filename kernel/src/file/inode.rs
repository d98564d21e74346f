use core::sync::atomic::{AtomicUsize, Ordering};

use ov6_fs_types::FS_BLOCK_SIZE;
use ov6_kernel_params::MAX_OP_BLOCKS;
use ov6_syscall::Stat;

use super::{File, FileData, FileDataArc, SpecificData};
use crate::{
    error::KernelError,
    fs::{self, Inode},
    memory::addr::{GenericMutSlice, GenericSlice},
};

pub(super) struct InodeFile {
    inode: Inode,
    off: AtomicUsize,
}

pub(super) fn new_file(
    inode: Inode,
    readable: bool,
    writable: bool,
) -> Result<File, KernelError> {
    let data = FileDataArc::try_new(FileData {
        readable,
        writable,
        data: Some(SpecificData::Inode(InodeFile {
            inode,
            off: AtomicUsize::new(0),
        })),
    })?;
    Ok(File { data })
}

impl InodeFile {
    pub(super) fn close(self) {
        super::common::close_inode(self.inode);
    }

    pub(super) fn stat(&self) -> Result<Stat, KernelError> {
        super::common::stat_inode(&self.inode)
    }

    pub(super) fn read(&self, dst: GenericMutSlice<u8>) -> Result<usize, KernelError> {
        let tx = fs::begin_readonly_tx();
        let mut ip = self.inode.clone().into_tx(&tx);
        let mut lip = ip.wait_lock()?;
        let off = self.off.load(Ordering::Relaxed);
        let res = lip.read(dst, off);
        if let Ok(sz) = &res {
            self.off.fetch_add(*sz, Ordering::Relaxed);
        }
        res
    }

    /// Writes `src` to the inode, a few blocks at a time so a single
    /// write never exceeds the maximum log transaction size.
    ///
    /// This really belongs lower down, since the underlying inode
    /// write might be to a device like the console, but it is simplest
    /// to chunk it here.
    pub(super) fn write(&self, mut src: GenericSlice<u8>) -> Result<usize, KernelError> {
        let max = ((MAX_OP_BLOCKS - 1 - 1 - 2) / 2) * FS_BLOCK_SIZE;
        let n = src.len();
        let mut i = 0;
        while i < n {
            let n1 = usize::min(n - i, max);
            let chunk = src.take(n1);

            let tx = fs::begin_tx()?;
            let mut ip = self.inode.clone().into_tx(&tx);
            let mut lip = ip.force_wait_lock();
            let off = self.off.load(Ordering::Relaxed);
            let res = lip.write(chunk, off);
            if let Ok(sz) = &res {
                self.off.fetch_add(*sz, Ordering::Relaxed);
            }
            lip.unlock();
            ip.put();
            tx.end();

            let Ok(sz) = res else {
                return res;
            };
            if sz != n1 {
                break;
            }

            src = src.skip(n1);
            i += n1;
        }
        if i == n { Ok(n) } else { Err(KernelError::ShortWrite) }
    }
}
