//! Inode content.
//!
//! The content (data) associated with each inode is stored in blocks
//! on disk. The first `NUM_DIRECT_REFS` block numbers are listed in
//! `addrs[]`. The next `NUM_INDIRECT_REFS` blocks are listed in the
//! indirect block `addrs[NUM_DIRECT_REFS]`.

use core::mem::MaybeUninit;

use dataview::Pod;

use super::LockedTxInode;
use crate::{
    error::KernelError,
    fs::{
        BlockNo, data_block, repr,
        repr::{FS_BLOCK_SIZE, MAX_FILE, NUM_DIRECT_REFS, NUM_INDIRECT_REFS},
    },
    memory::addr::{GenericMutSlice, GenericSlice},
};

impl<const READ_ONLY: bool> LockedTxInode<'_, '_, READ_ONLY> {
    /// Returns the disk block address of the `i`th **direct** block in
    /// the inode, allocating one if it does not yet exist.
    ///
    /// Returns `None` if out of disk space or the inode is read-only.
    fn get_direct_data_block(&mut self, i: usize) -> Option<BlockNo> {
        assert!(i < NUM_DIRECT_REFS);
        if let Some(bn) = self.data().addrs[i] {
            return Some(bn);
        }

        let tx = self.tx.to_writable()?;
        let bn = data_block::alloc(&tx, self.dev).ok()?;
        self.data_mut().addrs[i] = Some(bn);
        Some(bn)
    }

    /// Returns the disk block address of the `i`th **indirect** block
    /// in the inode, allocating one if it does not yet exist.
    fn get_indirect_data_block(&mut self, i: usize) -> Option<BlockNo> {
        let (ind_bn, ind_newly_allocated) = match self.data().addrs[NUM_DIRECT_REFS] {
            Some(ind_bn) => (ind_bn, false),
            None => {
                let tx = self.tx.to_writable()?;
                let ind_bn = data_block::alloc(&tx, self.dev).ok()?;
                self.data_mut().addrs[NUM_DIRECT_REFS] = Some(ind_bn);
                (ind_bn, true)
            }
        };

        if !ind_newly_allocated {
            let mut ind_br = self.tx.get_block(self.dev, ind_bn);
            let Ok(ind_bg) = ind_br.lock().read();
            if let Some(bn) = ind_bg.data::<repr::IndirectBlock>().get(i) {
                return Some(bn);
            }
        }

        let tx = self.tx.to_writable()?;
        let bn = data_block::alloc(&tx, self.dev).ok()?;
        let mut ind_br = tx.get_block(self.dev, ind_bn);
        let Ok(mut ind_bg) = ind_br.lock().read();
        ind_bg.data_mut::<repr::IndirectBlock>().set(i, Some(bn));

        Some(bn)
    }

    /// Returns the disk block address of the `i`th block in the
    /// inode, allocating one if it does not yet exist.
    fn get_data_block(&mut self, i: usize) -> Option<BlockNo> {
        if i < NUM_DIRECT_REFS {
            return self.get_direct_data_block(i);
        }

        let i = i - NUM_DIRECT_REFS;
        assert!(i < NUM_INDIRECT_REFS, "out of range: ibn={i}");
        self.get_indirect_data_block(i)
    }
}

impl LockedTxInode<'_, '_, false> {
    /// Truncates the inode, discarding its content.
    pub fn truncate(&mut self) {
        for bn in &mut self.data_mut().addrs[..NUM_DIRECT_REFS] {
            if let Some(bn) = bn.take() {
                data_block::free(self.tx, self.dev, bn);
            }
        }

        if let Some(bn) = self.data_mut().addrs[NUM_DIRECT_REFS].take() {
            let mut br = self.tx.get_block(self.dev, bn);
            let Ok(mut bg) = br.lock().read();
            for bn in bg.data_mut::<repr::IndirectBlock>().drain().flatten() {
                data_block::free(self.tx, self.dev, bn);
            }
            drop(bg);
            data_block::free(self.tx, self.dev, bn);
        }

        self.data_mut().size = 0;
        self.update();
    }

    /// Copies a modified in-memory inode to disk.
    ///
    /// Must be called after every change to in-memory data that lives
    /// on disk.
    pub fn update(&self) {
        let sb = crate::fs::SUPER_BLOCK.get();
        let mut br = self.tx.get_block(self.dev, sb.inode_block(self.ino));
        let Ok(mut bg) = br.lock().read();
        let dip = bg.data_mut::<repr::InodeBlock>().inode_mut(self.ino);
        self.data().write_repr(dip);
    }

    pub(super) fn free(mut self) {
        self.data_mut().ty = 0;
        self.update();
        *self.locked = None;
    }
}

impl<const READ_ONLY: bool> LockedTxInode<'_, '_, READ_ONLY> {
    /// Reads the inode's data into `dst`, starting at byte offset `off`.
    ///
    /// Returns the number of bytes read, which is less than
    /// `dst.len()` only at end of file.
    pub fn read(&mut self, mut dst: GenericMutSlice<u8>, off: usize) -> Result<usize, KernelError> {
        let size = self.data().size as usize;
        let mut n = dst.len();
        if off > size || off.checked_add(n).is_none() {
            return Ok(0);
        }
        if off + n > size {
            n = size - off;
        }

        let mut tot = 0;
        while tot < n {
            let off = off + tot;
            let Some(bn) = self.get_data_block(off / FS_BLOCK_SIZE) else {
                break;
            };
            let mut br = self.tx.get_block(self.dev, bn);
            let Ok(bg) = br.lock().read();
            let m = usize::min(n - tot, FS_BLOCK_SIZE - off % FS_BLOCK_SIZE);
            let mut chunk = dst.take_mut(m);
            crate::memory::vm_user::UserPageTable::copy_k2x_bytes(
                &mut chunk,
                &bg.bytes()[off % FS_BLOCK_SIZE..][..m],
            );
            dst = dst.skip_mut(m);
            tot += m;
        }
        Ok(tot)
    }

    /// Reads the inode's data at offset `off` as a POD value `T`.
    pub fn read_as<T>(&mut self, off: usize) -> Result<T, KernelError>
    where
        T: Pod,
    {
        let mut dst = MaybeUninit::<T>::uninit();
        let buf = unsafe {
            core::slice::from_raw_parts_mut(dst.as_mut_ptr().cast::<u8>(), size_of::<T>())
        };
        let read = self.read(GenericMutSlice::Kernel(buf), off)?;
        if read != size_of::<T>() {
            return Err(KernelError::ShortRead);
        }
        Ok(unsafe { dst.assume_init() })
    }
}

impl LockedTxInode<'_, '_, false> {
    /// Writes `src` to the inode's data, starting at byte offset `off`.
    ///
    /// Returns the number of bytes written, which is less than
    /// `src.len()` only on error.
    pub fn write(&mut self, mut src: GenericSlice<u8>, off: usize) -> Result<usize, KernelError> {
        let size = self.data().size as usize;
        let n = src.len();
        if off > size || off.checked_add(n).is_none() {
            return Err(KernelError::WriteOffsetTooLarge);
        }
        if off + n > MAX_FILE * FS_BLOCK_SIZE {
            return Err(KernelError::FileTooLarge);
        }

        let mut tot = 0;
        while tot < n {
            let off = off + tot;
            let Some(bn) = self.get_data_block(off / FS_BLOCK_SIZE) else {
                break;
            };

            let mut br = self.tx.get_block(self.dev, bn);
            let Ok(mut bg) = br.lock().read();
            let m = usize::min(n - tot, FS_BLOCK_SIZE - off % FS_BLOCK_SIZE);
            let chunk = src.take(m);
            crate::memory::vm_user::UserPageTable::copy_x2k_bytes(
                &mut bg.bytes_mut()[off % FS_BLOCK_SIZE..][..m],
                &chunk,
            );
            src = src.skip(m);

            tot += m;
        }

        if off + tot > size {
            self.data_mut().size = (off + tot) as u32;
        }

        // Write the inode back to disk even if the size didn't change,
        // since the loop above may have allocated new data blocks.
        self.update();

        Ok(tot)
    }

    /// Writes `data` to the inode's data at offset `off`.
    pub fn write_data<T>(&mut self, off: usize, data: &T) -> Result<(), KernelError>
    where
        T: Pod,
    {
        let buf = unsafe {
            core::slice::from_raw_parts(core::ptr::from_ref(data).cast::<u8>(), size_of::<T>())
        };
        let written = self.write(GenericSlice::Kernel(buf), off)?;
        if written != size_of::<T>() {
            return Err(KernelError::ShortWrite);
        }
        Ok(())
    }
}
