//! On-disk layout types.
//!
//! Most of the layout is shared with userspace tools through
//! [`ov6_fs_types`]; this module re-exports it and adapts the couple of
//! names this crate's bitmap code expects.

use dataview::Pod;

pub use ov6_fs_types::{
    BITS_PER_BLOCK, DIR_SIZE, DirEntry, FS_BLOCK_SIZE, INODE_PER_BLOCK, Inode, InodeBlock,
    IndirectBlock, LogHeader, MAX_FILE, NUM_DIRECT_REFS, NUM_INDIRECT_REFS, SuperBlock, T_DEVICE,
    T_DIR, T_FILE,
};

#[derive(Pod)]
#[repr(transparent)]
pub struct BmapBlock(ov6_fs_types::BmapBlock);

impl BmapBlock {
    #[must_use]
    pub fn is_allocated(&self, n: usize) -> bool {
        self.0.bit(n)
    }

    pub fn allocate(&mut self, n: usize) {
        self.0.set_bit(n);
    }

    pub fn free(&mut self, n: usize) {
        self.0.clear_bit(n);
    }
}
