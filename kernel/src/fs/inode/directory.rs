//! Directories.

use ov6_types::os_str::OsStr;

use super::{LockedTxInode, TxInode};
use crate::{
    error::KernelError,
    fs::{DeviceNo, InodeNo, repr},
};

impl<const READ_ONLY: bool> LockedTxInode<'_, '_, READ_ONLY> {
    pub fn is_dir(&self) -> bool {
        self.data().ty == repr::T_DIR
    }

    pub fn as_dir(&mut self) -> Option<DirInode<'_, '_, '_, READ_ONLY>> {
        self.is_dir().then(|| DirInode(self))
    }
}

/// A [`LockedTxInode`] known to be a directory.
pub struct DirInode<'tx, 'i, 'l, const READ_ONLY: bool>(&'l mut LockedTxInode<'tx, 'i, READ_ONLY>);

impl<'tx, const READ_ONLY: bool> DirInode<'tx, '_, '_, READ_ONLY> {
    pub fn dev(&self) -> DeviceNo {
        self.0.dev()
    }

    pub fn ino(&self) -> InodeNo {
        self.0.ino()
    }

    pub fn get_inner(&mut self) -> &mut LockedTxInode<'tx, '_, READ_ONLY> {
        self.0
    }

    /// Returns `true` if the directory is empty except for `"."` and `".."`.
    pub fn is_empty(&mut self) -> bool {
        let de_size = size_of::<repr::DirEntry>();
        let size = self.0.size() as usize;
        // Skip the first two entries ("." and "..").
        for off in (2 * de_size..size).step_by(de_size) {
            let de = self.0.read_as::<repr::DirEntry>(off).unwrap();
            if de.ino().is_some() {
                return false;
            }
        }
        true
    }

    /// Looks up a directory entry by `name`.
    ///
    /// Returns the inode the entry refers to, and the entry's byte
    /// offset within the directory's content.
    pub fn lookup(&mut self, name: &OsStr) -> Option<(TxInode<'tx, READ_ONLY>, usize)> {
        for off in (0..self.0.size() as usize).step_by(size_of::<repr::DirEntry>()) {
            let de = self.0.read_as::<repr::DirEntry>(off).unwrap();
            let Some(ino) = de.ino() else { continue };
            if !de.is_same_name(name) {
                continue;
            }
            let ip = TxInode::get(self.0.tx, self.0.dev, ino);
            return Some((ip, off));
        }
        None
    }
}

impl DirInode<'_, '_, '_, false> {
    /// Writes a new directory entry (`name`, `ino`) into the directory.
    ///
    /// Caller is responsible for checking that `name` is not already
    /// present.
    pub fn link(&mut self, name: &OsStr, ino: InodeNo) -> Result<(), KernelError> {
        let size = self.0.size() as usize;
        assert_eq!(size % size_of::<repr::DirEntry>(), 0);

        let (mut de, off) = (0..size)
            .step_by(size_of::<repr::DirEntry>())
            .map(|off| (self.0.read_as::<repr::DirEntry>(off).unwrap(), off))
            .find(|(de, _)| de.ino().is_none())
            .unwrap_or_else(|| {
                let de: repr::DirEntry = unsafe { core::mem::zeroed() };
                (de, size)
            });

        de.set_name(name);
        de.set_ino(Some(ino));
        self.0.write_data(off, &de)?;
        Ok(())
    }

    /// Clears the directory entry at byte offset `off`.
    pub fn unlink_at(&mut self, off: usize) -> Result<(), KernelError> {
        let de: repr::DirEntry = unsafe { core::mem::zeroed() };
        self.0.write_data(off, &de)
    }
}

