//! Open file abstraction.
//!
//! A [`File`] is a reference-counted handle shared by every file
//! descriptor pointing at the same open pipe, inode, or device.

use ov6_syscall::{Stat, UserMutSlice, UserSlice};

pub use self::device::{Device, register_device};
use self::{alloc::FileDataArc, device::DeviceFile, inode::InodeFile, pipe::PipeFile};
use crate::{
    error::KernelError,
    fs::{DeviceNo, Inode},
    memory::{addr::Validated, vm_user::UserPageTable},
};

mod alloc;
mod common;
mod device;
mod inode;
mod pipe;

pub fn init() {
    alloc::init();
}

#[derive(Clone)]
pub struct File {
    data: FileDataArc,
}

struct FileData {
    readable: bool,
    writable: bool,
    data: Option<SpecificData>,
}

enum SpecificData {
    Pipe(PipeFile),
    Inode(InodeFile),
    Device(DeviceFile),
}

impl Drop for FileData {
    fn drop(&mut self) {
        match self.data.take() {
            Some(SpecificData::Pipe(pipe)) => pipe.close(self.writable),
            Some(SpecificData::Inode(inode)) => inode.close(),
            Some(SpecificData::Device(device)) => device.close(),
            None => {}
        }
    }
}

impl File {
    pub fn new_pipe() -> Result<(Self, Self), KernelError> {
        pipe::new_file()
    }

    pub fn new_device(
        major: DeviceNo,
        inode: Inode,
        readable: bool,
        writable: bool,
    ) -> Result<Self, KernelError> {
        device::new_file(major, inode, readable, writable)
    }

    pub fn new_inode(inode: Inode, readable: bool, writable: bool) -> Result<Self, KernelError> {
        inode::new_file(inode, readable, writable)
    }

    /// Increments the reference count for the file.
    #[must_use]
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Decrements the reference count for the file.
    pub fn close(self) {
        let _ = self;
    }

    /// Returns metadata about the file.
    pub fn stat(self) -> Result<Stat, KernelError> {
        match &self.data.data {
            Some(SpecificData::Inode(inode)) => inode.stat(),
            Some(SpecificData::Device(device)) => device.stat(),
            _ => Err(KernelError::StatOnNonFsEntry),
        }
    }

    /// Reads from the file into `dst`.
    pub fn read(
        self,
        pt: &mut UserPageTable,
        dst: &mut Validated<UserMutSlice<u8>>,
    ) -> Result<usize, KernelError> {
        if !self.data.readable {
            return Err(KernelError::FileDescriptorNotReadable);
        }

        match &self.data.data {
            Some(SpecificData::Pipe(pipe)) => pipe.read((pt, dst).into()),
            Some(SpecificData::Inode(inode)) => inode.read((pt, dst).into()),
            Some(SpecificData::Device(device)) => device.read(pt, dst),
            None => unreachable!(),
        }
    }

    /// Writes `src` to the file.
    pub fn write(
        self,
        pt: &UserPageTable,
        src: &Validated<UserSlice<u8>>,
    ) -> Result<usize, KernelError> {
        if !self.data.writable {
            return Err(KernelError::FileDescriptorNotWritable);
        }

        match &self.data.data {
            Some(SpecificData::Pipe(pipe)) => pipe.write((pt, src).into()),
            Some(SpecificData::Inode(inode)) => inode.write((pt, src).into()),
            Some(SpecificData::Device(device)) => device.write(pt, src),
            None => unreachable!(),
        }
    }
}
