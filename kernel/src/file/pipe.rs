use alloc::sync::Arc;

use super::{File, FileData, FileDataArc, SpecificData};
use crate::{
    error::KernelError,
    memory::{
        addr::{GenericMutSlice, GenericSlice},
        page::PageFrameAllocator,
        vm_user::UserPageTable,
    },
    sync::{SpinLock, SpinLockCondVar, WaitError},
};

const PIPE_SIZE: usize = 512;

struct PipeData {
    buf: [u8; PIPE_SIZE],
    /// Number of bytes read.
    nread: usize,
    /// Number of bytes written.
    nwrite: usize,
    /// Read end is still open.
    readopen: bool,
    /// Write end is still open.
    writeopen: bool,
}

struct PipeInner {
    data: SpinLock<PipeData>,
    /// Notified when data has been written.
    read_ready: SpinLockCondVar,
    /// Notified when space has been freed, or either end closed.
    write_ready: SpinLockCondVar,
}

#[derive(Clone)]
pub(super) struct PipeFile {
    inner: Arc<PipeInner, PageFrameAllocator>,
}

pub(super) fn new_file() -> Result<(File, File), KernelError> {
    let pipe = PipeFile {
        inner: Arc::new_in(
            PipeInner {
                data: SpinLock::new(PipeData {
                    buf: [0; PIPE_SIZE],
                    nread: 0,
                    nwrite: 0,
                    readopen: true,
                    writeopen: true,
                }),
                read_ready: SpinLockCondVar::new(),
                write_ready: SpinLockCondVar::new(),
            },
            PageFrameAllocator,
        ),
    };

    let f0 = File {
        data: FileDataArc::try_new(FileData {
            readable: true,
            writable: false,
            data: Some(SpecificData::Pipe(pipe.clone())),
        })?,
    };
    let f1 = File {
        data: FileDataArc::try_new(FileData {
            readable: false,
            writable: true,
            data: Some(SpecificData::Pipe(pipe)),
        })?,
    };

    Ok((f0, f1))
}

impl PipeFile {
    pub(super) fn close(&self, writable: bool) {
        let mut pipe = self.inner.data.lock();
        if writable {
            pipe.writeopen = false;
            self.inner.read_ready.notify();
        } else {
            pipe.readopen = false;
            self.inner.write_ready.notify();
        }
    }

    pub(super) fn write(&self, src: GenericSlice<u8>) -> Result<usize, KernelError> {
        let n = src.len();
        let mut i = 0;

        let mut pipe = self.inner.data.lock();
        while i < n {
            if !pipe.readopen {
                return Err(KernelError::BrokenPipe);
            }
            if pipe.nwrite == pipe.nread + PIPE_SIZE {
                self.inner.read_ready.notify();
                match self.inner.write_ready.wait(pipe) {
                    Ok(guard) => pipe = guard,
                    Err((_guard, WaitError::WaitingProcessAlreadyKilled)) => {
                        return Err(KernelError::CallerProcessAlreadyKilled);
                    }
                }
                continue;
            }

            let mut byte = [0u8];
            UserPageTable::copy_x2k_bytes(&mut byte, &src.skip(i).take(1));
            let idx = pipe.nwrite % PIPE_SIZE;
            pipe.buf[idx] = byte[0];
            pipe.nwrite += 1;
            i += 1;
        }
        self.inner.read_ready.notify();
        Ok(i)
    }

    pub(super) fn read(&self, mut dst: GenericMutSlice<u8>) -> Result<usize, KernelError> {
        let mut pipe = self.inner.data.lock();
        while pipe.nread == pipe.nwrite && pipe.writeopen {
            match self.inner.read_ready.wait(pipe) {
                Ok(guard) => pipe = guard,
                Err((_guard, WaitError::WaitingProcessAlreadyKilled)) => {
                    return Err(KernelError::CallerProcessAlreadyKilled);
                }
            }
        }

        let n = dst.len();
        let mut i = 0;
        while i < n {
            if pipe.nread == pipe.nwrite {
                break;
            }
            let byte = [pipe.buf[pipe.nread % PIPE_SIZE]];
            pipe.nread += 1;
            UserPageTable::copy_k2x_bytes(&mut dst.skip_mut(i).take_mut(1), &byte);
            i += 1;
        }
        self.inner.write_ready.notify();
        Ok(i)
    }
}
