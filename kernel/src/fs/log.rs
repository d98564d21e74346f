//! Simple logging that allows concurrent FS system calls.
//!
//! A log transaction contains the updates of multiple FS system
//! calls. The logging system only commits when there are
//! no FS system calls active. Thus there is never
//! any reasoning required about whether a commit might
//! write an uncommitted system call's data to disk.
//!
//! A system call begins a [`Tx`] and lets it `Drop` to mark its end.
//! Usually this just increments the count of in-progress FS system
//! calls and returns. But if the log is close to running out, it
//! sleeps until the last outstanding transaction commits.
//!
//! The log is a physical re-do log containing disk blocks.
//!
//! The on-disk log format:
//!
//! ```text
//! header block, containing block #s for block A, B, C, ...
//! block A
//! block B
//! block C
//! ...
//! ```

use alloc::boxed::Box;
use dataview::PodMethods as _;
use once_init::OnceInit;
use ov6_fs_types::LogHeader;
use ov6_kernel_params::{LOG_SIZE, MAX_OP_BLOCKS};

use super::{BlockNo, DeviceNo, SuperBlock, block_io};
use crate::sync::{SpinLock, SpinLockCondVar, WaitError};

fn header_push(header: &mut LogHeader, bn: u32) {
    let len = header.len();
    header.set_len(len + 1);
    header.block_indices_mut()[len] = bn;
}

fn header_copy_from(dst: &mut LogHeader, src: &LogHeader) {
    dst.as_bytes_mut().copy_from_slice(src.as_bytes());
}

struct Commit<'h> {
    dev: DeviceNo,
    start: BlockNo,
    head: &'h mut LogHeader,
}

impl Commit<'_> {
    fn recover_from_log(&mut self) {
        self.read_head();
        self.install_trans(true); // if committed, copy from log to disk.
        self.head.set_len(0);
        self.write_head(); // clear the log
    }

    fn commit(&mut self) {
        if !self.head.is_empty() {
            self.write_body(); // write modified blocks from cache to log
            self.write_head(); // write header to disk -- the real commit
            self.install_trans(false); // now install writes to home locations
            self.head.set_len(0);
            self.write_head(); // erase the transaction from the log
        }
    }

    /// Reads the log header from disk into the in-memory log header.
    fn read_head(&mut self) {
        let mut bh = block_io::get(self.dev, self.start);
        let Ok(bg) = bh.lock().read();
        header_copy_from(self.head, bg.data::<LogHeader>());
    }

    /// Writes in-memory log header to disk.
    ///
    /// This is the true point at which the current transaction commits.
    fn write_head(&self) {
        let mut bh = block_io::get(self.dev, self.start);
        let mut bg = bh.lock().zeroed();
        header_copy_from(bg.data_mut::<LogHeader>(), self.head);
        let Ok(()) = bg.write(); // infallible (Device::Error = Infallible)
    }

    fn write_body(&self) {
        for (bn, tail) in self.head.block_indices().iter().zip(0u32..) {
            let mut from_bh = block_io::get(self.dev, BlockNo::new(*bn));
            let Ok(from_bg) = from_bh.lock().read();
            let log_bn = BlockNo::new(self.start.value() + tail + 1);
            let mut to_bh = block_io::get(self.dev, log_bn);
            let mut to_bg = to_bh.lock().set_data(from_bg.bytes());
            let Ok(()) = to_bg.write(); // log block
        }
    }

    /// Copies committed blocks from log to their home location.
    fn install_trans(&self, recovering: bool) {
        for (bn, tail) in self.head.block_indices().iter().zip(0u32..) {
            let log_bn = BlockNo::new(self.start.value() + tail + 1);
            let mut from_bh = block_io::get(self.dev, log_bn);
            let Ok(from_bg) = from_bh.lock().read(); // read log block
            let mut to_bh = block_io::get(self.dev, BlockNo::new(*bn));
            let mut to_bg = to_bh.lock().set_data(from_bg.bytes());
            let Ok(()) = to_bg.write(); // copy from log to dst and write dst to disk
            if !recovering {
                unsafe {
                    to_bg.unpin();
                }
            }
        }
    }
}

struct LogData {
    outstanding: usize,
    header: Option<Box<LogHeader>>, // `None` while committing.
}

struct Log {
    dev: DeviceNo,
    start: BlockNo,
    size: usize,
    data: SpinLock<LogData>,
    cond: SpinLockCondVar,
}

static LOG: OnceInit<Log> = OnceInit::new();

fn header_alloc() -> Box<LogHeader> {
    let mut header: Box<LogHeader> = unsafe { Box::new_zeroed().assume_init() };
    header.set_len(0);
    header
}

impl Log {
    fn new(dev: DeviceNo, sb: &SuperBlock) -> Self {
        let start = sb.log_header_block();

        let mut header = header_alloc();
        let mut commit = Commit {
            dev,
            start,
            head: &mut header,
        };
        commit.recover_from_log();

        Self {
            dev,
            start,
            size: sb.max_log_len(),
            data: SpinLock::new(LogData {
                outstanding: 0,
                header: Some(header_alloc()),
            }),
            cond: SpinLockCondVar::new(),
        }
    }

    /// Starts an FS transaction, sleeping while the log is close to full.
    fn begin_op(&self) -> Result<(), WaitError> {
        let mut data = self.data.lock();
        loop {
            let Some(header) = &data.header else {
                // header is under committing
                data = self.cond.wait(data).map_err(|(_, e)| e)?;
                continue;
            };
            if header.len() + (data.outstanding + 1) * MAX_OP_BLOCKS > LOG_SIZE {
                // this op might exhaust log space; wait for commit.
                data = self.cond.wait(data).map_err(|(_, e)| e)?;
                continue;
            }
            data.outstanding += 1;
            break;
        }
        Ok(())
    }

    /// Like [`begin_op()`](Self::begin_op), but keeps waiting even if the
    /// calling process is killed.
    fn force_begin_op(&self) {
        let mut data = self.data.lock();
        loop {
            let Some(header) = &data.header else {
                data = self.cond.force_wait(data);
                continue;
            };
            if header.len() + (data.outstanding + 1) * MAX_OP_BLOCKS > LOG_SIZE {
                data = self.cond.force_wait(data);
                continue;
            }
            data.outstanding += 1;
            break;
        }
    }

    /// Ends an FS transaction, committing if this was the last outstanding
    /// operation.
    fn end_op(&self) {
        let mut to_commit = None;

        let mut data = self.data.lock();
        data.outstanding -= 1;
        assert!(data.header.is_some()); // not under committing
        if data.outstanding == 0 {
            to_commit = data.header.take();
        } else {
            // begin_op() may be waiting for log space, and decrementing
            // log.outstanding has decreased the amount of reserved space.
            self.cond.notify();
        }
        drop(data); // unlock here

        if let Some(mut to_commit) = to_commit {
            let mut commit = Commit {
                dev: self.dev,
                start: self.start,
                head: &mut to_commit,
            };
            // call commit w/o holding locks, since not allowed to sleep with locks.
            commit.commit();
            let mut data = self.data.lock();
            assert!(data.header.is_none());
            data.header = Some(to_commit);
            self.cond.notify();
        }
    }

    fn track_write(&self, bh: &block_io::BlockHandle) {
        let mut data = self.data.lock();
        assert!(data.outstanding > 0);
        let header = data.header.as_mut().unwrap();
        assert!(header.len() < LOG_SIZE && header.len() < self.size - 1);

        let bn = u32::try_from(bh.index()).unwrap();
        if header.block_indices().iter().all(|bbn| *bbn != bn) {
            // Add new block to log
            unsafe {
                bh.pin();
            }
            header_push(header, bn);
        }
    }
}

pub(super) fn init(dev: DeviceNo, sb: &SuperBlock) {
    LOG.init(Log::new(dev, sb));
}

pub(super) fn track_write(bh: &block_io::BlockHandle) {
    LOG.get().track_write(bh);
}

pub(super) fn begin_op(dev: DeviceNo) -> Result<super::Tx<false>, WaitError> {
    LOG.get().begin_op()?;
    Ok(super::Tx::new(dev, true))
}

pub(super) fn force_begin_op(dev: DeviceNo) -> super::Tx<false> {
    LOG.get().force_begin_op();
    super::Tx::new(dev, true)
}

pub(super) fn end_op() {
    LOG.get().end_op();
}
