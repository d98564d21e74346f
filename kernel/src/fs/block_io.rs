//! Cache for block I/O.

use core::convert::Infallible;

use block_io::{BlockData, BlockDevice, BlockIoCache};
use once_init::OnceInit;

use super::{BlockNo, DeviceNo, repr::FS_BLOCK_SIZE, virtio_disk};
use crate::sync::{SleepLock, SpinLock};

struct VirtioDiskDevice;

impl BlockDevice<FS_BLOCK_SIZE> for VirtioDiskDevice {
    type Error = Infallible;

    fn read(&self, index: usize, data: &mut [u8; FS_BLOCK_SIZE]) -> Result<(), Self::Error> {
        virtio_disk::read(index * FS_BLOCK_SIZE, data);
        Ok(())
    }

    fn write(&self, index: usize, data: &[u8; FS_BLOCK_SIZE]) -> Result<(), Self::Error> {
        virtio_disk::write(index * FS_BLOCK_SIZE, data);
        Ok(())
    }
}

type BlockDataMutex = SleepLock<BlockData<FS_BLOCK_SIZE>>;
type BufferListMutex = SpinLock<block_io::BufferList<BlockDataMutex>>;

pub type BlockHandle<'a> =
    block_io::BlockHandle<'a, VirtioDiskDevice, BufferListMutex, BlockDataMutex>;
pub type BlockGuard<'a, 'b, const VALID: bool> = block_io::BlockGuard<
    'a,
    'b,
    VirtioDiskDevice,
    BufferListMutex,
    BlockDataMutex,
    FS_BLOCK_SIZE,
    VALID,
>;

static CACHE: OnceInit<BlockIoCache<VirtioDiskDevice, BufferListMutex>> = OnceInit::new();

/// Initializes the global block I/O cache.
pub(super) fn init(num_blocks: usize) {
    CACHE.init(BlockIoCache::new(VirtioDiskDevice));
    CACHE.get().init(num_blocks);
}

/// Gets the block buffer with the given device number and block number.
pub(super) fn get(dev: DeviceNo, block_no: BlockNo) -> BlockHandle<'static> {
    assert_eq!(dev, DeviceNo::ROOT, "unknown device: dev={}", dev.value());
    CACHE.get().get(block_no.as_index())
}
