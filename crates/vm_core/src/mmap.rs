//! Memory-mapped files.

use crate::{
    FileHandle, FramePool, HardwarePageTable, Page, Spt, VmError,
    page::{Initializer, PageKind, TargetKind},
};

/// Registers `length` bytes of `file` starting at `offset`, one page at a
/// time, starting at `addr`. Every page is tagged with `map_id` so a later
/// `munmap(addr)` can find the whole run.
///
/// Does not touch any frame or hardware mapping: the pages are pure
/// `Uninit` descriptors and are demand-paged in by the ordinary fault path
/// the first time they're touched. Partial failure (a VA in the requested
/// range already has a mapping) rolls back every page already registered by
/// this call.
pub fn mmap<const PAGE_SIZE: usize, F: FileHandle>(
    spt: &mut Spt<F>,
    addr: usize,
    length: usize,
    writable: bool,
    file: &F,
    offset: usize,
    map_id: u64,
) -> Result<(), VmError> {
    if addr == 0 || addr % PAGE_SIZE != 0 || offset % PAGE_SIZE != 0 || length == 0 {
        return Err(VmError::BadMmapArg);
    }

    let file_len = file.len();
    let mappable = length.min(file_len.saturating_sub(offset));
    let num_pages = length.div_ceil(PAGE_SIZE);

    let mut registered = alloc::vec::Vec::with_capacity(num_pages);
    for i in 0..num_pages {
        let va = addr + i * PAGE_SIZE;
        let read_bytes = mappable.saturating_sub(i * PAGE_SIZE).min(PAGE_SIZE);
        let init = Initializer {
            file: file.duplicate(),
            offset: offset + i * PAGE_SIZE,
            read_bytes,
        };
        match spt.alloc_with_initializer(
            va,
            PAGE_SIZE,
            writable,
            TargetKind::File,
            Some(init),
            Some(map_id),
        ) {
            Ok(()) => registered.push(va),
            Err(e) => {
                for va in registered {
                    spt.remove(va);
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Removes every page mapped by the `mmap` call that produced the mapping
/// starting at `addr`, writing back pages whose hardware dirty bit is set.
///
/// `addr` must be the exact address `mmap` returned; if it names no mapping
/// this is a no-op.
pub fn munmap<const PAGE_SIZE: usize, F: FileHandle>(
    spt: &mut Spt<F>,
    addr: usize,
    pt: &mut impl HardwarePageTable,
    pool: &mut impl FramePool,
) {
    let Some(map_id) = spt.find(addr, PAGE_SIZE).and_then(Page::map_id) else {
        return;
    };

    let mut va = addr;
    loop {
        let Some(page) = spt.find_mut(va, PAGE_SIZE) else {
            break;
        };
        if page.map_id() != Some(map_id) {
            break;
        }

        if let Some(kva) = page.frame() {
            let dirty = pt.is_dirty(va);
            if dirty {
                let bytes = unsafe { core::slice::from_raw_parts(kva.as_ptr(), PAGE_SIZE) };
                if let PageKind::File(f) = page.kind_mut() {
                    let n = f.read_bytes.min(bytes.len());
                    f.file.write_at(f.offset, &bytes[..n]);
                }
            }
            pt.clear(va);
            pool.pool_free(kva);
        }

        spt.remove(va);
        va += PAGE_SIZE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockBackend, MockFile, PAGE_SIZE};

    #[test]
    fn mmap_registers_one_page_per_file_chunk() {
        let mut spt: Spt<MockFile> = Spt::new();
        let file = MockFile::with_contents(&[1; PAGE_SIZE * 2]);
        mmap::<PAGE_SIZE, _>(&mut spt, 0x1000, PAGE_SIZE * 2, true, &file, 0, 7).unwrap();
        assert!(spt.find(0x1000, PAGE_SIZE).is_some());
        assert!(spt.find(0x1000 + PAGE_SIZE, PAGE_SIZE).is_some());
        assert_eq!(spt.find(0x1000, PAGE_SIZE).unwrap().map_id(), Some(7));
    }

    #[test]
    fn mmap_rolls_back_on_overlap() {
        let mut spt: Spt<MockFile> = Spt::new();
        let file = MockFile::with_contents(&[1; PAGE_SIZE]);
        spt.alloc_with_initializer(0x2000, PAGE_SIZE, true, TargetKind::Anon, None, None)
            .unwrap();
        let err = mmap::<PAGE_SIZE, _>(&mut spt, 0x1000, PAGE_SIZE * 2, true, &file, 0, 1)
            .unwrap_err();
        assert_eq!(err, VmError::DuplicateVa);
        assert!(spt.find(0x1000, PAGE_SIZE).is_none());
    }

    #[test]
    fn munmap_writes_back_dirty_page() {
        let mut spt: Spt<MockFile> = Spt::new();
        let mut backend = MockBackend::new();
        let file = MockFile::with_contents(&[0; PAGE_SIZE]);
        mmap::<PAGE_SIZE, _>(&mut spt, 0x1000, PAGE_SIZE, true, &file, 0, 1).unwrap();
        spt.handle_fault::<PAGE_SIZE>(
            0x1000,
            true,
            &mut backend.pt,
            &mut backend.pool,
            &mut backend.table,
            &mut backend.dev,
        )
        .unwrap();
        let kva = spt.find(0x1000, PAGE_SIZE).unwrap().frame().unwrap();
        unsafe { *kva.as_ptr() = 0x55 };
        backend.pt.mark_dirty(0x1000);

        munmap::<PAGE_SIZE, _>(&mut spt, 0x1000, &mut backend.pt, &mut backend.pool);
        assert!(spt.find(0x1000, PAGE_SIZE).is_none());
        assert_eq!(file.byte_at(0), 0x55);
    }
}
