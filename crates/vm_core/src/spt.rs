//! Supplemental page table: per-process page lifecycle management.

use alloc::collections::{BTreeMap, btree_map::Entry};

use crate::{
    FileHandle, FramePool, HardwarePageTable, SwapDevice, SwapTable, VmError,
    page::{AnonPayload, FilePayload, Initializer, Page, PageKind, TargetKind},
    swap::SECTOR_SIZE,
};

fn round_down(va: usize, page_size: usize) -> usize {
    va & !(page_size - 1)
}

/// Maps every virtual page of one process's address space to its
/// [`Page`] descriptor.
///
/// Lookup, insertion, and removal are all keyed by page-aligned virtual
/// address; [`BTreeMap`] also gives `munmap` and fork-copy an ascending
/// walk over a process's pages for free.
pub struct Spt<F> {
    pages: BTreeMap<usize, Page<F>>,
}

impl<F: FileHandle> Default for Spt<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FileHandle> Spt<F> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    pub fn find(&self, va: usize, page_size: usize) -> Option<&Page<F>> {
        self.pages.get(&round_down(va, page_size))
    }

    pub fn find_mut(&mut self, va: usize, page_size: usize) -> Option<&mut Page<F>> {
        self.pages.get_mut(&round_down(va, page_size))
    }

    /// Registers a page at `va`, whose initial access will claim it as a
    /// fresh anonymous page or a file-backed page read from `init`.
    ///
    /// Fails with [`VmError::DuplicateVa`] if `va` is already registered.
    pub fn alloc_with_initializer(
        &mut self,
        va: usize,
        page_size: usize,
        writable: bool,
        target: TargetKind,
        init: Option<Initializer<F>>,
        map_id: Option<u64>,
    ) -> Result<(), VmError> {
        let va = round_down(va, page_size);
        match self.pages.entry(va) {
            Entry::Vacant(v) => {
                v.insert(Page::new_uninit(va, writable, target, init, map_id));
                Ok(())
            }
            Entry::Occupied(_) => Err(VmError::DuplicateVa),
        }
    }

    pub fn remove(&mut self, va: usize) -> Option<Page<F>> {
        self.pages.remove(&va)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page<F>> {
        self.pages.values()
    }

    /// Drops every page descriptor, running each payload's destructor (most
    /// notably closing any owned file handle).
    ///
    /// Does not free resident frames: tearing down a whole address space is
    /// the kernel's job, done in bulk at a higher level than one page at a
    /// time.
    pub fn kill(&mut self) {
        self.pages.clear();
    }

    /// Binds a fresh frame to `page`, populating it per its current kind,
    /// and installs the hardware mapping. Used both for first-touch demand
    /// paging (`Uninit`) and for swap-in (`Anon`/`File`).
    pub fn claim<const PAGE_SIZE: usize>(
        page: &mut Page<F>,
        pt: &mut impl HardwarePageTable,
        pool: &mut impl FramePool,
        table: &mut SwapTable,
        dev: &mut impl SwapDevice,
    ) -> Result<(), VmError> {
        let kva = pool.pool_alloc().ok_or(VmError::OutOfFrames)?;
        if !pt.install(page.va(), kva, page.writable()) {
            pool.pool_free(kva);
            return Err(VmError::MapFailed);
        }
        page.set_frame(Some(kva));

        let bytes = unsafe { core::slice::from_raw_parts_mut(kva.as_ptr(), PAGE_SIZE) };
        if let Err(e) = swap_in(page, bytes, table, dev) {
            pt.clear(page.va());
            page.set_frame(None);
            pool.pool_free(kva);
            return Err(e);
        }
        Ok(())
    }

    /// Writes a resident page's frame back out (to the swap device for
    /// `Anon`, to its backing file if dirty for `File`), clears the
    /// hardware mapping, and releases the frame to `pool`.
    pub fn evict<const PAGE_SIZE: usize>(
        page: &mut Page<F>,
        pt: &mut impl HardwarePageTable,
        pool: &mut impl FramePool,
        table: &mut SwapTable,
        dev: &mut impl SwapDevice,
    ) -> Result<(), VmError> {
        let kva = page.frame().ok_or(VmError::NotMapped)?;
        let va = page.va();
        let dirty = pt.is_dirty(va);
        let bytes = unsafe { core::slice::from_raw_parts(kva.as_ptr(), PAGE_SIZE) };

        match page.kind_mut() {
            PageKind::Anon(a) => {
                let slot = table.alloc().ok_or(VmError::OutOfSwap)?;
                write_slot(dev, table, slot, bytes);
                a.swap_slot = Some(slot);
            }
            PageKind::File(f) => {
                if dirty {
                    let n = f.read_bytes.min(bytes.len());
                    f.file.write_at(f.offset, &bytes[..n]);
                }
            }
            PageKind::Uninit(_) => unreachable!("uninit pages are never resident"),
        }

        pt.clear(va);
        pool.pool_free(kva);
        page.set_frame(None);
        Ok(())
    }

    /// Handles a page fault at `fault_va`: looks the page up, rejects
    /// write faults on read-only pages, and claims the page if it is not
    /// already resident.
    ///
    /// Stack-growth detection and kernel/unmapped-address rejection happen
    /// before this is called: a caller that decides a faulting address
    /// should grow the stack registers a fresh anonymous page with
    /// [`Spt::alloc_with_initializer`] first, then calls this as normal.
    pub fn handle_fault<const PAGE_SIZE: usize>(
        &mut self,
        fault_va: usize,
        write: bool,
        pt: &mut impl HardwarePageTable,
        pool: &mut impl FramePool,
        table: &mut SwapTable,
        dev: &mut impl SwapDevice,
    ) -> Result<(), VmError> {
        let page = self.find_mut(fault_va, PAGE_SIZE).ok_or(VmError::NotMapped)?;
        if write && !page.writable() {
            return Err(VmError::ProtectionViolation);
        }
        if page.is_resident() {
            return Ok(());
        }
        Self::claim::<PAGE_SIZE>(page, pt, pool, table, dev)
    }

    /// Copies every page descriptor from `src` into `self`.
    ///
    /// Unclaimed (`Uninit`) pages are copied by value: the child will
    /// demand-page them independently. Resident pages are claimed fresh in
    /// `self` and their frame contents are byte-copied from the parent's
    /// frame, bypassing the normal swap-in path so in-memory modifications
    /// not yet written back are preserved. A page the parent has swapped
    /// out is first swapped back in (in `src`) so there is something to
    /// copy.
    #[expect(clippy::too_many_arguments)]
    pub fn copy<const PAGE_SIZE: usize>(
        &mut self,
        src: &mut Spt<F>,
        src_pt: &mut impl HardwarePageTable,
        src_pool: &mut impl FramePool,
        src_table: &mut SwapTable,
        src_dev: &mut impl SwapDevice,
        dst_pt: &mut impl HardwarePageTable,
        dst_pool: &mut impl FramePool,
    ) -> Result<(), VmError> {
        for src_page in src.pages.values_mut() {
            if matches!(src_page.kind(), PageKind::Uninit(_)) {
                let va = src_page.va();
                let writable = src_page.writable();
                let map_id = src_page.map_id();
                let PageKind::Uninit(u) = src_page.duplicate_kind() else {
                    unreachable!()
                };
                self.alloc_with_initializer(va, PAGE_SIZE, writable, u.target, u.init, map_id)?;
                continue;
            }

            if !src_page.is_resident() {
                Self::claim::<PAGE_SIZE>(src_page, src_pt, src_pool, src_table, src_dev)?;
            }

            let new_kind = src_page.duplicate_kind();
            let new_page = materialize_copy::<PAGE_SIZE, F>(src_page, new_kind, dst_pt, dst_pool)?;
            self.pages.insert(new_page.va(), new_page);
        }
        Ok(())
    }
}

fn write_slot(dev: &mut impl SwapDevice, table: &SwapTable, slot: usize, bytes: &[u8]) {
    for i in 0..table.sectors_per_page() {
        dev.disk_write(slot + i, &bytes[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
    }
}

fn read_slot(dev: &mut impl SwapDevice, table: &SwapTable, slot: usize, bytes: &mut [u8]) {
    for i in 0..table.sectors_per_page() {
        dev.disk_read(slot + i, &mut bytes[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
    }
}

fn swap_in<F: FileHandle>(
    page: &mut Page<F>,
    bytes: &mut [u8],
    table: &mut SwapTable,
    dev: &mut impl SwapDevice,
) -> Result<(), VmError> {
    match page.kind_mut() {
        PageKind::Uninit(u) => {
            let target = u.target;
            let mut init = u.init.take();
            if let Some(i) = init.as_mut() {
                let n = i.read_bytes.min(bytes.len());
                let got = i.file.read_at(i.offset, &mut bytes[..n]);
                bytes[got..].fill(0);
            } else {
                bytes.fill(0);
            }
            *page.kind_mut() = match target {
                TargetKind::Anon => PageKind::Anon(AnonPayload { swap_slot: None }),
                TargetKind::File => {
                    let Initializer {
                        file,
                        offset,
                        read_bytes,
                    } = init.expect("file-backed uninit page must carry an initializer");
                    PageKind::File(FilePayload {
                        file,
                        offset,
                        read_bytes,
                    })
                }
            };
            Ok(())
        }
        PageKind::Anon(a) => {
            if let Some(slot) = a.swap_slot.take() {
                read_slot(dev, table, slot, bytes);
                table.free(slot);
            } else {
                bytes.fill(0);
            }
            Ok(())
        }
        PageKind::File(f) => {
            let n = f.read_bytes.min(bytes.len());
            let got = f.file.read_at(f.offset, &mut bytes[..n]);
            bytes[got..].fill(0);
            Ok(())
        }
    }
}

fn materialize_copy<const PAGE_SIZE: usize, F: FileHandle>(
    src_page: &Page<F>,
    new_kind: PageKind<F>,
    pt: &mut impl HardwarePageTable,
    pool: &mut impl FramePool,
) -> Result<Page<F>, VmError> {
    let kva = pool.pool_alloc().ok_or(VmError::OutOfFrames)?;
    if !pt.install(src_page.va(), kva, src_page.writable()) {
        pool.pool_free(kva);
        return Err(VmError::MapFailed);
    }
    let src_kva = src_page
        .frame()
        .expect("materialize_copy requires a resident source page");
    unsafe {
        core::ptr::copy_nonoverlapping::<u8>(src_kva.as_ptr(), kva.as_ptr(), PAGE_SIZE);
    }
    Ok(Page::new_resident(
        src_page.va(),
        src_page.writable(),
        new_kind,
        kva,
        src_page.map_id(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockBackend, PAGE_SIZE};

    #[test]
    fn fresh_anon_page_faults_in_zeroed() {
        let mut spt: Spt<crate::test_support::MockFile> = Spt::new();
        let mut backend = MockBackend::new();
        spt.alloc_with_initializer(0x1000, PAGE_SIZE, true, TargetKind::Anon, None, None)
            .unwrap();
        spt.handle_fault::<PAGE_SIZE>(
            0x1000,
            false,
            &mut backend.pt,
            &mut backend.pool,
            &mut backend.table,
            &mut backend.dev,
        )
        .unwrap();
        let page = spt.find(0x1000, PAGE_SIZE).unwrap();
        assert!(page.is_resident());
        assert!(matches!(page.kind(), PageKind::Anon(_)));
    }

    #[test]
    fn write_fault_on_read_only_page_is_rejected() {
        let mut spt: Spt<crate::test_support::MockFile> = Spt::new();
        let mut backend = MockBackend::new();
        spt.alloc_with_initializer(0x1000, PAGE_SIZE, false, TargetKind::Anon, None, None)
            .unwrap();
        let err = spt
            .handle_fault::<PAGE_SIZE>(
                0x1000,
                true,
                &mut backend.pt,
                &mut backend.pool,
                &mut backend.table,
                &mut backend.dev,
            )
            .unwrap_err();
        assert_eq!(err, VmError::ProtectionViolation);
    }

    #[test]
    fn fault_on_unmapped_address_fails() {
        let mut spt: Spt<crate::test_support::MockFile> = Spt::new();
        let mut backend = MockBackend::new();
        let err = spt
            .handle_fault::<PAGE_SIZE>(
                0x9000,
                false,
                &mut backend.pt,
                &mut backend.pool,
                &mut backend.table,
                &mut backend.dev,
            )
            .unwrap_err();
        assert_eq!(err, VmError::NotMapped);
    }

    #[test]
    fn anon_page_round_trips_through_swap() {
        let mut spt: Spt<crate::test_support::MockFile> = Spt::new();
        let mut backend = MockBackend::new();
        spt.alloc_with_initializer(0x1000, PAGE_SIZE, true, TargetKind::Anon, None, None)
            .unwrap();
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
        unsafe { *kva.as_ptr() = 0x42 };

        let page = spt.find_mut(0x1000, PAGE_SIZE).unwrap();
        Spt::evict::<PAGE_SIZE>(
            page,
            &mut backend.pt,
            &mut backend.pool,
            &mut backend.table,
            &mut backend.dev,
        )
        .unwrap();
        assert!(!page.is_resident());

        spt.handle_fault::<PAGE_SIZE>(
            0x1000,
            false,
            &mut backend.pt,
            &mut backend.pool,
            &mut backend.table,
            &mut backend.dev,
        )
        .unwrap();
        let kva = spt.find(0x1000, PAGE_SIZE).unwrap().frame().unwrap();
        assert_eq!(unsafe { *kva.as_ptr() }, 0x42);
    }

    #[test]
    fn fork_copy_preserves_dirty_anon_contents() {
        let mut parent: Spt<crate::test_support::MockFile> = Spt::new();
        let mut child: Spt<crate::test_support::MockFile> = Spt::new();
        let mut backend = MockBackend::new();
        parent
            .alloc_with_initializer(0x1000, PAGE_SIZE, true, TargetKind::Anon, None, None)
            .unwrap();
        parent
            .handle_fault::<PAGE_SIZE>(
                0x1000,
                true,
                &mut backend.pt,
                &mut backend.pool,
                &mut backend.table,
                &mut backend.dev,
            )
            .unwrap();
        let kva = parent.find(0x1000, PAGE_SIZE).unwrap().frame().unwrap();
        unsafe { *kva.as_ptr() = 0x42 };

        let mut child_pt = crate::test_support::MockPageTable::new();
        let mut dst_pool = crate::test_support::MockFramePool;
        child
            .copy::<PAGE_SIZE>(
                &mut parent,
                &mut backend.pt,
                &mut backend.pool,
                &mut backend.table,
                &mut backend.dev,
                &mut child_pt,
                &mut dst_pool,
            )
            .unwrap();

        let child_kva = child.find(0x1000, PAGE_SIZE).unwrap().frame().unwrap();
        assert_ne!(child_kva, kva);
        assert_eq!(unsafe { *child_kva.as_ptr() }, 0x42);

        // Parent's page is untouched by the copy.
        assert_eq!(unsafe { *kva.as_ptr() }, 0x42);
    }

    #[test]
    fn fork_copy_duplicates_uninit_pages_by_value() {
        let mut parent: Spt<crate::test_support::MockFile> = Spt::new();
        let mut child: Spt<crate::test_support::MockFile> = Spt::new();
        let mut backend = MockBackend::new();
        parent
            .alloc_with_initializer(0x2000, PAGE_SIZE, true, TargetKind::Anon, None, None)
            .unwrap();

        let mut child_pt = crate::test_support::MockPageTable::new();
        let mut dst_pool = crate::test_support::MockFramePool;
        child
            .copy::<PAGE_SIZE>(
                &mut parent,
                &mut backend.pt,
                &mut backend.pool,
                &mut backend.table,
                &mut backend.dev,
                &mut child_pt,
                &mut dst_pool,
            )
            .unwrap();

        let page = child.find(0x2000, PAGE_SIZE).unwrap();
        assert!(!page.is_resident());
        assert!(matches!(page.kind(), PageKind::Uninit(_)));
    }
}
