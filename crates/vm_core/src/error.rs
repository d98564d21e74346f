/// Failure modes shared by every page-table-backed operation in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("address is not backed by a supplemental page table entry")]
    NotMapped,
    #[error("write to a read-only page")]
    ProtectionViolation,
    #[error("virtual address already has a supplemental page table entry")]
    DuplicateVa,
    #[error("hardware page table refused to install a mapping")]
    MapFailed,
    #[error("frame pool is exhausted")]
    OutOfFrames,
    #[error("swap device is exhausted")]
    OutOfSwap,
    #[error("mmap/munmap argument is invalid")]
    BadMmapArg,
}
