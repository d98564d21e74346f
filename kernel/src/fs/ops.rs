//! High-level file system operations: `create`, `link`, `unlink`.

use ov6_types::path::Path;

use super::{
    DeviceNo, Tx,
    inode::TxInode,
    path,
    repr::{T_DEVICE, T_DIR, T_FILE},
};
use crate::error::KernelError;

/// Splits `path` into its parent directory (resolved, locked as
/// needed by the caller) and final component name.
fn resolve_parent<'tx>(
    tx: &'tx Tx<false>,
    cwd: TxInode<'tx, false>,
    path: &Path,
) -> Result<(TxInode<'tx, false>, &ov6_types::os_str::OsStr), KernelError> {
    let name = path.file_name().ok_or(KernelError::FsEntryNotFound)?;
    let parent_ip = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => self::path::resolve(tx, cwd, parent)?,
        _ => cwd,
    };
    Ok((parent_ip, name))
}

pub fn unlink(tx: &Tx<false>, cwd: TxInode<'_, false>, path: &Path) -> Result<(), KernelError> {
    let (mut parent_ip, name) = resolve_parent(tx, cwd, path)?;

    if name == "." || name == ".." {
        return Err(KernelError::UnlinkDots);
    }

    let mut parent_lip = parent_ip.force_wait_lock();
    let mut parent_dp = parent_lip
        .as_dir()
        .ok_or(KernelError::NonDirectoryPathComponent)?;

    let (mut child_ip, off) = parent_dp.lookup(name).ok_or(KernelError::FsEntryNotFound)?;
    let mut child_lip = child_ip.force_wait_lock();

    assert!(child_lip.nlink() > 0, "inode with no links in directory");

    if child_lip.ino() == parent_dp.ino() {
        return Err(KernelError::UnlinkRootDir);
    }

    if let Some(mut child_dp) = child_lip.as_dir()
        && !child_dp.is_empty()
    {
        return Err(KernelError::DirectoryNotEmpty);
    }

    parent_dp.unlink_at(off)?;

    if child_lip.is_dir() {
        // Drop the reference to the parent directory held by "..".
        parent_dp.get_inner().data_mut().nlink -= 1;
        parent_dp.get_inner().update();
    }
    parent_lip.unlock();
    parent_ip.put();

    child_lip.data_mut().nlink -= 1;
    child_lip.update();
    child_lip.unlock();
    child_ip.put();

    Ok(())
}

pub fn create<'tx>(
    tx: &'tx Tx<false>,
    cwd: TxInode<'tx, false>,
    path: &Path,
    ty: i16,
    major: DeviceNo,
    minor: i16,
) -> Result<TxInode<'tx, false>, KernelError> {
    let (mut parent_ip, name) = resolve_parent(tx, cwd, path)?;

    let mut parent_lip = parent_ip.force_wait_lock();
    let mut parent_dp = parent_lip
        .as_dir()
        .ok_or(KernelError::NonDirectoryPathComponent)?;

    if let Some((mut child_ip, _off)) = parent_dp.lookup(name) {
        let lip = child_ip.force_wait_lock();
        let existing_ty = lip.ty();
        drop(lip);
        if ty == T_DIR || (existing_ty != T_FILE && existing_ty != T_DEVICE) {
            return Err(KernelError::CreateAlreadyExists);
        }
        return Ok(child_ip);
    }

    let mut child_ip = TxInode::alloc(tx, parent_dp.dev(), ty)?;
    let mut child_lip = child_ip.force_wait_lock();
    child_lip.data_mut().major = major.value().cast_signed() as i16;
    child_lip.data_mut().minor = minor;
    child_lip.data_mut().nlink = 0; // set below, once success is guaranteed
    child_lip.update();

    if let Some(mut child_dp) = child_lip.as_dir() {
        let dot = ov6_types::os_str::OsStr::new(".");
        let dotdot = ov6_types::os_str::OsStr::new("..");
        child_dp.link(dot, child_dp.ino())?;
        child_dp.link(dotdot, parent_dp.ino())?;
    }

    parent_dp.link(name, child_lip.ino())?;

    if child_lip.is_dir() {
        // Now that success is guaranteed, count the "..": entry.
        parent_lip.data_mut().nlink += 1;
        parent_lip.update();
    }

    child_lip.data_mut().nlink = 1;
    child_lip.update();

    drop(child_lip);
    Ok(child_ip)
}

pub fn link(
    tx: &Tx<false>,
    cwd: TxInode<'_, false>,
    old_path: &Path,
    new_path: &Path,
) -> Result<(), KernelError> {
    let mut old_ip = path::resolve(tx, cwd.clone(), old_path)?;
    let old_lip = old_ip.force_wait_lock();
    if old_lip.is_dir() {
        return Err(KernelError::LinkToNonDirectory);
    }
    old_lip.unlock();

    let (mut parent_ip, name) = resolve_parent(tx, cwd, new_path)?;
    let mut parent_lip = parent_ip.force_wait_lock();
    if parent_lip.dev() != old_ip.dev() {
        return Err(KernelError::LinkCrossDevices);
    }
    let Some(mut parent_dp) = parent_lip.as_dir() else {
        return Err(KernelError::NonDirectoryPathComponent);
    };
    if parent_dp.lookup(name).is_some() {
        return Err(KernelError::LinkAlreadyExists);
    }
    parent_dp.link(name, old_ip.ino())?;
    drop(parent_lip);
    parent_ip.put();

    let mut old_lip = old_ip.force_wait_lock();
    old_lip.data_mut().nlink += 1;
    old_lip.update();

    Ok(())
}
