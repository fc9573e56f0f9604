//! The brick-path ownership extended attribute (spec.md §3 Data model:
//! Brick — "carries an extended attribute recording the owning volume
//! UUID"; SPEC_FULL.md §2, grounded in `glusterd-utils.c`'s
//! `glusterd_brick_create` path).
//!
//! `setxattr`/`getxattr` have no wrapper in the `nix` feature set this crate
//! enables (`fs`, `signal`, `process`), so this goes straight through
//! `libc`, the same way the transport module talks to verbs.

use std::ffi::CString;
use std::io;
use std::path::Path;

use uuid::Uuid;

use super::BrickError;

const XATTR_NAME: &[u8] = b"trusted.glusterfs.volume-id\0";

fn to_io_err(path: &Path) -> BrickError {
    BrickError::Io {
        path: path.to_path_buf(),
        source: io::Error::last_os_error(),
    }
}

/// Read the volume UUID recorded on `path`, if any extended attribute is
/// set at all.
pub fn read_owner(path: &Path) -> Result<Option<Uuid>, BrickError> {
    let cpath = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| BrickError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"),
    })?;
    let mut buf = [0u8; 16];
    let rc = unsafe {
        libc::getxattr(
            cpath.as_ptr(),
            XATTR_NAME.as_ptr() as *const libc::c_char,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::ENODATA) => Ok(None),
            _ => Err(BrickError::Io {
                path: path.to_path_buf(),
                source: err,
            }),
        };
    }
    if rc as usize != buf.len() {
        return Ok(None);
    }
    Ok(Some(Uuid::from_bytes(buf)))
}

/// Atomically set the ownership xattr, rejecting a pre-existing,
/// non-matching UUID (spec.md §3: "any non-matching pre-existing UUID
/// rejects the add").
pub fn check_or_set_owner(path: &Path, volume_id: Uuid) -> Result<(), BrickError> {
    if let Some(existing) = read_owner(path)? {
        if existing != volume_id {
            return Err(BrickError::OwnershipMismatch(existing));
        }
        return Ok(());
    }
    let cpath = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| BrickError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"),
    })?;
    let bytes = *volume_id.as_bytes();
    let rc = unsafe {
        libc::setxattr(
            cpath.as_ptr(),
            XATTR_NAME.as_ptr() as *const libc::c_char,
            bytes.as_ptr() as *const libc::c_void,
            bytes.len(),
            0,
        )
    };
    if rc != 0 {
        return Err(to_io_err(path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("brick");
        std::fs::write(&path, b"").unwrap();
        let id = Uuid::new_v4();
        check_or_set_owner(&path, id).unwrap();
        assert_eq!(read_owner(&path).unwrap(), Some(id));
    }

    #[test]
    fn mismatched_owner_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("brick");
        std::fs::write(&path, b"").unwrap();
        check_or_set_owner(&path, Uuid::new_v4()).unwrap();
        let err = check_or_set_owner(&path, Uuid::new_v4());
        assert!(matches!(err, Err(BrickError::OwnershipMismatch(_))));
    }
}
