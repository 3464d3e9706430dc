// FILE: src/core/permissions.rs
//! Who tagfs acts for.
//!
//! Tagging under sudo would leave root-owned tag directories behind; the
//! identity captured here hands them back to the invoking user.

use crate::error::{Result, TagError};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// The user repository directories should belong to.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub is_root: bool,
}

impl Identity {
    /// The invoking user, seen through sudo when present.
    pub fn capture() -> Self {
        let current_uid = Self::get_current_uid();
        let is_root = current_uid == 0;

        if let (Some(sudo_uid), Some(sudo_gid)) =
            (std::env::var("SUDO_UID").ok(), std::env::var("SUDO_GID").ok())
        {
            let uid = sudo_uid.parse::<u32>().unwrap_or(current_uid);
            let gid = sudo_gid.parse::<u32>().unwrap_or_else(|_| Self::get_current_gid());
            tracing::debug!("[Identity] Running as UID {} on behalf of UID:{} GID:{}", current_uid, uid, gid);
            return Self { uid, gid, is_root };
        }

        Self { uid: current_uid, gid: Self::get_current_gid(), is_root }
    }

    fn get_current_uid() -> u32 { unsafe { libc::getuid() } }
    fn get_current_gid() -> u32 { unsafe { libc::getgid() } }

    /// True when files we create would end up owned by someone else.
    pub fn needs_chown(&self) -> bool {
        self.is_root && self.uid != 0
    }

    /// Hand a freshly created directory back to the invoking user.
    pub fn enforce_ownership(&self, path: &Path) -> Result<()> {
        if !self.needs_chown() {
            return Ok(());
        }

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| TagError::InvalidName(format!("path contains null byte: {}", e)))?;

        let result = unsafe { libc::chown(c_path.as_ptr(), self.uid, self.gid) };

        if result == 0 {
            tracing::debug!("[Identity] Enforced ownership on {}: UID:{} GID:{}", path.display(), self.uid, self.gid);
            Ok(())
        } else {
            let err = std::io::Error::last_os_error();
            tracing::error!("[Identity] Failed to enforce ownership on {}: {}", path.display(), err);
            Err(TagError::Io(err))
        }
    }

    /// Read-only mount options. Root mounts always allow other users.
    pub fn get_mount_options(&self, allow_other: bool) -> Vec<fuser::MountOption> {
        let mut options = vec![
            fuser::MountOption::RO,
            fuser::MountOption::FSName("tagfs".to_string()),
            fuser::MountOption::AutoUnmount,
        ];
        // AutoUnmount needs allow_other or allow_root for non-root users
        if allow_other || self.is_root {
            options.push(fuser::MountOption::AllowOther);
        }
        options
    }
}
