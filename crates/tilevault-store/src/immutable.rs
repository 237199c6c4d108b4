//! Best-effort OS immutable flag (`chattr +i` on Linux).
//!
//! Setting the flag usually needs `CAP_LINUX_IMMUTABLE`, and many
//! filesystems do not support it at all. Callers log the outcome and carry
//! on; nothing here returns an error.

use std::fs::File;

/// Result of a flag update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlagOutcome {
    /// The platform and filesystem understand the flag.
    pub supported: bool,
    /// The flag now has the requested value.
    pub applied: bool,
}

/// Mark `file` immutable.
pub fn set(file: &File) -> FlagOutcome {
    sys::update(file, true)
}

/// Clear the immutable flag on `file`.
pub fn unset(file: &File) -> FlagOutcome {
    sys::update(file, false)
}

#[cfg(target_os = "linux")]
mod sys {
    use std::fs::File;
    use std::os::fd::AsRawFd;

    use nix::errno::Errno;
    use nix::libc::{c_int, c_long};

    use super::FlagOutcome;

    const FS_IMMUTABLE_FL: c_int = 0x0000_0010;

    nix::ioctl_read_bad!(
        fs_ioc_getflags,
        nix::request_code_read!(b'f', 1, std::mem::size_of::<c_long>()),
        c_int
    );
    nix::ioctl_write_ptr_bad!(
        fs_ioc_setflags,
        nix::request_code_write!(b'f', 2, std::mem::size_of::<c_long>()),
        c_int
    );

    pub(super) fn update(file: &File, immutable: bool) -> FlagOutcome {
        let fd = file.as_raw_fd();
        let mut flags: c_int = 0;
        // SAFETY: `fd` stays open for the lifetime of `file`, and `flags`
        // outlives the call.
        if let Err(errno) = unsafe { fs_ioc_getflags(fd, &mut flags) } {
            return failed(errno);
        }

        let wanted = if immutable {
            flags | FS_IMMUTABLE_FL
        } else {
            flags & !FS_IMMUTABLE_FL
        };
        if wanted == flags {
            return FlagOutcome {
                supported: true,
                applied: true,
            };
        }

        // SAFETY: as above.
        match unsafe { fs_ioc_setflags(fd, &wanted) } {
            Ok(_) => FlagOutcome {
                supported: true,
                applied: true,
            },
            Err(errno) => failed(errno),
        }
    }

    fn failed(errno: Errno) -> FlagOutcome {
        let unsupported = matches!(
            errno,
            Errno::ENOTTY | Errno::EOPNOTSUPP | Errno::EINVAL | Errno::ENOSYS
        );
        FlagOutcome {
            supported: !unsupported,
            applied: false,
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::fs::File;

    use super::FlagOutcome;

    pub(super) fn update(_file: &File, _immutable: bool) -> FlagOutcome {
        FlagOutcome::default()
    }
}
