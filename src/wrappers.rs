// Libc Wrappers :: Safe wrappers around extended-attribute system calls.
//
// Copyright (C) 2023 saf.ai Inc.
//

use std::ffi::{CString, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

macro_rules! into_cstring {
    ($path:expr) => {
        match CString::new($path.as_os_str().as_bytes()) {
            Ok(s) => s,
            Err(_) => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    };
}

macro_rules! syscall_errno {
    ($syscall:expr) => {{
        let rv = unsafe { $syscall };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }
        rv
    }};
}

trait AsOsStr {
    fn as_os_str(&self) -> &OsStr;
}
impl AsOsStr for Path {
    fn as_os_str(&self) -> &OsStr {
        self.as_ref()
    }
}
impl AsOsStr for OsStr {
    fn as_os_str(&self) -> &OsStr {
        self
    }
}

/// Reads the full value of one extended attribute. A zero-size probe
/// call first asks the kernel how many bytes are needed, then a second
/// call fills a buffer of exactly that size — xattr values are
/// arbitrary bytes (our birth-time stamp is a packed `f64`), so unlike
/// a NUL-terminated C string read we can't just guess a buffer size.
#[cfg(target_os = "linux")]
pub fn getxattr(path: &Path, name: &OsStr) -> io::Result<Vec<u8>> {
    let path_c = into_cstring!(path);
    let name_c = into_cstring!(name);

    let needed = syscall_errno!(libc::getxattr(
        path_c.as_ptr(),
        name_c.as_ptr(),
        std::ptr::null_mut(),
        0,
    )) as usize;
    if needed == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; needed];
    let read = syscall_errno!(libc::getxattr(
        path_c.as_ptr(),
        name_c.as_ptr(),
        buf.as_mut_ptr() as *mut libc::c_void,
        buf.len(),
    )) as usize;
    buf.truncate(read);
    Ok(buf)
}

#[cfg(target_os = "macos")]
pub fn getxattr(path: &Path, name: &OsStr) -> io::Result<Vec<u8>> {
    let path_c = into_cstring!(path);
    let name_c = into_cstring!(name);

    let needed = syscall_errno!(libc::getxattr(
        path_c.as_ptr(),
        name_c.as_ptr(),
        std::ptr::null_mut(),
        0,
        0,
        0,
    )) as usize;
    if needed == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; needed];
    let read = syscall_errno!(libc::getxattr(
        path_c.as_ptr(),
        name_c.as_ptr(),
        buf.as_mut_ptr() as *mut libc::c_void,
        buf.len(),
        0,
        0,
    )) as usize;
    buf.truncate(read);
    Ok(buf)
}

#[cfg(target_os = "linux")]
pub fn setxattr(path: &Path, name: &OsStr, value: &[u8]) -> io::Result<()> {
    let path_c = into_cstring!(path);
    let name_c = into_cstring!(name);
    syscall_errno!(libc::setxattr(
        path_c.as_ptr(),
        name_c.as_ptr(),
        value.as_ptr() as *const libc::c_void,
        value.len(),
        0,
    ));
    Ok(())
}

#[cfg(target_os = "macos")]
pub fn setxattr(path: &Path, name: &OsStr, value: &[u8]) -> io::Result<()> {
    let path_c = into_cstring!(path);
    let name_c = into_cstring!(name);
    syscall_errno!(libc::setxattr(
        path_c.as_ptr(),
        name_c.as_ptr(),
        value.as_ptr() as *const libc::c_void,
        value.len(),
        0,
        0,
    ));
    Ok(())
}

#[cfg(target_os = "linux")]
pub fn listxattr(path: &Path) -> io::Result<Vec<u8>> {
    let path_c = into_cstring!(path);
    let needed =
        syscall_errno!(libc::listxattr(path_c.as_ptr(), std::ptr::null_mut(), 0)) as usize;
    if needed == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; needed];
    let read = syscall_errno!(libc::listxattr(
        path_c.as_ptr(),
        buf.as_mut_ptr() as *mut libc::c_char,
        buf.len(),
    )) as usize;
    buf.truncate(read);
    Ok(buf)
}

#[cfg(target_os = "macos")]
pub fn listxattr(path: &Path) -> io::Result<Vec<u8>> {
    let path_c = into_cstring!(path);
    let needed =
        syscall_errno!(libc::listxattr(path_c.as_ptr(), std::ptr::null_mut(), 0, 0)) as usize;
    if needed == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; needed];
    let read = syscall_errno!(libc::listxattr(
        path_c.as_ptr(),
        buf.as_mut_ptr() as *mut libc::c_char,
        buf.len(),
        0,
    )) as usize;
    buf.truncate(read);
    Ok(buf)
}

#[cfg(target_os = "linux")]
pub fn removexattr(path: &Path, name: &OsStr) -> io::Result<()> {
    let path_c = into_cstring!(path);
    let name_c = into_cstring!(name);
    syscall_errno!(libc::removexattr(path_c.as_ptr(), name_c.as_ptr()));
    Ok(())
}

#[cfg(target_os = "macos")]
pub fn removexattr(path: &Path, name: &OsStr) -> io::Result<()> {
    let path_c = into_cstring!(path);
    let name_c = into_cstring!(name);
    syscall_errno!(libc::removexattr(path_c.as_ptr(), name_c.as_ptr(), 0));
    Ok(())
}
