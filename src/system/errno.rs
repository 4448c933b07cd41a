// This file is part of procio, a back-pressured process I/O engine.
// Copyright (C) 2025 procio developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Error values
//!
//! This module provides the [`Errno`] type, a thin wrapper around the
//! `errno` value reported by the underlying system calls.

/// Raw error value
///
/// This is an `i32` on every platform the crate supports. The alias exists so
/// call sites do not have to commit to the underlying representation.
pub type RawErrno = i32;

/// Error value
///
/// A new type pattern around the [raw error value](RawErrno). Unlike
/// [`std::io::Error`], this type is `Copy` and carries no allocation, which
/// makes it suitable as the error type of low-level [system](super::System)
/// functions that are called on every I/O operation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct Errno(pub RawErrno);

impl Errno {
    /// Dummy error value that does not equal any real error value.
    pub const NO_ERROR: Self = Self(0);

    /// Permission denied
    pub const EACCES: Self = Self(nix::libc::EACCES as _);
    /// Resource unavailable, try again (may equal [`EWOULDBLOCK`](Self::EWOULDBLOCK))
    pub const EAGAIN: Self = Self(nix::libc::EAGAIN as _);
    /// Bad file descriptor
    pub const EBADF: Self = Self(nix::libc::EBADF as _);
    /// No child processes
    pub const ECHILD: Self = Self(nix::libc::ECHILD as _);
    /// Bad address
    pub const EFAULT: Self = Self(nix::libc::EFAULT as _);
    /// Interrupted function
    pub const EINTR: Self = Self(nix::libc::EINTR as _);
    /// Invalid argument
    pub const EINVAL: Self = Self(nix::libc::EINVAL as _);
    /// I/O error
    pub const EIO: Self = Self(nix::libc::EIO as _);
    /// File descriptor value too large
    pub const EMFILE: Self = Self(nix::libc::EMFILE as _);
    /// Too many files open in system
    pub const ENFILE: Self = Self(nix::libc::ENFILE as _);
    /// No such file or directory
    pub const ENOENT: Self = Self(nix::libc::ENOENT as _);
    /// Executable file format error
    pub const ENOEXEC: Self = Self(nix::libc::ENOEXEC as _);
    /// Not enough space
    pub const ENOMEM: Self = Self(nix::libc::ENOMEM as _);
    /// Functionality not supported
    pub const ENOSYS: Self = Self(nix::libc::ENOSYS as _);
    /// Operation not permitted
    pub const EPERM: Self = Self(nix::libc::EPERM as _);
    /// Broken pipe
    pub const EPIPE: Self = Self(nix::libc::EPIPE as _);
    /// No such process
    pub const ESRCH: Self = Self(nix::libc::ESRCH as _);
    /// Operation would block (may equal [`EAGAIN`](Self::EAGAIN))
    pub const EWOULDBLOCK: Self = Self(nix::libc::EWOULDBLOCK as _);
}

impl From<Errno> for RawErrno {
    #[inline]
    fn from(errno: Errno) -> Self {
        errno.0
    }
}

impl From<RawErrno> for Errno {
    #[inline]
    fn from(errno: RawErrno) -> Self {
        Self(errno)
    }
}

impl From<nix::Error> for Errno {
    #[inline]
    fn from(error: nix::Error) -> Self {
        Self(error as RawErrno)
    }
}

impl From<Errno> for nix::Error {
    #[inline]
    fn from(errno: Errno) -> Self {
        Self::from_i32(errno.0)
    }
}

impl From<Errno> for std::io::Error {
    #[inline]
    fn from(errno: Errno) -> Self {
        std::io::Error::from_raw_os_error(errno.0)
    }
}

impl std::fmt::Display for Errno {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::io::Error::from(*self).fmt(f)
    }
}

impl std::error::Error for Errno {}

/// Type alias for a result that uses [`Errno`] as the error type.
pub type Result<T> = std::result::Result<T, Errno>;
