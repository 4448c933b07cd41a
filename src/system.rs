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

//! [System] and its implementors.
//!
//! The `System` trait is the seam between the engine and the underlying
//! operating system. There are two implementors: [`RealSystem`] performs
//! actual system calls, and [`VirtualSystem`] simulates the kernel objects
//! the engine touches so that tests can run without spawning real processes.

mod errno;
pub mod real;
pub mod r#virtual;

pub use self::errno::Errno;
pub use self::errno::RawErrno;
pub use self::errno::Result;
pub use self::real::RealSystem;
pub use self::r#virtual::VirtualSystem;
#[doc(no_inline)]
pub use nix::sys::signal::Signal;
#[doc(no_inline)]
pub use nix::unistd::Pid;

use crate::io::Fd;
use crate::process::ChildStatus;
use crate::spawn::StderrMode;
use nix::fcntl::FdFlag;
use nix::fcntl::OFlag;
use std::ffi::c_int;
use std::ffi::CString;
use std::fmt::Debug;

/// Prepared image of a child process
///
/// A `ChildSpec` collects everything [`System::start_child`] needs to turn
/// the calling process's clone into the requested command: the argument and
/// environment vectors already converted to C strings, the optional working
/// directory, the stderr disposition, and the two child-side pipe ends that
/// become the child's standard input and output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChildSpec {
    /// Argument vector; `args[0]` is the path to the executable.
    ///
    /// The path is used as-is. No `$PATH` search is performed.
    pub args: Vec<CString>,

    /// Environment entries in `KEY=VALUE` form, passed to the child verbatim.
    pub envs: Vec<CString>,

    /// Working directory to change to before executing, if any.
    pub dir: Option<CString>,

    /// What to do with the child's standard error.
    pub stderr: StderrMode,

    /// Readable pipe end that becomes the child's standard input.
    pub stdin_read: Fd,

    /// Writable pipe end that becomes the child's standard output.
    pub stdout_write: Fd,
}

/// API to the system-managed resources the engine operates on.
///
/// Every method is a single non-blocking operation; nothing here suspends the
/// caller (the one exception is [`select`](Self::select) when invoked in its
/// waiting mode, which is only done from the readiness pump).
pub trait System: Debug {
    /// Creates an unnamed pipe.
    ///
    /// This is a thin wrapper around the `pipe` system call. If successful,
    /// returns the reading and writing ends of the pipe, in this order.
    fn pipe(&mut self) -> Result<(Fd, Fd)>;

    /// Returns the file status flags for the open file description.
    fn fcntl_getfl(&self, fd: Fd) -> Result<OFlag>;

    /// Sets the file status flags for the open file description.
    fn fcntl_setfl(&mut self, fd: Fd, flags: OFlag) -> Result<()>;

    /// Returns the attributes of the file descriptor.
    fn fcntl_getfd(&self, fd: Fd) -> Result<FdFlag>;

    /// Sets attributes of the file descriptor.
    fn fcntl_setfd(&mut self, fd: Fd, flags: FdFlag) -> Result<()>;

    /// Closes a file descriptor.
    ///
    /// This function returns `Ok(())` when the FD is already closed, which
    /// differs from the behavior of the underlying system call.
    fn close(&mut self, fd: Fd) -> Result<()>;

    /// Reads from the file descriptor.
    ///
    /// Returns the number of bytes read, which is zero at end of input. On a
    /// non-blocking descriptor with no data available, the result is
    /// `Err(Errno::EAGAIN)`.
    fn read(&mut self, fd: Fd, buffer: &mut [u8]) -> Result<usize>;

    /// Writes to the file descriptor.
    ///
    /// Returns the number of bytes written, which may be less than the length
    /// of `buffer`. On a non-blocking descriptor whose pipe buffer is full,
    /// the result is `Err(Errno::EAGAIN)`.
    fn write(&mut self, fd: Fd, buffer: &[u8]) -> Result<usize>;

    /// Waits for file descriptors to become ready.
    ///
    /// When this function returns `Ok`, FDs that are not ready for reading
    /// and writing have been removed from `readers` and `writers`,
    /// respectively, and the return value is the number of FDs left. If
    /// `poll` is true, the function never blocks; otherwise it blocks until
    /// at least one FD is ready or a signal arrives.
    fn select(&mut self, readers: &mut Vec<Fd>, writers: &mut Vec<Fd>, poll: bool)
        -> Result<c_int>;

    /// Creates a child process running the specified command.
    ///
    /// This function wraps `fork` and, in the child, the preparation steps
    /// that replace the standard file descriptors with the pipe ends in
    /// `spec` before `execve`. It returns the process ID of the child in the
    /// parent. The child never returns from this function: it either becomes
    /// the requested command or exits with [`FORK_EXEC_FAILURE`].
    ///
    /// The caller remains responsible for the child-side pipe ends in `spec`
    /// and should close them after this function returns.
    ///
    /// [`FORK_EXEC_FAILURE`]: crate::spawn::FORK_EXEC_FAILURE
    fn start_child(&mut self, spec: &ChildSpec) -> Result<Pid>;

    /// Collects the status of a child process without blocking.
    ///
    /// This is a wrapper around the `waitpid` system call invoked with
    /// `WNOHANG`. Returns `Ok(None)` while the child is still running, and
    /// `Ok(Some(status))` exactly once when the child has been reaped. After
    /// a successful reap the process ID is gone and further calls fail with
    /// `ECHILD`.
    fn wait(&mut self, pid: Pid) -> Result<Option<ChildStatus>>;

    /// Sends a signal.
    ///
    /// This is a thin wrapper around the `kill` system call. If `signal` is
    /// `None`, permission to send a signal is checked, but no signal is sent;
    /// that form serves as a liveness probe.
    fn kill(&mut self, pid: Pid, signal: Option<Signal>) -> Result<()>;
}
