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

//! Implementation of `System` that actually interacts with the system.

use super::ChildSpec;
use super::Errno;
use super::Result;
use super::System;
use crate::io::Fd;
use crate::process::ChildStatus;
use crate::spawn::StderrMode;
use crate::spawn::FORK_EXEC_FAILURE;
use nix::fcntl::FdFlag;
use nix::fcntl::OFlag;
use nix::sys::select::{pselect, FdSet};
use nix::sys::signal::{Signal, SigSet};
use nix::sys::stat::Mode;
use nix::sys::time::{TimeSpec, TimeValLike};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd;
use nix::unistd::ForkResult;
use nix::unistd::Pid;
use nix::unistd::SysconfVar;
use std::ffi::c_int;
use std::ffi::CStr;

/// Implementation of `System` that actually interacts with the system.
///
/// `RealSystem` is an empty `struct` because the underlying operating system
/// manages all the state this implementation operates on.
#[derive(Debug)]
pub struct RealSystem(());

impl RealSystem {
    /// Returns an instance of `RealSystem`.
    ///
    /// # Safety
    ///
    /// This function is marked `unsafe` because improper use of `RealSystem`
    /// may lead to undefined behavior. The [`start_child`](System::start_child)
    /// implementation calls `fork`, so you must not use `RealSystem` in a
    /// multi-threaded program, and it is your responsibility to make sure you
    /// are using only one instance of `RealSystem` in the process.
    pub unsafe fn new() -> Self {
        RealSystem(())
    }
}

impl System for RealSystem {
    fn pipe(&mut self) -> Result<(Fd, Fd)> {
        let (reader, writer) = unistd::pipe().map_err(Errno::from)?;
        Ok((Fd(reader), Fd(writer)))
    }

    fn fcntl_getfl(&self, fd: Fd) -> Result<OFlag> {
        nix::fcntl::fcntl(fd.0, nix::fcntl::FcntlArg::F_GETFL)
            .map(OFlag::from_bits_truncate)
            .map_err(Errno::from)
    }

    fn fcntl_setfl(&mut self, fd: Fd, flags: OFlag) -> Result<()> {
        nix::fcntl::fcntl(fd.0, nix::fcntl::FcntlArg::F_SETFL(flags))
            .map(drop)
            .map_err(Errno::from)
    }

    fn fcntl_getfd(&self, fd: Fd) -> Result<FdFlag> {
        nix::fcntl::fcntl(fd.0, nix::fcntl::FcntlArg::F_GETFD)
            .map(FdFlag::from_bits_truncate)
            .map_err(Errno::from)
    }

    fn fcntl_setfd(&mut self, fd: Fd, flags: FdFlag) -> Result<()> {
        nix::fcntl::fcntl(fd.0, nix::fcntl::FcntlArg::F_SETFD(flags))
            .map(drop)
            .map_err(Errno::from)
    }

    fn close(&mut self, fd: Fd) -> Result<()> {
        loop {
            match unistd::close(fd.0) {
                Err(nix::Error::EBADF) => return Ok(()),
                Err(nix::Error::EINTR) => (),
                other => return other.map_err(Errno::from),
            }
        }
    }

    fn read(&mut self, fd: Fd, buffer: &mut [u8]) -> Result<usize> {
        loop {
            let result = unistd::read(fd.0, buffer);
            if result != Err(nix::Error::EINTR) {
                return result.map_err(Errno::from);
            }
        }
    }

    fn write(&mut self, fd: Fd, buffer: &[u8]) -> Result<usize> {
        loop {
            let result = unistd::write(fd.0, buffer);
            if result != Err(nix::Error::EINTR) {
                return result.map_err(Errno::from);
            }
        }
    }

    fn select(
        &mut self,
        readers: &mut Vec<Fd>,
        writers: &mut Vec<Fd>,
        poll: bool,
    ) -> Result<c_int> {
        let mut read_set = FdSet::new();
        for fd in readers.iter() {
            read_set.insert(fd.0);
        }
        let mut write_set = FdSet::new();
        for fd in writers.iter() {
            write_set.insert(fd.0);
        }
        let timeout = if poll { Some(TimeSpec::seconds(0)) } else { None };
        let sigmask: Option<&SigSet> = None;
        let count = pselect(
            None,
            &mut read_set,
            &mut write_set,
            None,
            timeout.as_ref(),
            sigmask,
        )
        .map_err(Errno::from)?;
        readers.retain(|fd| read_set.contains(fd.0));
        writers.retain(|fd| write_set.contains(fd.0));
        Ok(count)
    }

    /// Creates a child process running the specified command.
    ///
    /// This implementation calls the `fork` system call. The child branch
    /// performs only async-signal-safe operations: `chdir`, `close`, `dup2`,
    /// `open`, and finally `execve`. Any failure along that path makes the
    /// child exit with [`FORK_EXEC_FAILURE`] after writing a diagnostic to
    /// its standard error.
    fn start_child(&mut self, spec: &ChildSpec) -> Result<Pid> {
        if spec.args.is_empty() {
            return Err(Errno::EINVAL);
        }
        // SAFETY: As stated on RealSystem::new, the caller is responsible for
        // making only one instance of RealSystem in a single-threaded process.
        match unsafe { unistd::fork() }.map_err(Errno::from)? {
            ForkResult::Parent { child } => Ok(child),
            ForkResult::Child => become_command(spec),
        }
    }

    fn wait(&mut self, pid: Pid) -> Result<Option<ChildStatus>> {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)).map_err(Errno::from)? {
            WaitStatus::Exited(_, code) => Ok(Some(ChildStatus::Exited(code))),
            WaitStatus::Signaled(_, signal, _) => Ok(Some(ChildStatus::Signaled(signal as i32))),
            WaitStatus::Stopped(_, _) => Ok(Some(ChildStatus::Stopped)),
            WaitStatus::StillAlive => Ok(None),
            _ => Ok(None),
        }
    }

    fn kill(&mut self, pid: Pid, signal: Option<Signal>) -> Result<()> {
        nix::sys::signal::kill(pid, signal).map_err(Errno::from)
    }
}

// SAFETY: the literal is NUL-terminated and contains no interior NUL byte.
const DEV_NULL: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"/dev/null\0") };

/// Fallback for `sysconf(_SC_OPEN_MAX)` when the limit is indeterminate
const OPEN_MAX_FALLBACK: nix::libc::c_long = 1024;

/// Replaces the current (child) process with the command in `spec`.
///
/// Called between `fork` and `execve`, so everything here must be
/// async-signal-safe: no allocation and no non-reentrant library calls.
fn become_command(spec: &ChildSpec) -> ! {
    if let Some(dir) = &spec.dir {
        if unistd::chdir(dir.as_c_str()).is_err() {
            child_fail("chdir");
        }
    }

    let _ = unistd::close(Fd::STDIN.0);
    let _ = unistd::close(Fd::STDOUT.0);

    if dup2_retry(spec.stdin_read, Fd::STDIN).is_err() {
        child_fail("dup2 stdin");
    }
    if dup2_retry(spec.stdout_write, Fd::STDOUT).is_err() {
        child_fail("dup2 stdout");
    }

    if spec.stderr == StderrMode::Discard {
        let _ = unistd::close(Fd::STDERR.0);
        match nix::fcntl::open(DEV_NULL, OFlag::O_WRONLY, Mode::empty()) {
            Ok(null_fd) => {
                if dup2_retry(Fd(null_fd), Fd::STDERR).is_err() {
                    child_fail("dup2 stderr");
                }
                let _ = unistd::close(null_fd);
            }
            Err(_) => child_fail("open /dev/null"),
        }
    }

    close_extra_fds();

    loop {
        match unistd::execve(spec.args[0].as_c_str(), &spec.args, &spec.envs) {
            Err(nix::Error::EINTR) => (),
            _ => break,
        }
    }
    child_fail("execve")
}

fn dup2_retry(from: Fd, to: Fd) -> nix::Result<Fd> {
    loop {
        match unistd::dup2(from.0, to.0) {
            Err(nix::Error::EINTR) => (),
            other => return other.map(Fd),
        }
    }
}

/// Closes every file descriptor above the standard three.
///
/// There is no portable way to enumerate open descriptors, so this walks all
/// possible values up to `sysconf(_SC_OPEN_MAX)`. The cost of the bounded
/// loop is accepted in exchange for not depending on `/proc`.
fn close_extra_fds() {
    let limit = unistd::sysconf(SysconfVar::OPEN_MAX)
        .ok()
        .flatten()
        .unwrap_or(OPEN_MAX_FALLBACK);
    for fd in (Fd::STDERR.0 + 1)..limit as i32 {
        let _ = unistd::close(fd);
    }
}

/// Reports a pre-exec failure and exits with [`FORK_EXEC_FAILURE`].
///
/// Writes the failing step and the current `errno` description to standard
/// error using raw `write` calls, then calls `_exit`. Both are
/// async-signal-safe. The parent cannot distinguish this exit code from the
/// command itself exiting with the same value.
fn child_fail(step: &str) -> ! {
    let errno = nix::errno::Errno::last();
    let _ = unistd::write(Fd::STDERR.0, b"procio: ");
    let _ = unistd::write(Fd::STDERR.0, step.as_bytes());
    let _ = unistd::write(Fd::STDERR.0, b": ");
    let _ = unistd::write(Fd::STDERR.0, errno.desc().as_bytes());
    let _ = unistd::write(Fd::STDERR.0, b"\n");
    unsafe { nix::libc::_exit(FORK_EXEC_FAILURE) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_system_pipe_round_trip() {
        let mut system = unsafe { RealSystem::new() };
        let (reader, writer) = system.pipe().unwrap();

        assert_eq!(system.write(writer, b"ready"), Ok(5));
        let mut buffer = [0; 8];
        assert_eq!(system.read(reader, &mut buffer), Ok(5));
        assert_eq!(&buffer[..5], b"ready");

        system.close(reader).unwrap();
        system.close(writer).unwrap();
    }

    #[test]
    fn real_system_close_is_idempotent() {
        let mut system = unsafe { RealSystem::new() };
        let (reader, _writer) = system.pipe().unwrap();
        assert_eq!(system.close(reader), Ok(()));
        assert_eq!(system.close(reader), Ok(()));
    }

    #[test]
    fn real_system_sets_nonblocking_flag() {
        let mut system = unsafe { RealSystem::new() };
        let (reader, writer) = system.pipe().unwrap();

        let flags = system.fcntl_getfl(reader).unwrap();
        assert!(!flags.contains(OFlag::O_NONBLOCK));
        system.fcntl_setfl(reader, flags | OFlag::O_NONBLOCK).unwrap();
        let flags = system.fcntl_getfl(reader).unwrap();
        assert!(flags.contains(OFlag::O_NONBLOCK));

        let mut buffer = [0; 1];
        assert_eq!(system.read(reader, &mut buffer), Err(Errno::EAGAIN));

        system.close(reader).unwrap();
        system.close(writer).unwrap();
    }
}
