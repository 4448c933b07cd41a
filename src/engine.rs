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

//! [`Engine`] and the launch sequence
//!
//! An `Engine` couples a [`System`] implementation with the readiness
//! [`Monitor`]. It launches commands ([`spawn`](Engine::spawn)) and pumps
//! readiness events ([`select`](Engine::select)). The engine is
//! reference-counted: cloning it yields another handle to the same system
//! and monitor, and every [`ExecContext`] it creates keeps the shared state
//! alive for its own cleanup.

use crate::io::Fd;
use crate::monitor::Monitor;
use crate::process::ExecContext;
use crate::spawn::Command;
use crate::spawn::SpawnError;
use crate::system::ChildSpec;
use crate::system::Errno;
use crate::system::Pid;
use crate::system::System;
use nix::fcntl::FdFlag;
use nix::fcntl::OFlag;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared state behind an engine handle
#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) system: Box<dyn System>,
    pub(crate) monitor: Monitor,
}

/// Process execution engine
///
/// See the [module documentation](self) for an overview.
#[derive(Clone, Debug)]
pub struct Engine {
    pub(crate) inner: Rc<RefCell<Inner>>,
}

impl Engine {
    /// Creates an engine on top of the given system.
    pub fn new(system: Box<dyn System>) -> Self {
        Engine {
            inner: Rc::new(RefCell::new(Inner {
                system,
                monitor: Monitor::new(),
            })),
        }
    }

    /// Launches the described command as a child process.
    ///
    /// This function creates the child's standard input and output pipes,
    /// marks every end close-on-exec, puts the parent-side ends in
    /// non-blocking mode, starts the child, and closes the child-side ends.
    /// The returned [`ExecContext`] owns the parent-side ends and the child's
    /// process ID.
    ///
    /// On failure, every pipe end created so far is closed before the error
    /// is returned. A failure inside the child after `fork` is not reported
    /// here; it surfaces later as an exit status of
    /// [`FORK_EXEC_FAILURE`](crate::spawn::FORK_EXEC_FAILURE).
    pub fn spawn(&self, command: &Command) -> Result<ExecContext, SpawnError> {
        let (args, envs, dir) = command.prepare()?;
        let stderr = command.stderr_mode();

        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let system = inner.system.as_mut();

        let (stdin_read, stdin_write) = system.pipe()?;
        let (stdout_read, stdout_write) = match system.pipe() {
            Ok(ends) => ends,
            Err(errno) => {
                let _ = system.close(stdin_read);
                let _ = system.close(stdin_write);
                return Err(errno.into());
            }
        };

        let spec = ChildSpec {
            args,
            envs,
            dir,
            stderr,
            stdin_read,
            stdout_write,
        };
        match configure_and_start(system, &spec, stdin_write, stdout_read) {
            Ok(pid) => {
                let _ = system.close(spec.stdin_read);
                let _ = system.close(spec.stdout_write);
                Ok(ExecContext::new(
                    Rc::clone(&self.inner),
                    pid,
                    stdin_write,
                    stdout_read,
                ))
            }
            Err(errno) => {
                for fd in [stdin_read, stdin_write, stdout_read, stdout_write] {
                    let _ = system.close(fd);
                }
                Err(errno.into())
            }
        }
    }

    /// Waits for a next readiness event and fires the armed tokens.
    ///
    /// This function collects the descriptors of all outstanding
    /// subscriptions, passes them to [`System::select`], and wakes the tokens
    /// whose descriptors are ready. With `poll` set, the call never blocks
    /// and may fire nothing. A token may be woken even if the operation it
    /// guards still cannot complete; owners are expected to retry and park
    /// again.
    ///
    /// When no subscription is outstanding, the call returns immediately.
    pub fn select(&self, poll: bool) -> crate::system::Result<()> {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let mut readers = inner.monitor.reader_fds();
        let mut writers = inner.monitor.writer_fds();
        let result = if readers.is_empty() && writers.is_empty() {
            Ok(())
        } else {
            match inner.system.select(&mut readers, &mut writers, poll) {
                Ok(_) => {
                    inner.monitor.wake(&readers, &writers);
                    Ok(())
                }
                Err(Errno::EBADF) => {
                    // Some subscribed descriptor is invalid but select cannot
                    // tell which, so fire everything and let owners find out.
                    inner.monitor.wake_all();
                    Err(Errno::EBADF)
                }
                Err(Errno::EINTR) => Ok(()),
                Err(error) => Err(error),
            }
        };
        inner.monitor.gc();
        result
    }
}

/// Sets the descriptor flags and starts the child.
///
/// All four pipe ends become close-on-exec so no descriptor outlives the
/// upcoming `execve`; the dup targets in the child are fresh copies without
/// the flag. The two parent-side ends additionally become non-blocking,
/// which is what turns a full or empty pipe into `EAGAIN` instead of a
/// blocked thread.
fn configure_and_start(
    system: &mut dyn System,
    spec: &ChildSpec,
    stdin_write: Fd,
    stdout_read: Fd,
) -> crate::system::Result<Pid> {
    for fd in [spec.stdin_read, stdin_write, stdout_read, spec.stdout_write] {
        let flags = system.fcntl_getfd(fd)?;
        system.fcntl_setfd(fd, flags | FdFlag::FD_CLOEXEC)?;
    }
    for fd in [stdin_write, stdout_read] {
        let flags = system.fcntl_getfl(fd)?;
        system.fcntl_setfl(fd, flags | OFlag::O_NONBLOCK)?;
    }
    system.start_child(spec)
}
