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

//! System simulated in memory
//!
//! [`VirtualSystem`] is a dummy implementor of [`System`] that simulates the
//! kernel objects the engine touches: pipes with finite buffers, a file
//! descriptor table, and a child process table. It does not run any real
//! command. Instead, tests play the role of the child through the shared
//! [`SystemState`]: they drain what the engine wrote to the child's standard
//! input, feed bytes the child supposedly wrote to its standard output, and
//! finally mark the child as exited.
//!
//! All the simulated state lives behind `Rc<RefCell<SystemState>>`, so
//! cloning a `VirtualSystem` yields another view of the same state.

use super::ChildSpec;
use super::Errno;
use super::Result;
use super::System;
use crate::io::Fd;
use crate::process::ChildStatus;
use crate::spawn::StderrMode;
use nix::fcntl::FdFlag;
use nix::fcntl::OFlag;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::ffi::c_int;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::rc::Rc;

/// Lowest file descriptor the simulated process hands out
const FIRST_FD: RawFd = 3;

/// Buffer size of newly created simulated pipes
pub const DEFAULT_PIPE_CAPACITY: usize = 65_536;

/// Process ID of the first simulated child
const FIRST_CHILD_PID: i32 = 1000;

/// Simulated system
///
/// See the [module documentation](self) for an overview.
#[derive(Clone, Debug, Default)]
pub struct VirtualSystem {
    /// State of the simulated system, shared with tests
    pub state: Rc<RefCell<SystemState>>,
}

impl VirtualSystem {
    /// Creates a virtual system with empty state.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Which end of a pipe a file descriptor refers to
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Role {
    Reader,
    Writer,
}

/// Entry in the simulated file descriptor table
#[derive(Clone, Copy, Debug)]
struct OpenFd {
    pipe: usize,
    role: Role,
    nonblocking: bool,
    cloexec: bool,
}

/// Simulated pipe
///
/// The reader and writer counts include the copies held by simulated
/// children. A pipe is removed once both counts reach zero.
#[derive(Debug)]
struct PipeState {
    content: VecDeque<u8>,
    capacity: usize,
    readers: usize,
    writers: usize,
}

/// Whether a simulated child is running, finished, or reaped
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Life {
    Running,
    Finished(ChildStatus),
    Reaped(ChildStatus),
}

/// Simulated child process
///
/// The command line the engine passed to [`System::start_child`] is recorded
/// so tests can assert on it. The child's copies of the pipe ends are modeled
/// as reader/writer counts on the pipes; they are released when the child
/// finishes or when a test closes them explicitly.
#[derive(Debug)]
pub struct VirtualChild {
    /// Argument vector the child was started with
    pub args: Vec<CString>,
    /// Environment entries the child was started with
    pub envs: Vec<CString>,
    /// Working directory requested for the child, if any
    pub dir: Option<CString>,
    /// Requested stderr disposition
    pub stderr: StderrMode,

    stdin_pipe: usize,
    stdout_pipe: usize,
    holds_stdin: bool,
    holds_stdout: bool,
    life: Life,
}

/// State of the simulated system
#[derive(Debug)]
pub struct SystemState {
    fds: BTreeMap<RawFd, OpenFd>,
    pipes: BTreeMap<usize, PipeState>,
    next_pipe: usize,
    children: BTreeMap<i32, VirtualChild>,
    next_pid: i32,

    /// Buffer size assigned to pipes created from now on
    pub pipe_capacity: usize,
    /// When set, the next `pipe` call fails with this error.
    pub fail_next_pipe: Option<Errno>,
    /// When set, the next `start_child` call fails with this error.
    pub fail_next_spawn: Option<Errno>,
}

impl Default for SystemState {
    fn default() -> Self {
        SystemState {
            fds: BTreeMap::new(),
            pipes: BTreeMap::new(),
            next_pipe: 0,
            children: BTreeMap::new(),
            next_pid: FIRST_CHILD_PID,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            fail_next_pipe: None,
            fail_next_spawn: None,
        }
    }
}

impl SystemState {
    fn next_free_fd(&self) -> RawFd {
        let mut candidate = FIRST_FD;
        while self.fds.contains_key(&candidate) {
            candidate += 1;
        }
        candidate
    }

    fn release_end(&mut self, pipe: usize, role: Role) {
        let Some(entry) = self.pipes.get_mut(&pipe) else {
            return;
        };
        match role {
            Role::Reader => entry.readers = entry.readers.saturating_sub(1),
            Role::Writer => entry.writers = entry.writers.saturating_sub(1),
        }
        if entry.readers == 0 && entry.writers == 0 {
            self.pipes.remove(&pipe);
        }
    }

    fn finish_child(&mut self, pid: Pid, status: ChildStatus) {
        let Some(child) = self.children.get_mut(&pid.as_raw()) else {
            return;
        };
        if child.life != Life::Running {
            return;
        }
        child.life = Life::Finished(status);
        let mut released = Vec::new();
        if std::mem::take(&mut child.holds_stdin) {
            released.push((child.stdin_pipe, Role::Reader));
        }
        if std::mem::take(&mut child.holds_stdout) {
            released.push((child.stdout_pipe, Role::Writer));
        }
        for (pipe, role) in released {
            self.release_end(pipe, role);
        }
    }

    /// Returns the simulated child with the given process ID.
    pub fn child(&self, pid: Pid) -> Option<&VirtualChild> {
        self.children.get(&pid.as_raw())
    }

    /// Returns the number of open file descriptors in the simulated parent.
    pub fn open_fd_count(&self) -> usize {
        self.fds.len()
    }

    /// Returns whether the descriptor has the close-on-exec flag.
    pub fn is_cloexec(&self, fd: Fd) -> Option<bool> {
        self.fds.get(&fd.0).map(|open_fd| open_fd.cloexec)
    }

    /// Returns whether the descriptor is in non-blocking mode.
    pub fn is_nonblocking(&self, fd: Fd) -> Option<bool> {
        self.fds.get(&fd.0).map(|open_fd| open_fd.nonblocking)
    }

    /// Removes and returns everything written to the child's standard input.
    pub fn take_child_input(&mut self, pid: Pid) -> Vec<u8> {
        let Some(child) = self.children.get(&pid.as_raw()) else {
            return Vec::new();
        };
        match self.pipes.get_mut(&child.stdin_pipe) {
            Some(pipe) => pipe.content.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Appends bytes to the child's standard output, up to the free space in
    /// the pipe buffer. Returns the number of bytes accepted.
    pub fn feed_child_output(&mut self, pid: Pid, bytes: &[u8]) -> usize {
        let Some(child) = self.children.get(&pid.as_raw()) else {
            return 0;
        };
        if !child.holds_stdout {
            return 0;
        }
        match self.pipes.get_mut(&child.stdout_pipe) {
            Some(pipe) => {
                let space = pipe.capacity.saturating_sub(pipe.content.len());
                let count = space.min(bytes.len());
                pipe.content.extend(&bytes[..count]);
                count
            }
            None => 0,
        }
    }

    /// Simulates the child closing its standard output, so the parent side
    /// observes end of input once the buffered content is drained.
    pub fn close_child_output(&mut self, pid: Pid) {
        let Some(child) = self.children.get_mut(&pid.as_raw()) else {
            return;
        };
        if std::mem::take(&mut child.holds_stdout) {
            let pipe = child.stdout_pipe;
            self.release_end(pipe, Role::Writer);
        }
    }

    /// Marks a running child as finished with the given status.
    ///
    /// The status becomes observable through [`System::wait`]. The child's
    /// copies of the pipe ends are released.
    pub fn exit_child(&mut self, pid: Pid, status: ChildStatus) {
        self.finish_child(pid, status);
    }

    fn ready_for_reading(&self, fd: Fd) -> bool {
        let Some(open_fd) = self.fds.get(&fd.0) else {
            return false;
        };
        if open_fd.role != Role::Reader {
            return false;
        }
        match self.pipes.get(&open_fd.pipe) {
            Some(pipe) => !pipe.content.is_empty() || pipe.writers == 0,
            None => true,
        }
    }

    fn ready_for_writing(&self, fd: Fd) -> bool {
        let Some(open_fd) = self.fds.get(&fd.0) else {
            return false;
        };
        if open_fd.role != Role::Writer {
            return false;
        }
        match self.pipes.get(&open_fd.pipe) {
            Some(pipe) => pipe.content.len() < pipe.capacity || pipe.readers == 0,
            None => true,
        }
    }
}

impl System for VirtualSystem {
    fn pipe(&mut self) -> Result<(Fd, Fd)> {
        let mut state = self.state.borrow_mut();
        if let Some(errno) = state.fail_next_pipe.take() {
            return Err(errno);
        }
        let pipe = state.next_pipe;
        state.next_pipe += 1;
        let capacity = state.pipe_capacity;
        state.pipes.insert(
            pipe,
            PipeState {
                content: VecDeque::new(),
                capacity,
                readers: 1,
                writers: 1,
            },
        );
        let reader = state.next_free_fd();
        state.fds.insert(
            reader,
            OpenFd {
                pipe,
                role: Role::Reader,
                nonblocking: false,
                cloexec: false,
            },
        );
        let writer = state.next_free_fd();
        state.fds.insert(
            writer,
            OpenFd {
                pipe,
                role: Role::Writer,
                nonblocking: false,
                cloexec: false,
            },
        );
        Ok((Fd(reader), Fd(writer)))
    }

    fn fcntl_getfl(&self, fd: Fd) -> Result<OFlag> {
        let state = self.state.borrow();
        let open_fd = state.fds.get(&fd.0).ok_or(Errno::EBADF)?;
        let access = match open_fd.role {
            Role::Reader => OFlag::O_RDONLY,
            Role::Writer => OFlag::O_WRONLY,
        };
        let nonblock = if open_fd.nonblocking {
            OFlag::O_NONBLOCK
        } else {
            OFlag::empty()
        };
        Ok(access | nonblock)
    }

    fn fcntl_setfl(&mut self, fd: Fd, flags: OFlag) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let open_fd = state.fds.get_mut(&fd.0).ok_or(Errno::EBADF)?;
        open_fd.nonblocking = flags.contains(OFlag::O_NONBLOCK);
        Ok(())
    }

    fn fcntl_getfd(&self, fd: Fd) -> Result<FdFlag> {
        let state = self.state.borrow();
        let open_fd = state.fds.get(&fd.0).ok_or(Errno::EBADF)?;
        if open_fd.cloexec {
            Ok(FdFlag::FD_CLOEXEC)
        } else {
            Ok(FdFlag::empty())
        }
    }

    fn fcntl_setfd(&mut self, fd: Fd, flags: FdFlag) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let open_fd = state.fds.get_mut(&fd.0).ok_or(Errno::EBADF)?;
        open_fd.cloexec = flags.contains(FdFlag::FD_CLOEXEC);
        Ok(())
    }

    fn close(&mut self, fd: Fd) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(open_fd) = state.fds.remove(&fd.0) {
            state.release_end(open_fd.pipe, open_fd.role);
        }
        Ok(())
    }

    fn read(&mut self, fd: Fd, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        let open_fd = *state.fds.get(&fd.0).ok_or(Errno::EBADF)?;
        if open_fd.role != Role::Reader {
            return Err(Errno::EBADF);
        }
        let pipe = state.pipes.get_mut(&open_fd.pipe).ok_or(Errno::EBADF)?;
        if pipe.content.is_empty() {
            if pipe.writers == 0 {
                return Ok(0);
            }
            // The simulated read never blocks, regardless of the mode.
            return Err(Errno::EAGAIN);
        }
        let count = pipe.content.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(pipe.content.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write(&mut self, fd: Fd, buffer: &[u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        let open_fd = *state.fds.get(&fd.0).ok_or(Errno::EBADF)?;
        if open_fd.role != Role::Writer {
            return Err(Errno::EBADF);
        }
        let pipe = state.pipes.get_mut(&open_fd.pipe).ok_or(Errno::EBADF)?;
        if pipe.readers == 0 {
            return Err(Errno::EPIPE);
        }
        let space = pipe.capacity.saturating_sub(pipe.content.len());
        if space == 0 {
            return Err(Errno::EAGAIN);
        }
        let count = space.min(buffer.len());
        pipe.content.extend(&buffer[..count]);
        Ok(count)
    }

    /// Waits for file descriptors to become ready.
    ///
    /// The simulated version never blocks. When nothing is ready, it behaves
    /// as if the timeout expired immediately, even if `poll` is false.
    fn select(
        &mut self,
        readers: &mut Vec<Fd>,
        writers: &mut Vec<Fd>,
        _poll: bool,
    ) -> Result<c_int> {
        let state = self.state.borrow();
        for fd in readers.iter().chain(writers.iter()) {
            if !state.fds.contains_key(&fd.0) {
                return Err(Errno::EBADF);
            }
        }
        readers.retain(|fd| state.ready_for_reading(*fd));
        writers.retain(|fd| state.ready_for_writing(*fd));
        Ok((readers.len() + writers.len()) as c_int)
    }

    fn start_child(&mut self, spec: &ChildSpec) -> Result<Pid> {
        let mut state = self.state.borrow_mut();
        if let Some(errno) = state.fail_next_spawn.take() {
            return Err(errno);
        }
        if spec.args.is_empty() {
            return Err(Errno::EINVAL);
        }
        let stdin = *state.fds.get(&spec.stdin_read.0).ok_or(Errno::EBADF)?;
        if stdin.role != Role::Reader {
            return Err(Errno::EBADF);
        }
        let stdout = *state.fds.get(&spec.stdout_write.0).ok_or(Errno::EBADF)?;
        if stdout.role != Role::Writer {
            return Err(Errno::EBADF);
        }

        // The child gets its own copies of the two pipe ends.
        if let Some(pipe) = state.pipes.get_mut(&stdin.pipe) {
            pipe.readers += 1;
        }
        if let Some(pipe) = state.pipes.get_mut(&stdout.pipe) {
            pipe.writers += 1;
        }

        let pid = Pid::from_raw(state.next_pid);
        state.next_pid += 1;
        state.children.insert(
            pid.as_raw(),
            VirtualChild {
                args: spec.args.clone(),
                envs: spec.envs.clone(),
                dir: spec.dir.clone(),
                stderr: spec.stderr,
                stdin_pipe: stdin.pipe,
                stdout_pipe: stdout.pipe,
                holds_stdin: true,
                holds_stdout: true,
                life: Life::Running,
            },
        );
        Ok(pid)
    }

    fn wait(&mut self, pid: Pid) -> Result<Option<ChildStatus>> {
        let mut state = self.state.borrow_mut();
        let child = state.children.get_mut(&pid.as_raw()).ok_or(Errno::ECHILD)?;
        match child.life {
            Life::Running => Ok(None),
            Life::Finished(status) => {
                child.life = Life::Reaped(status);
                Ok(Some(status))
            }
            Life::Reaped(_) => Err(Errno::ECHILD),
        }
    }

    fn kill(&mut self, pid: Pid, signal: Option<Signal>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let life = match state.children.get(&pid.as_raw()) {
            Some(child) => child.life,
            None => return Err(Errno::ESRCH),
        };
        match signal {
            // A finished child is still visible until it is reaped.
            None => match life {
                Life::Running | Life::Finished(_) => Ok(()),
                Life::Reaped(_) => Err(Errno::ESRCH),
            },
            Some(signal) => match life {
                Life::Running => {
                    let status = if signal == Signal::SIGSTOP {
                        ChildStatus::Stopped
                    } else {
                        ChildStatus::Signaled(signal as i32)
                    };
                    state.finish_child(pid, status);
                    Ok(())
                }
                Life::Finished(_) => Ok(()),
                Life::Reaped(_) => Err(Errno::ESRCH),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a child spec plus the parent-side ends of its two pipes.
    fn spec(system: &mut VirtualSystem) -> (ChildSpec, Fd, Fd) {
        let (stdin_read, stdin_write) = system.pipe().unwrap();
        let (stdout_read, stdout_write) = system.pipe().unwrap();
        let spec = ChildSpec {
            args: vec![CString::new("/bin/true").unwrap()],
            envs: Vec::new(),
            dir: None,
            stderr: StderrMode::Inherit,
            stdin_read,
            stdout_write,
        };
        (spec, stdin_write, stdout_read)
    }

    #[test]
    fn pipe_read_and_write() {
        let mut system = VirtualSystem::new();
        let (reader, writer) = system.pipe().unwrap();

        assert_eq!(system.read(reader, &mut [0; 4]), Err(Errno::EAGAIN));
        assert_eq!(system.write(writer, b"data"), Ok(4));
        let mut buffer = [0; 8];
        assert_eq!(system.read(reader, &mut buffer), Ok(4));
        assert_eq!(&buffer[..4], b"data");
    }

    #[test]
    fn pipe_capacity_limits_writes() {
        let mut system = VirtualSystem::new();
        system.state.borrow_mut().pipe_capacity = 4;
        let (reader, writer) = system.pipe().unwrap();

        assert_eq!(system.write(writer, b"abcdef"), Ok(4));
        assert_eq!(system.write(writer, b"gh"), Err(Errno::EAGAIN));
        let mut buffer = [0; 2];
        assert_eq!(system.read(reader, &mut buffer), Ok(2));
        assert_eq!(system.write(writer, b"gh"), Ok(2));
    }

    #[test]
    fn read_returns_eof_when_writers_are_gone() {
        let mut system = VirtualSystem::new();
        let (reader, writer) = system.pipe().unwrap();
        system.write(writer, b"x").unwrap();
        system.close(writer).unwrap();

        let mut buffer = [0; 4];
        assert_eq!(system.read(reader, &mut buffer), Ok(1));
        assert_eq!(system.read(reader, &mut buffer), Ok(0));
    }

    #[test]
    fn write_fails_when_readers_are_gone() {
        let mut system = VirtualSystem::new();
        let (reader, writer) = system.pipe().unwrap();
        system.close(reader).unwrap();
        assert_eq!(system.write(writer, b"x"), Err(Errno::EPIPE));
    }

    #[test]
    fn select_reports_ready_descriptors() {
        let mut system = VirtualSystem::new();
        let (reader, writer) = system.pipe().unwrap();

        let mut readers = vec![reader];
        let mut writers = vec![writer];
        assert_eq!(system.select(&mut readers, &mut writers, true), Ok(1));
        assert_eq!(readers, []);
        assert_eq!(writers, [writer]);

        system.write(writer, b"ready").unwrap();
        let mut readers = vec![reader];
        let mut writers = Vec::new();
        assert_eq!(system.select(&mut readers, &mut writers, true), Ok(1));
        assert_eq!(readers, [reader]);
    }

    #[test]
    fn select_rejects_unknown_descriptor() {
        let mut system = VirtualSystem::new();
        let mut readers = vec![Fd(42)];
        let mut writers = Vec::new();
        assert_eq!(
            system.select(&mut readers, &mut writers, true),
            Err(Errno::EBADF)
        );
    }

    #[test]
    fn child_life_cycle() {
        let mut system = VirtualSystem::new();
        let (spec, _stdin_write, _stdout_read) = spec(&mut system);
        let pid = system.start_child(&spec).unwrap();

        assert_eq!(system.wait(pid), Ok(None));
        assert_eq!(system.kill(pid, None), Ok(()));

        system
            .state
            .borrow_mut()
            .exit_child(pid, ChildStatus::Exited(0));
        assert_eq!(system.kill(pid, None), Ok(()));
        assert_eq!(system.wait(pid), Ok(Some(ChildStatus::Exited(0))));
        assert_eq!(system.wait(pid), Err(Errno::ECHILD));
        assert_eq!(system.kill(pid, None), Err(Errno::ESRCH));
    }

    #[test]
    fn kill_records_signal_status() {
        let mut system = VirtualSystem::new();
        let (spec, _stdin_write, _stdout_read) = spec(&mut system);
        let pid = system.start_child(&spec).unwrap();

        system.kill(pid, Some(Signal::SIGTERM)).unwrap();
        assert_eq!(
            system.wait(pid),
            Ok(Some(ChildStatus::Signaled(Signal::SIGTERM as i32)))
        );
    }

    #[test]
    fn finished_child_releases_pipe_ends() {
        let mut system = VirtualSystem::new();
        let (spec, stdin_write, stdout_read) = spec(&mut system);
        let pid = system.start_child(&spec).unwrap();

        // The parent drops the child-side ends as the launcher would.
        system.close(spec.stdin_read).unwrap();
        system.close(spec.stdout_write).unwrap();

        system.state.borrow_mut().feed_child_output(pid, b"out");
        system.state.borrow_mut().exit_child(pid, ChildStatus::Exited(0));

        let mut buffer = [0; 8];
        assert_eq!(system.read(stdout_read, &mut buffer), Ok(3));
        assert_eq!(system.read(stdout_read, &mut buffer), Ok(0));
        assert_eq!(system.write(stdin_write, b"late"), Err(Errno::EPIPE));
    }

    #[test]
    fn fcntl_flags_are_remembered() {
        let mut system = VirtualSystem::new();
        let (reader, _writer) = system.pipe().unwrap();

        assert_eq!(system.fcntl_getfd(reader), Ok(FdFlag::empty()));
        system.fcntl_setfd(reader, FdFlag::FD_CLOEXEC).unwrap();
        assert_eq!(system.fcntl_getfd(reader), Ok(FdFlag::FD_CLOEXEC));

        let flags = system.fcntl_getfl(reader).unwrap();
        assert!(!flags.contains(OFlag::O_NONBLOCK));
        system.fcntl_setfl(reader, flags | OFlag::O_NONBLOCK).unwrap();
        assert!(system.fcntl_getfl(reader).unwrap().contains(OFlag::O_NONBLOCK));
    }
}
