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

//! Execution contexts
//!
//! An [`ExecContext`] is the handle to one child process launched by an
//! [`Engine`](crate::engine::Engine). It owns the two parent-side pipe ends,
//! the child's process ID, and the per-direction readiness [`Token`]s, and it
//! caches the exit status once the child has been reaped.
//!
//! The canonical interface is the set of non-blocking operations:
//! [`write`](ExecContext::write), [`read`](ExecContext::read),
//! [`close`](ExecContext::close), [`try_wait`](ExecContext::try_wait),
//! [`terminate`](ExecContext::terminate), [`kill`](ExecContext::kill),
//! [`is_alive`](ExecContext::is_alive), and [`os_pid`](ExecContext::os_pid).
//! Each call performs at most one system call and returns promptly; when an
//! I/O call cannot complete, it arms the direction's token and the caller is
//! expected to retry after the next readiness event.
//!
//! On top of that, [`write_all`](ExecContext::write_all) and
//! [`read_async`](ExecContext::read_async) present the same operations as
//! futures for use in a cooperatively scheduled host. A context can be
//! cloned so that one task writes while another reads; the two directions
//! are independent. Concurrent use of a single direction from more than one
//! task is not supported.
//!
//! Dropping the last clone of a context closes any still-open pipe end and
//! cancels outstanding readiness subscriptions. It does not reap the child;
//! without a supervisor that eventually calls [`try_wait`], a terminated
//! child remains a zombie.
//!
//! [`try_wait`]: ExecContext::try_wait

use crate::engine::Inner;
use crate::io::Fd;
use crate::io::PipeEnd;
use crate::io::PIPE_BUF_SIZE;
use crate::monitor::Direction;
use crate::monitor::Token;
use crate::system::Errno;
use crate::system::Pid;
use crate::system::Signal;
use std::cell::Cell;
use std::cell::RefCell;
use std::future::poll_fn;
use std::rc::Rc;
use std::task::Poll;
use thiserror::Error;

/// Collected status of a child process
///
/// This is the classification of the value reported by `waitpid`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChildStatus {
    /// The child exited with this exit code.
    Exited(i32),
    /// The child was terminated by the signal with this number.
    Signaled(i32),
    /// The child is stopped by a signal.
    Stopped,
}

/// Size request for a [`read`](ExecContext::read) operation
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReadRequest {
    /// Return whatever is available, up to [`PIPE_BUF_SIZE`] bytes, without
    /// arming read-readiness on a short result.
    ///
    /// This mode is meant for callers that consult readiness themselves.
    Unbuffered,

    /// Return at most this many bytes, clamped to [`PIPE_BUF_SIZE`].
    ///
    /// A result shorter than requested arms read-readiness so the caller can
    /// park until more output arrives. A request of zero is invalid.
    UpTo(usize),
}

/// Error from a non-blocking I/O operation on an execution context
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum IoError {
    /// The operation cannot make progress right now.
    ///
    /// Readiness has been armed on the direction's token; retry after the
    /// next readiness event.
    #[error("operation would block")]
    WouldBlock,

    /// The operation addressed a pipe end that has been closed.
    #[error("pipe already closed")]
    PipeClosed,

    /// The request itself is invalid, such as an empty write buffer or a
    /// zero-sized read.
    #[error("invalid request")]
    InvalidRequest,

    /// The operating system reported an error.
    #[error(transparent)]
    Os(#[from] Errno),
}

/// Whether the child is still attached to its process ID or already reaped
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ChildState {
    Running(Pid),
    Reaped(ChildStatus),
}

/// State shared by all clones of an execution context
#[derive(Debug)]
struct ContextState {
    core: Rc<RefCell<Inner>>,
    child: Cell<ChildState>,
    input_fd: Cell<Option<Fd>>,
    output_fd: Cell<Option<Fd>>,
    read_token: Token,
    write_token: Token,
}

/// Handle to a child process and its pipes
///
/// See the [module documentation](self) for an overview. Contexts are
/// created by [`Engine::spawn`](crate::engine::Engine::spawn).
///
/// Cloning a context yields another handle to the same child; the clones
/// share the pipe ends and the cached exit status. The underlying resources
/// are released when the last clone is dropped.
#[derive(Clone, Debug)]
pub struct ExecContext {
    state: Rc<ContextState>,
}

impl ExecContext {
    pub(crate) fn new(core: Rc<RefCell<Inner>>, pid: Pid, input_fd: Fd, output_fd: Fd) -> Self {
        ExecContext {
            state: Rc::new(ContextState {
                core,
                child: Cell::new(ChildState::Running(pid)),
                input_fd: Cell::new(Some(input_fd)),
                output_fd: Cell::new(Some(output_fd)),
                read_token: Token::new(),
                write_token: Token::new(),
            }),
        }
    }

    /// Returns the parent-side end feeding the child's standard input, if it
    /// is still open.
    #[must_use]
    pub fn input_fd(&self) -> Option<Fd> {
        self.state.input_fd.get()
    }

    /// Returns the parent-side end carrying the child's standard output, if
    /// it is still open.
    #[must_use]
    pub fn output_fd(&self) -> Option<Fd> {
        self.state.output_fd.get()
    }

    /// Returns the readiness token of the read direction.
    #[must_use]
    pub fn read_token(&self) -> &Token {
        &self.state.read_token
    }

    /// Returns the readiness token of the write direction.
    #[must_use]
    pub fn write_token(&self) -> &Token {
        &self.state.write_token
    }

    /// Returns the cached exit status, if the child has been reaped.
    #[must_use]
    pub fn status(&self) -> Option<ChildStatus> {
        match self.state.child.get() {
            ChildState::Running(_) => None,
            ChildState::Reaped(status) => Some(status),
        }
    }

    /// Writes bytes to the child's standard input.
    ///
    /// This function issues a single non-blocking `write`. The result may be
    /// a short count when the pipe buffer cannot take the whole `data`; both
    /// a short count and [`IoError::WouldBlock`] arm write-readiness on the
    /// [write token](Self::write_token), so the caller can retry once the
    /// child has drained some input.
    ///
    /// An empty `data` is rejected with [`IoError::InvalidRequest`]. Writing
    /// after [`close`](Self::close) of the input end fails with
    /// [`IoError::PipeClosed`].
    pub fn write(&self, data: &[u8]) -> Result<usize, IoError> {
        if data.is_empty() {
            return Err(IoError::InvalidRequest);
        }
        let Some(fd) = self.state.input_fd.get() else {
            return Err(IoError::PipeClosed);
        };
        let mut core = self.state.core.borrow_mut();
        let core = &mut *core;
        match core.system.write(fd, data) {
            Ok(count) if count == data.len() => Ok(count),
            Ok(count) => {
                core.monitor.arm(fd, Direction::Write, &self.state.write_token);
                Ok(count)
            }
            Err(errno) if errno == Errno::EAGAIN || errno == Errno::EWOULDBLOCK => {
                core.monitor.arm(fd, Direction::Write, &self.state.write_token);
                Err(IoError::WouldBlock)
            }
            Err(errno) => Err(IoError::Os(errno)),
        }
    }

    /// Reads bytes from the child's standard output.
    ///
    /// This function issues a single non-blocking `read` of at most the
    /// requested size. An empty result means the child closed its standard
    /// output. A result shorter than an [`UpTo`](ReadRequest::UpTo) request
    /// arms read-readiness on the [read token](Self::read_token);
    /// an [`Unbuffered`](ReadRequest::Unbuffered) request never does.
    /// [`IoError::WouldBlock`] always arms read-readiness.
    ///
    /// Reading after [`close`](Self::close) of the output end fails with
    /// [`IoError::PipeClosed`].
    pub fn read(&self, request: ReadRequest) -> Result<Vec<u8>, IoError> {
        let Some(fd) = self.state.output_fd.get() else {
            return Err(IoError::PipeClosed);
        };
        let size = match request {
            ReadRequest::Unbuffered => PIPE_BUF_SIZE,
            ReadRequest::UpTo(0) => return Err(IoError::InvalidRequest),
            ReadRequest::UpTo(count) => count.min(PIPE_BUF_SIZE),
        };
        let mut buffer = vec![0; size];
        let mut core = self.state.core.borrow_mut();
        let core = &mut *core;
        match core.system.read(fd, &mut buffer) {
            Ok(count) => {
                buffer.truncate(count);
                let satisfied = count == 0
                    || match request {
                        ReadRequest::Unbuffered => true,
                        ReadRequest::UpTo(requested) => count == requested,
                    };
                if !satisfied {
                    core.monitor.arm(fd, Direction::Read, &self.state.read_token);
                }
                Ok(buffer)
            }
            Err(errno) if errno == Errno::EAGAIN || errno == Errno::EWOULDBLOCK => {
                core.monitor.arm(fd, Direction::Read, &self.state.read_token);
                Err(IoError::WouldBlock)
            }
            Err(errno) => Err(IoError::Os(errno)),
        }
    }

    /// Closes one of the parent-side pipe ends.
    ///
    /// Closing the input end is the way to signal end-of-input to the child.
    /// Any outstanding readiness subscription on the direction is cancelled
    /// first, waking a parked owner so it observes the closure.
    ///
    /// Closing an already-closed end is not an error.
    pub fn close(&self, end: PipeEnd) -> crate::system::Result<()> {
        let (slot, token) = match end {
            PipeEnd::Input => (&self.state.input_fd, &self.state.write_token),
            PipeEnd::Output => (&self.state.output_fd, &self.state.read_token),
        };
        let Some(fd) = slot.get() else {
            return Ok(());
        };
        let mut core = self.state.core.borrow_mut();
        let core = &mut *core;
        core.monitor.disarm(token);
        core.system.close(fd)?;
        slot.set(None);
        Ok(())
    }

    /// Collects the child's exit status without blocking.
    ///
    /// Returns `Ok(None)` while the child is still running. Once the child
    /// has been reaped, the classified status is cached and every later call
    /// returns the same value without touching the system again.
    ///
    /// It is the caller's responsibility to poll this function, typically
    /// after both pipes have been closed or a timeout has elapsed.
    pub fn try_wait(&self) -> crate::system::Result<Option<ChildStatus>> {
        let pid = match self.state.child.get() {
            ChildState::Reaped(status) => return Ok(Some(status)),
            ChildState::Running(pid) => pid,
        };
        let status = self.state.core.borrow_mut().system.wait(pid)?;
        if let Some(status) = status {
            self.state.child.set(ChildState::Reaped(status));
        }
        Ok(status)
    }

    /// Sends `SIGTERM` to the child. Does nothing once the child is reaped.
    pub fn terminate(&self) -> crate::system::Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Sends `SIGKILL` to the child. Does nothing once the child is reaped.
    pub fn kill(&self) -> crate::system::Result<()> {
        self.signal(Signal::SIGKILL)
    }

    fn signal(&self, signal: Signal) -> crate::system::Result<()> {
        match self.state.child.get() {
            ChildState::Running(pid) => {
                self.state.core.borrow_mut().system.kill(pid, Some(signal))
            }
            ChildState::Reaped(_) => Ok(()),
        }
    }

    /// Probes whether the child process exists.
    ///
    /// While the child is unreaped, this sends signal 0 to its process ID,
    /// so a terminated-but-unreaped child still reports `true`. Once the
    /// status has been collected with [`try_wait`](Self::try_wait), the
    /// result is `true` from the cache.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        match self.state.child.get() {
            ChildState::Running(pid) => {
                self.state.core.borrow_mut().system.kill(pid, None).is_ok()
            }
            ChildState::Reaped(_) => true,
        }
    }

    /// Returns the child's process ID, or process ID 0 once it is reaped.
    #[must_use]
    pub fn os_pid(&self) -> Pid {
        match self.state.child.get() {
            ChildState::Running(pid) => pid,
            ChildState::Reaped(_) => Pid::from_raw(0),
        }
    }

    /// Writes the whole buffer to the child's standard input.
    ///
    /// This future calls [`write`](Self::write) repeatedly until everything
    /// in `data` is written, parking on the write token whenever the pipe is
    /// full. An empty `data` completes immediately with `Ok(0)`.
    pub async fn write_all(&self, data: &[u8]) -> Result<usize, IoError> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        let mut rest = data;
        poll_fn(|context| {
            self.state.write_token.set_waker(context.waker().clone());
            match self.write(rest) {
                Ok(count) => {
                    written += count;
                    rest = &rest[count..];
                    if rest.is_empty() {
                        Poll::Ready(Ok(written))
                    } else {
                        Poll::Pending
                    }
                }
                Err(IoError::WouldBlock) => Poll::Pending,
                Err(error) => Poll::Ready(Err(error)),
            }
        })
        .await
    }

    /// Reads from the child's standard output, waiting for bytes to arrive.
    ///
    /// This future calls [`read`](Self::read) and parks on the read token
    /// while the operation would block. It resolves with the first non-empty
    /// chunk, or with an empty vector at end of output.
    pub async fn read_async(&self, request: ReadRequest) -> Result<Vec<u8>, IoError> {
        poll_fn(|context| {
            self.state.read_token.set_waker(context.waker().clone());
            match self.read(request) {
                Err(IoError::WouldBlock) => Poll::Pending,
                result => Poll::Ready(result),
            }
        })
        .await
    }
}

impl Drop for ContextState {
    /// Closes the remaining parent-side pipe ends and cancels outstanding
    /// readiness subscriptions.
    ///
    /// The child is not reaped here. A supervisor must eventually collect it
    /// with [`ExecContext::try_wait`] to avoid leaving a zombie.
    fn drop(&mut self) {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        core.monitor.disarm(&self.read_token);
        core.monitor.disarm(&self.write_token);
        if let Some(fd) = self.input_fd.take() {
            let _ = core.system.close(fd);
        }
        if let Some(fd) = self.output_fd.take() {
            let _ = core.system.close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::spawn::Command;
    use crate::system::r#virtual::VirtualSystem;
    use assert_matches::assert_matches;
    use futures_util::task::LocalSpawnExt;
    use futures_util::FutureExt;

    fn spawn_cat(pipe_capacity: usize) -> (Engine, VirtualSystem, ExecContext) {
        let system = VirtualSystem::new();
        system.state.borrow_mut().pipe_capacity = pipe_capacity;
        let engine = Engine::new(Box::new(system.clone()));
        let context = engine.spawn(&Command::new("/bin/cat")).unwrap();
        (engine, system, context)
    }

    fn armed_writers(engine: &Engine) -> Vec<Fd> {
        engine.inner.borrow().monitor.writer_fds()
    }

    fn armed_readers(engine: &Engine) -> Vec<Fd> {
        engine.inner.borrow().monitor.reader_fds()
    }

    #[test]
    fn write_whole_buffer_does_not_arm_readiness() {
        let (engine, system, context) = spawn_cat(16);
        assert_eq!(context.write(b"abc"), Ok(3));
        assert_eq!(armed_writers(&engine), []);
        let input = system.state.borrow_mut().take_child_input(context.os_pid());
        assert_eq!(input, b"abc");
    }

    #[test]
    fn short_write_arms_write_readiness() {
        let (engine, _system, context) = spawn_cat(4);
        assert_eq!(context.write(b"abcdef"), Ok(4));
        assert_eq!(armed_writers(&engine), [context.input_fd().unwrap()]);
    }

    #[test]
    fn write_to_full_pipe_would_block() {
        let (engine, system, context) = spawn_cat(4);
        assert_eq!(context.write(b"abcd"), Ok(4));
        assert_eq!(context.write(b"e"), Err(IoError::WouldBlock));
        assert_eq!(armed_writers(&engine), [context.input_fd().unwrap()]);

        // Draining the pipe makes the descriptor ready again.
        system.state.borrow_mut().take_child_input(context.os_pid());
        engine.select(true).unwrap();
        assert_eq!(armed_writers(&engine), []);
        assert_eq!(context.write(b"e"), Ok(1));
    }

    #[test]
    fn write_rejects_empty_buffer() {
        let (_engine, _system, context) = spawn_cat(16);
        assert_eq!(context.write(b""), Err(IoError::InvalidRequest));
    }

    #[test]
    fn write_after_close_reports_pipe_closed() {
        let (_engine, _system, context) = spawn_cat(16);
        context.close(PipeEnd::Input).unwrap();
        assert_eq!(context.write(b"abc"), Err(IoError::PipeClosed));
    }

    #[test]
    fn write_after_child_exit_reports_os_error() {
        let (_engine, system, context) = spawn_cat(16);
        system
            .state
            .borrow_mut()
            .exit_child(context.os_pid(), ChildStatus::Exited(0));
        assert_eq!(context.write(b"abc"), Err(IoError::Os(Errno::EPIPE)));
    }

    #[test]
    fn read_with_nothing_available_would_block() {
        let (engine, _system, context) = spawn_cat(16);
        assert_eq!(context.read(ReadRequest::UpTo(4)), Err(IoError::WouldBlock));
        assert_eq!(armed_readers(&engine), [context.output_fd().unwrap()]);
    }

    #[test]
    fn read_exact_request_does_not_arm_readiness() {
        let (engine, system, context) = spawn_cat(16);
        system
            .state
            .borrow_mut()
            .feed_child_output(context.os_pid(), b"abc");
        assert_eq!(context.read(ReadRequest::UpTo(3)), Ok(b"abc".to_vec()));
        assert_eq!(armed_readers(&engine), []);
    }

    #[test]
    fn short_read_arms_read_readiness() {
        let (engine, system, context) = spawn_cat(16);
        system
            .state
            .borrow_mut()
            .feed_child_output(context.os_pid(), b"ab");
        assert_eq!(context.read(ReadRequest::UpTo(4)), Ok(b"ab".to_vec()));
        assert_eq!(armed_readers(&engine), [context.output_fd().unwrap()]);
    }

    #[test]
    fn unbuffered_read_never_arms_readiness() {
        let (engine, system, context) = spawn_cat(16);
        system
            .state
            .borrow_mut()
            .feed_child_output(context.os_pid(), b"ab");
        assert_eq!(context.read(ReadRequest::Unbuffered), Ok(b"ab".to_vec()));
        assert_eq!(armed_readers(&engine), []);
    }

    #[test]
    fn read_rejects_zero_size() {
        let (_engine, _system, context) = spawn_cat(16);
        assert_eq!(context.read(ReadRequest::UpTo(0)), Err(IoError::InvalidRequest));
    }

    #[test]
    fn read_reports_end_of_output() {
        let (_engine, system, context) = spawn_cat(16);
        {
            let mut state = system.state.borrow_mut();
            state.feed_child_output(context.os_pid(), b"tail");
            state.close_child_output(context.os_pid());
        }
        assert_eq!(context.read(ReadRequest::Unbuffered), Ok(b"tail".to_vec()));
        assert_eq!(context.read(ReadRequest::Unbuffered), Ok(Vec::new()));
    }

    #[test]
    fn read_after_close_reports_pipe_closed() {
        let (_engine, _system, context) = spawn_cat(16);
        context.close(PipeEnd::Output).unwrap();
        assert_eq!(context.read(ReadRequest::Unbuffered), Err(IoError::PipeClosed));
    }

    #[test]
    fn close_is_idempotent_and_cancels_subscriptions() {
        let (engine, _system, context) = spawn_cat(16);
        assert_eq!(context.read(ReadRequest::UpTo(1)), Err(IoError::WouldBlock));
        assert_eq!(armed_readers(&engine).len(), 1);

        assert_eq!(context.close(PipeEnd::Output), Ok(()));
        assert_eq!(armed_readers(&engine), []);
        assert_eq!(context.output_fd(), None);
        assert_eq!(context.close(PipeEnd::Output), Ok(()));
    }

    #[test]
    fn try_wait_reports_and_memoizes_exit() {
        let (_engine, system, context) = spawn_cat(16);
        assert_eq!(context.try_wait(), Ok(None));

        system
            .state
            .borrow_mut()
            .exit_child(context.os_pid(), ChildStatus::Exited(42));
        assert_eq!(context.try_wait(), Ok(Some(ChildStatus::Exited(42))));

        // The virtual system would answer ECHILD now, so an identical result
        // proves the status comes from the cache.
        assert_eq!(context.try_wait(), Ok(Some(ChildStatus::Exited(42))));
        assert_eq!(context.status(), Some(ChildStatus::Exited(42)));
    }

    #[test]
    fn terminate_records_signal_and_is_noop_after_reap() {
        let (_engine, _system, context) = spawn_cat(16);
        context.terminate().unwrap();
        assert_eq!(
            context.try_wait(),
            Ok(Some(ChildStatus::Signaled(Signal::SIGTERM as i32)))
        );
        assert_eq!(context.terminate(), Ok(()));
        assert_eq!(context.kill(), Ok(()));
    }

    #[test]
    fn alive_probe_covers_running_zombie_and_reaped() {
        let (_engine, system, context) = spawn_cat(16);
        assert!(context.is_alive());

        system
            .state
            .borrow_mut()
            .exit_child(context.os_pid(), ChildStatus::Exited(0));
        // Terminated but unreaped children still probe as alive.
        assert!(context.is_alive());

        context.try_wait().unwrap();
        assert!(context.is_alive());
    }

    #[test]
    fn os_pid_is_zero_after_reap() {
        let (_engine, system, context) = spawn_cat(16);
        let pid = context.os_pid();
        assert_ne!(pid, Pid::from_raw(0));

        system
            .state
            .borrow_mut()
            .exit_child(pid, ChildStatus::Exited(0));
        context.try_wait().unwrap();
        assert_eq!(context.os_pid(), Pid::from_raw(0));
    }

    #[test]
    fn dropping_the_last_clone_releases_descriptors() {
        let (engine, system, context) = spawn_cat(16);
        assert_eq!(context.read(ReadRequest::UpTo(1)), Err(IoError::WouldBlock));
        assert_eq!(system.state.borrow().open_fd_count(), 2);

        let clone = context.clone();
        drop(context);
        assert_eq!(system.state.borrow().open_fd_count(), 2);

        drop(clone);
        assert_eq!(system.state.borrow().open_fd_count(), 0);
        assert_eq!(armed_readers(&engine), []);
        assert_eq!(armed_writers(&engine), []);
    }

    #[test]
    fn write_all_completes_across_back_pressure() {
        let (engine, system, context) = spawn_cat(8);
        let pid = context.os_pid();
        let data: Vec<u8> = (0..64u8).collect();

        let mut executor = futures_executor::LocalPool::new();
        let writer = context.clone();
        let payload = data.clone();
        let mut handle = executor
            .spawner()
            .spawn_local_with_handle(async move { writer.write_all(&payload).await })
            .unwrap();

        let mut received = Vec::new();
        let mut outcome = None;
        for _ in 0..100 {
            executor.run_until_stalled();
            if let Some(result) = (&mut handle).now_or_never() {
                outcome = Some(result);
                break;
            }
            received.extend(system.state.borrow_mut().take_child_input(pid));
            engine.select(false).unwrap();
        }
        assert_eq!(outcome, Some(Ok(64)));
        received.extend(system.state.borrow_mut().take_child_input(pid));
        assert_eq!(received, data);
    }

    #[test]
    fn read_async_wakes_up_when_output_arrives() {
        let (engine, system, context) = spawn_cat(16);
        let pid = context.os_pid();

        let mut executor = futures_executor::LocalPool::new();
        let reader = context.clone();
        let mut handle = executor
            .spawner()
            .spawn_local_with_handle(async move { reader.read_async(ReadRequest::UpTo(5)).await })
            .unwrap();

        executor.run_until_stalled();
        assert_eq!((&mut handle).now_or_never(), None);

        system.state.borrow_mut().feed_child_output(pid, b"hello world");
        engine.select(false).unwrap();
        executor.run_until_stalled();
        assert_eq!((&mut handle).now_or_never(), Some(Ok(b"hello".to_vec())));
    }

    #[test]
    fn reader_and_writer_tasks_run_concurrently() {
        let (engine, system, context) = spawn_cat(8);
        let pid = context.os_pid();
        let data: Vec<u8> = (0..32u8).collect();

        let mut executor = futures_executor::LocalPool::new();
        let writer = context.clone();
        let payload = data.clone();
        executor
            .spawner()
            .spawn_local(async move {
                writer.write_all(&payload).await.unwrap();
                writer.close(PipeEnd::Input).unwrap();
            })
            .unwrap();

        let reader = context.clone();
        let mut handle = executor
            .spawner()
            .spawn_local_with_handle(async move {
                let mut collected = Vec::new();
                while collected.len() < 32 {
                    let bytes = reader.read_async(ReadRequest::UpTo(32)).await.unwrap();
                    collected.extend(bytes);
                }
                collected
            })
            .unwrap();

        let mut outcome = None;
        let mut in_transit = Vec::new();
        for _ in 0..200 {
            executor.run_until_stalled();
            if let Some(collected) = (&mut handle).now_or_never() {
                outcome = Some(collected);
                break;
            }
            // Shuttle bytes from the child's input to its output, as a
            // cat-like child would.
            {
                let mut state = system.state.borrow_mut();
                in_transit.extend(state.take_child_input(pid));
                let accepted = state.feed_child_output(pid, &in_transit);
                in_transit.drain(..accepted);
            }
            engine.select(false).unwrap();
        }
        assert_eq!(outcome, Some(data));
    }

    #[test]
    fn io_error_converts_from_errno() {
        let error = IoError::from(Errno::EIO);
        assert_matches!(error, IoError::Os(Errno::EIO));
        assert_eq!(error.to_string(), Errno::EIO.to_string());
    }
}
