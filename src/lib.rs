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

//! This crate runs external programs under demand-driven, back-pressured
//! I/O.
//!
//! A child process is launched with its standard input and output connected
//! to pipes whose parent-side ends are non-blocking and close-on-exec. Every
//! I/O operation on the resulting handle is a single non-blocking system
//! call: when the child cannot keep up (its input pipe is full) or has
//! nothing to say (its output pipe is empty), the operation arms a
//! per-direction readiness token instead of blocking, and the caller resumes
//! after the next readiness event. The kernel pipe buffer is the only
//! buffering between the two processes, so a slow consumer stalls the
//! producer and the other way round.
//!
//! The crate is built for cooperatively scheduled hosts where blocking a
//! thread is unacceptable. The [`Engine`] couples a [`System`]
//! implementation with the readiness [`Monitor`](monitor::Monitor);
//! [`Engine::select`] is the pump that turns descriptor readiness into task
//! wake-ups. [`RealSystem`] performs actual system calls, and
//! [`VirtualSystem`](system::VirtualSystem) simulates them for tests.
//!
//! ```
//! # use futures_util::task::LocalSpawnExt;
//! # use procio::{Command, Engine, PipeEnd, ReadRequest, system::VirtualSystem};
//! let system = VirtualSystem::new();
//! # let state = std::rc::Rc::clone(&system.state);
//! let engine = Engine::new(Box::new(system));
//! let context = engine.spawn(&Command::new("/bin/cat")).unwrap();
//!
//! // One task feeds the child while another consumes its output.
//! let mut executor = futures_executor::LocalPool::new();
//! let writer = context.clone();
//! executor.spawner().spawn_local(async move {
//!     writer.write_all(b"data").await.unwrap();
//!     writer.close(PipeEnd::Input).unwrap();
//! }).unwrap();
//! let reader = context.clone();
//! let read_task = executor.spawner().spawn_local_with_handle(async move {
//!     reader.read_async(ReadRequest::UpTo(4)).await.unwrap()
//! }).unwrap();
//! executor.run_until_stalled();
//!
//! // The test plays the role of the child between pump runs.
//! # let pid = context.os_pid();
//! # let input = state.borrow_mut().take_child_input(pid);
//! # state.borrow_mut().feed_child_output(pid, &input);
//! engine.select(false).unwrap();
//! let output = executor.run_until(read_task);
//! assert_eq!(output, b"data");
//! ```
//!
//! On a real system the same code runs against live processes; construct the
//! engine with `Engine::new(Box::new(unsafe { RealSystem::new() }))` instead.

pub mod engine;
pub mod io;
pub mod monitor;
pub mod process;
pub mod spawn;
pub mod system;

pub use self::engine::Engine;
pub use self::io::Fd;
pub use self::io::PipeEnd;
pub use self::io::PIPE_BUF_SIZE;
pub use self::process::ChildStatus;
pub use self::process::ExecContext;
pub use self::process::IoError;
pub use self::process::ReadRequest;
pub use self::spawn::Command;
pub use self::spawn::SpawnError;
pub use self::spawn::StderrMode;
pub use self::spawn::FORK_EXEC_FAILURE;
pub use self::system::RealSystem;
pub use self::system::System;
