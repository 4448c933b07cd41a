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

//! Command descriptions
//!
//! This module defines [`Command`], a builder for describing the external
//! program an [`Engine`](crate::engine::Engine) launches: the executable
//! path, the argument vector, the exact child environment, an optional
//! working directory, and the stderr disposition.
//!
//! The command line is never interpreted by a shell. The program path is
//! used as-is with no `$PATH` search, and the environment entries are passed
//! to the child verbatim.

use crate::system::Errno;
use std::ffi::CString;
use thiserror::Error;

/// Exit code of a child that failed before `execve`
///
/// The code is not reserved by common UNIX conventions, but a child that
/// itself exits with this value cannot be told apart from a pre-exec
/// failure. Callers observing this code should treat it as "probably failed
/// to start".
pub const FORK_EXEC_FAILURE: i32 = 125;

/// What to do with the child's standard error
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum StderrMode {
    /// The child shares the parent's standard error.
    #[default]
    Inherit,
    /// The child's standard error is redirected to `/dev/null`.
    Discard,
}

/// Error in preparing or launching a command
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum SpawnError {
    /// An argument, environment entry, or directory contained a NUL byte.
    #[error("command string contains a NUL byte")]
    NulByte,

    /// The operating system rejected part of the launch sequence.
    #[error(transparent)]
    Os(#[from] Errno),
}

/// Description of an external program to run
///
/// A `Command` is a builder: start from [`new`](Self::new) with the path to
/// the executable and chain the other methods to refine the description.
/// Pass the result to [`Engine::spawn`](crate::engine::Engine::spawn).
///
/// The child's environment is exactly the entries added with
/// [`env`](Self::env); nothing is inherited from the parent. An empty
/// environment is valid.
#[derive(Clone, Debug, Eq, PartialEq)]
#[must_use = "a Command does nothing until spawned"]
pub struct Command {
    program: String,
    args: Vec<String>,
    envs: Vec<String>,
    dir: Option<String>,
    stderr: StderrMode,
}

impl Command {
    /// Creates a command for the executable at `program`.
    ///
    /// The path should be absolute; it is handed to `execve` without a
    /// `$PATH` search. The path also becomes the first element of the
    /// argument vector.
    pub fn new<S: Into<String>>(program: S) -> Self {
        Command {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            dir: None,
            stderr: StderrMode::default(),
        }
    }

    /// Appends one argument.
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends many arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds one `KEY=VALUE` entry to the child environment.
    pub fn env<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.envs.push(format!("{}={}", key.as_ref(), value.as_ref()));
        self
    }

    /// Makes the child change to this directory before executing.
    pub fn current_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Chooses what happens to the child's standard error.
    pub fn stderr(mut self, mode: StderrMode) -> Self {
        self.stderr = mode;
        self
    }

    /// Returns the stderr disposition of this command.
    #[must_use]
    pub fn stderr_mode(&self) -> StderrMode {
        self.stderr
    }

    /// Converts the command strings for use with `execve`.
    ///
    /// Returns the argument vector (program first), the environment entries,
    /// and the optional working directory as C strings.
    pub(crate) fn prepare(
        &self,
    ) -> Result<(Vec<CString>, Vec<CString>, Option<CString>), SpawnError> {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(to_c_string(&self.program)?);
        for arg in &self.args {
            args.push(to_c_string(arg)?);
        }
        let envs = self
            .envs
            .iter()
            .map(|entry| to_c_string(entry))
            .collect::<Result<Vec<_>, _>>()?;
        let dir = match &self.dir {
            Some(dir) => Some(to_c_string(dir)?),
            None => None,
        };
        Ok((args, envs, dir))
    }
}

fn to_c_string(value: &str) -> Result<CString, SpawnError> {
    CString::new(value).map_err(|_| SpawnError::NulByte)
}
