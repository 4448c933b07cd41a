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

//! Type definitions for I/O.

use std::fmt::Display;
use std::fmt::Formatter;
use std::os::unix::io::RawFd;

/// File descriptor
///
/// This is a new type pattern around the raw file descriptor, used throughout
/// the crate in place of bare integers. It carries no ownership; the owner of
/// the underlying descriptor is whoever holds the slot the `Fd` was read from.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Fd(pub RawFd);

impl Fd {
    /// File descriptor for the standard input
    pub const STDIN: Fd = Fd(0);
    /// File descriptor for the standard output
    pub const STDOUT: Fd = Fd(1);
    /// File descriptor for the standard error
    pub const STDERR: Fd = Fd(2);
}

impl From<RawFd> for Fd {
    fn from(raw_fd: RawFd) -> Fd {
        Fd(raw_fd)
    }
}

impl Display for Fd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Selector for the two parent-side pipe ends of an execution context
///
/// `Input` is the writable end connected to the child's standard input.
/// `Output` is the readable end connected to the child's standard output.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PipeEnd {
    /// Writable end of the child's standard input pipe
    Input,
    /// Readable end of the child's standard output pipe
    Output,
}

/// Maximum number of bytes a single read operation transfers
///
/// Read requests larger than this are clamped, and an unbuffered read uses
/// exactly this size. The value matches one kernel pipe buffer so a single
/// read can drain everything the child has written without rescheduling.
pub const PIPE_BUF_SIZE: usize = 65_535;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fd_display() {
        assert_eq!(Fd(2).to_string(), "2");
        assert_eq!(Fd::STDIN, Fd(0));
    }
}
