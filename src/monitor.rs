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

//! Readiness registration
//!
//! This module connects the non-blocking I/O operations to whatever drives
//! the engine. When an operation cannot complete, it arms the handle's
//! per-direction [`Token`] with the [`Monitor`]; the next run of the
//! readiness pump ([`Engine::select`]) fires the token once the file
//! descriptor is ready, waking the waker stored in it.
//!
//! Registrations are one-shot: a fired or cancelled subscription is removed
//! and the operation must be re-armed by calling it again. A token holds at
//! most one outstanding subscription per direction, so re-arming an armed
//! token has no effect. A wake may be spurious; the woken owner is expected
//! to retry the operation and possibly park again.
//!
//! [`Engine::select`]: crate::engine::Engine::select

use crate::io::Fd;
use std::cell::RefCell;
use std::rc::Rc;
use std::rc::Weak;
use std::task::Waker;

/// Direction of an I/O readiness subscription
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    /// Readiness for reading
    Read,
    /// Readiness for writing
    Write,
}

/// Per-direction readiness slot owned by an execution context
///
/// A `Token` is a shared cell for the waker of the logical owner of one I/O
/// direction. The owner stores its waker with [`set_waker`](Self::set_waker)
/// before attempting an operation; if the operation arms the token, the waker
/// is called when the file descriptor becomes ready. Without a waker set, an
/// armed token is still tracked by the monitor and readiness is observable
/// through the return of the pump, but nothing is woken.
///
/// Cloning a token yields another handle to the same slot.
#[derive(Clone, Debug, Default)]
pub struct Token {
    slot: Rc<RefCell<Option<Waker>>>,
}

impl Token {
    /// Creates a new token with no waker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the waker to be called when the subscription fires.
    ///
    /// Replaces any previously stored waker.
    pub fn set_waker(&self, waker: Waker) {
        *self.slot.borrow_mut() = Some(waker);
    }

    /// Takes the stored waker, if any, and wakes it.
    pub fn wake(&self) {
        let waker = self.slot.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Returns a weak reference identifying this token.
    fn watch(&self) -> Weak<RefCell<Option<Waker>>> {
        Rc::downgrade(&self.slot)
    }
}

/// Single outstanding readiness subscription
#[derive(Debug)]
struct Subscription {
    fd: Fd,
    slot: Weak<RefCell<Option<Waker>>>,
}

/// Wakes the subscribed token when the subscription is removed.
impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.upgrade() {
            let waker = slot.borrow_mut().take();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }
}

/// Registrar of readiness subscriptions
///
/// The monitor records which file descriptor each armed token is waiting on
/// and in which direction. It computes the descriptor sets to pass to the
/// `select` system call and wakes the tokens whose descriptors came back
/// ready. Tokens are referenced weakly, so dropping the owning execution
/// context invalidates its subscriptions; [`gc`](Self::gc) discards them.
#[derive(Debug, Default)]
pub struct Monitor {
    readers: Vec<Subscription>,
    writers: Vec<Subscription>,
}

impl Monitor {
    /// Returns a new empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token to fire when `fd` is ready in `direction`.
    ///
    /// If the token already has an outstanding subscription in that
    /// direction, this function does nothing.
    pub fn arm(&mut self, fd: Fd, direction: Direction, token: &Token) {
        let list = match direction {
            Direction::Read => &mut self.readers,
            Direction::Write => &mut self.writers,
        };
        let watch = token.watch();
        if list.iter().any(|subscription| subscription.slot.ptr_eq(&watch)) {
            return;
        }
        list.push(Subscription { fd, slot: watch });
    }

    /// Cancels any outstanding subscription of the token, in both directions.
    ///
    /// A cancelled subscription wakes its waker so a parked owner re-polls
    /// and observes the new state instead of sleeping forever.
    pub fn disarm(&mut self, token: &Token) {
        let watch = token.watch();
        self.readers
            .retain(|subscription| !subscription.slot.ptr_eq(&watch));
        self.writers
            .retain(|subscription| !subscription.slot.ptr_eq(&watch));
    }

    /// Returns the set of descriptors with read subscriptions.
    #[must_use]
    pub fn reader_fds(&self) -> Vec<Fd> {
        self.readers.iter().map(|subscription| subscription.fd).collect()
    }

    /// Returns the set of descriptors with write subscriptions.
    #[must_use]
    pub fn writer_fds(&self) -> Vec<Fd> {
        self.writers.iter().map(|subscription| subscription.fd).collect()
    }

    /// Fires subscriptions whose descriptors are ready.
    ///
    /// Descriptors in `ready_readers` and `ready_writers` are considered
    /// ready; the matching subscriptions are removed, which wakes their
    /// tokens.
    pub fn wake(&mut self, ready_readers: &[Fd], ready_writers: &[Fd]) {
        // Dropping a subscription wakes its token.
        self.readers
            .retain(|subscription| !ready_readers.contains(&subscription.fd));
        self.writers
            .retain(|subscription| !ready_writers.contains(&subscription.fd));
    }

    /// Fires and removes every subscription.
    pub fn wake_all(&mut self) {
        // Dropping a subscription wakes its token.
        self.readers.clear();
        self.writers.clear();
    }

    /// Discards subscriptions whose token no longer exists.
    pub fn gc(&mut self) {
        let is_alive = |subscription: &Subscription| subscription.slot.strong_count() > 0;
        self.readers.retain(is_alive);
        self.writers.retain(is_alive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::Wake;

    struct WakeFlag(AtomicBool);

    impl Wake for WakeFlag {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::Relaxed);
        }
    }

    fn flagged_token() -> (Token, Arc<WakeFlag>) {
        let flag = Arc::new(WakeFlag(AtomicBool::new(false)));
        let token = Token::new();
        token.set_waker(flag.clone().into());
        (token, flag)
    }

    #[test]
    fn monitor_has_no_default_subscriptions() {
        let monitor = Monitor::new();
        assert_eq!(monitor.reader_fds(), []);
        assert_eq!(monitor.writer_fds(), []);
    }

    #[test]
    fn monitor_tracks_armed_directions() {
        let mut monitor = Monitor::new();
        let token_a = Token::new();
        let token_b = Token::new();
        monitor.arm(Fd(3), Direction::Read, &token_a);
        monitor.arm(Fd(4), Direction::Write, &token_b);

        assert_eq!(monitor.reader_fds(), [Fd(3)]);
        assert_eq!(monitor.writer_fds(), [Fd(4)]);
    }

    #[test]
    fn arming_twice_keeps_one_subscription() {
        let mut monitor = Monitor::new();
        let token = Token::new();
        monitor.arm(Fd(3), Direction::Read, &token);
        monitor.arm(Fd(3), Direction::Read, &token);
        assert_eq!(monitor.reader_fds(), [Fd(3)]);
    }

    #[test]
    fn waking_fires_matching_subscriptions_only() {
        let mut monitor = Monitor::new();
        let (token_a, flag_a) = flagged_token();
        let (token_b, flag_b) = flagged_token();
        monitor.arm(Fd(3), Direction::Read, &token_a);
        monitor.arm(Fd(4), Direction::Read, &token_b);

        monitor.wake(&[Fd(4)], &[]);

        assert!(!flag_a.0.load(Ordering::Relaxed));
        assert!(flag_b.0.load(Ordering::Relaxed));
        assert_eq!(monitor.reader_fds(), [Fd(3)]);
    }

    #[test]
    fn disarming_wakes_the_cancelled_owner() {
        let mut monitor = Monitor::new();
        let (token, flag) = flagged_token();
        monitor.arm(Fd(3), Direction::Read, &token);
        monitor.arm(Fd(3), Direction::Write, &token);

        monitor.disarm(&token);

        assert!(flag.0.load(Ordering::Relaxed));
        assert_eq!(monitor.reader_fds(), []);
        assert_eq!(monitor.writer_fds(), []);
    }

    #[test]
    fn wake_all_clears_everything() {
        let mut monitor = Monitor::new();
        let (token_a, flag_a) = flagged_token();
        let (token_b, flag_b) = flagged_token();
        monitor.arm(Fd(3), Direction::Read, &token_a);
        monitor.arm(Fd(4), Direction::Write, &token_b);

        monitor.wake_all();

        assert!(flag_a.0.load(Ordering::Relaxed));
        assert!(flag_b.0.load(Ordering::Relaxed));
        assert_eq!(monitor.reader_fds(), []);
        assert_eq!(monitor.writer_fds(), []);
    }

    #[test]
    fn gc_discards_dead_tokens() {
        let mut monitor = Monitor::new();
        let token = Token::new();
        monitor.arm(Fd(3), Direction::Read, &token);
        drop(token);

        monitor.gc();
        assert_eq!(monitor.reader_fds(), []);
    }
}
