// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Stable error taxonomy for the three subsystems.
//!
//! Every fallible operation returns one of these instead of a bare integer,
//! but each carries a `to_code()` that recovers the historical `kCO_*` /
//! `kTIMER_*` integer contract for callers that need it (tests, FFI-style
//! boundaries).

use std::io;

/// Errors raised by the coroutine core (`coroutine` module).
#[derive(Debug, thiserror::Error)]
pub enum CoError {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("cannot resume: a coroutine is already running on this schedule")]
    CannotResumeInCoroutine,
    #[error("coroutine does not exist")]
    CoroutineUnexist,
    #[error("coroutine status does not allow resume")]
    CoroutineStatusError,
    #[error("not running inside a coroutine")]
    NotInCoroutine,
    #[error("coroutine is not in the running state")]
    NotRunning,
    #[error("starting the wake-up timer for a timed yield failed")]
    StartTimerFailed,
    #[error("stack allocation failed: {0}")]
    Os(#[from] io::Error),
}

impl CoError {
    /// Recovers the stable `kCO_*` integer contract from §6.
    pub fn to_code(&self) -> i32 {
        match self {
            CoError::InvalidParam => -1,
            CoError::CannotResumeInCoroutine => -2,
            CoError::CoroutineUnexist => -3,
            CoError::CoroutineStatusError => -4,
            CoError::NotInCoroutine => -5,
            CoError::NotRunning => -6,
            CoError::StartTimerFailed => -7,
            CoError::Os(_) => -8,
        }
    }
}

/// `result` value delivered to a coroutine's `yield` when woken by a timer
/// rather than an explicit external `resume` (`kCO_TIMEOUT`).
pub const TIMEOUT: i32 = 1;

/// Errors raised by [`crate::timer::Timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("timer id does not exist")]
    Unexisted,
    #[error("timer set cannot be mutated from inside a callback")]
    InCallback,
    #[error("timer count is at its configured maximum")]
    NumOutOfRange,
}

impl TimerError {
    pub fn to_code(self) -> i32 {
        match self {
            TimerError::InvalidParam => -1,
            TimerError::Unexisted => -2,
            TimerError::InCallback => -3,
            TimerError::NumOutOfRange => -4,
        }
    }
}

/// Errors raised by [`crate::cache::KvCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("fewer than the reserved safety margin of free blocks would remain")]
    NotEnoughBlocks,
    #[error("key not found")]
    KeyNotFound,
}
