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

//! A cooperative, in-process concurrency runtime.
//!
//! Three pieces, tightly coupled:
//!
//! - [`coroutine`] — a stackful coroutine scheduler: create, resume, yield,
//!   recycle.
//! - [`timer`] — a bucketed, insertion-ordered timeout service driven by an
//!   explicit [`clock::Clock`].
//! - [`cache`] — a preallocated, block-chained byte buffer cache keyed by
//!   `u64`, for staging data across yields.
//!
//! [`task`] glues the scheduler and the timer together: a [`task::Task`]
//! runs inside a coroutine and can `yield_for` a timeout, waking either when
//! externally resumed or when the timer fires.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use seqco::clock::SystemClock;
//! use seqco::timer::Timer;
//!
//! let timer: Rc<RefCell<dyn seqco::timer::TimerDriver>> =
//!     Rc::new(RefCell::new(Timer::new(SystemClock, Default::default())));
//! let schedule = seqco::task::Schedule::init(timer, 0);
//! assert_eq!(schedule.size(), 0);
//! ```

pub mod cache;
pub mod clock;
pub mod coroutine;
mod list;
pub mod task;
pub mod timer;

pub use coroutine::{CoroutineId, Status, INVALID_CO_ID};
pub use error::{CacheError, CoError, TimerError, TIMEOUT};

mod error;
