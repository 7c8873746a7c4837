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

//! Monotonic millisecond clock abstraction.
//!
//! [`timer::Timer`](crate::timer::Timer) is generic over [`Clock`] so tests
//! can drive it with a fake, manually-advanced clock instead of sleeping.

use std::time::Instant;

/// A monotonic millisecond time source.
///
/// Must be non-decreasing between consecutive reads on the same thread.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// The default [`Clock`], backed by [`Instant`] (never [`std::time::SystemTime`],
/// which is not guaranteed monotonic).
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        thread_epoch::with(|epoch| epoch.elapsed().as_millis() as i64)
    }
}

mod thread_epoch {
    use std::cell::Cell;
    use std::time::Instant;

    thread_local! {
        static EPOCH: Cell<Option<Instant>> = Cell::new(None);
    }

    pub(super) fn with<R>(f: impl FnOnce(Instant) -> R) -> R {
        let epoch = EPOCH.with(|cell| {
            if let Some(e) = cell.get() {
                e
            } else {
                let now = Instant::now();
                cell.set(Some(now));
                now
            }
        });
        f(epoch)
    }
}

impl<T: Clock + ?Sized> Clock for std::rc::Rc<T> {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }
}

/// A fake clock for deterministic tests.
pub mod fake {
    use super::Clock;
    use std::cell::Cell;

    /// A [`Clock`] whose value is set explicitly by the test driving it.
    pub struct FakeClock {
        now: Cell<i64>,
    }

    impl FakeClock {
        pub fn new(start_ms: i64) -> FakeClock {
            FakeClock {
                now: Cell::new(start_ms),
            }
        }

        pub fn advance(&self, ms: i64) {
            self.now.set(self.now.get() + ms);
        }

        pub fn set(&self, ms: i64) {
            self.now.set(ms);
        }
    }

    impl Clock for FakeClock {
        fn now_ms(&self) -> i64 {
            self.now.get()
        }
    }
}
