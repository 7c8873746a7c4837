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

//! Thin wrapper around the `context` crate's register-level context switch.
//!
//! Everything outside this module reaches the underlying crate only through
//! [`Context::new`] and [`Context::resume`] — the one seam in the whole
//! crate where "control transfers to a different stack" actually happens.

use std::io;

use context::stack::ProtectedFixedSizeStack;

pub use context::Transfer;

/// A pre-allocated, guard-paged stack a coroutine runs on.
pub type Stack = ProtectedFixedSizeStack;

/// Allocates a stack of `size` bytes. Fails if the OS cannot provide the
/// backing mapping (and its guard page).
pub fn allocate_stack(size: usize) -> io::Result<Stack> {
    ProtectedFixedSizeStack::new(size)
}

/// A saved CPU register state plus stack pointer, targeting either a fresh
/// entry point (just after [`Context::new`]) or wherever a previous
/// [`Context::resume`] left off.
pub struct Context(context::Context);

impl Context {
    /// Builds a context that, on its first resume, invokes `entry` on
    /// `stack`.
    pub fn new(stack: &Stack, entry: extern "C" fn(Transfer) -> !) -> Context {
        Context(context::Context::new(stack, entry))
    }

    /// Switches to this context, carrying `data` across the switch. Does
    /// not return until something on the other side resumes back to here;
    /// the returned [`Transfer`] names a fresh context for resuming this
    /// call site again.
    ///
    /// # Safety
    /// `data` must be meaningful to whatever is on the other end of this
    /// context (a just-built [`Context`] expects the first resume's `data`
    /// to be interpreted by its `entry` function); misuse can corrupt the
    /// target stack.
    pub unsafe fn resume(self, data: usize) -> Transfer {
        self.0.resume(data)
    }
}
