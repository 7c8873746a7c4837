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

//! Raw stackful coroutines: create, resume, yield, recycle.
//!
//! A [`Schedule`] owns every coroutine created on it and is affinitized to
//! exactly one OS thread (see the crate's concurrency model); it is
//! `!Send`/`!Sync` by construction.

pub mod context;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::panic;
use std::ptr;

use libc::c_void;
use log::{debug, error, trace};

use self::context::{allocate_stack, Context as RawContext, Stack, Transfer};
use crate::error::CoError;

/// Identity of a coroutine: monotonically increasing, stable for its life.
pub type CoroutineId = u64;

/// Sentinel returned by [`Schedule::running`] when no coroutine is running,
/// and by [`Schedule::status`] lookups of an unknown id (folded into
/// [`Status::Dead`]).
pub const INVALID_CO_ID: CoroutineId = u64::MAX;

const DEFAULT_STACK_SIZE: usize = 256 * 1024;
const DEFAULT_MAX_FREE_RECYCLED: usize = 1024;

/// A coroutine's position in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Running,
    Suspend,
    Dead,
}

/// Construction-time configuration for a [`Schedule`].
#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    /// Stack size for each coroutine, in bytes. `0` means the default
    /// (256 KiB).
    pub stack_size: usize,
    /// Cap on the recycle list; the oldest retired stack is evicted on
    /// overflow.
    pub max_free_recycled: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            stack_size: DEFAULT_STACK_SIZE,
            max_free_recycled: DEFAULT_MAX_FREE_RECYCLED,
        }
    }
}

enum Entry {
    Extern(fn(&Schedule, *mut c_void), *mut c_void),
    Closure(Box<dyn FnOnce()>),
}

struct CoroutineSlot {
    status: Status,
    stack: Stack,
    /// Resumes directly into this coroutine. Always `Some` except for the
    /// brief window between taking it in `resume` and putting it back (or
    /// retiring the slot) once the swap returns.
    context: Option<RawContext>,
    /// The user entry, consumed by the trampoline on first run.
    entry: Option<Entry>,
}

/// Owns every coroutine created on it. Affinitized to one OS thread: never
/// `Send`, never `Sync`.
pub struct Schedule {
    stack_size: usize,
    max_free_recycled: usize,
    next_id: Cell<CoroutineId>,
    running_id: Cell<CoroutineId>,
    /// Context to resume to hand control back to whoever is currently
    /// inside a `Context::resume` call into the running coroutine. Valid
    /// only while a coroutine is actually executing.
    current_back: Cell<Option<RawContext>>,
    coroutines: RefCell<HashMap<CoroutineId, CoroutineSlot>>,
    recycle: RefCell<VecDeque<Stack>>,
    _not_send: std::marker::PhantomData<*const ()>,
}

thread_local! {
    static CURRENT: Cell<*const Schedule> = Cell::new(ptr::null());
}

impl Schedule {
    /// Opens a new schedule. Never fails: stacks are allocated lazily, one
    /// per coroutine, in [`Schedule::new_fn`]/[`Schedule::new_closure`].
    pub fn open(config: ScheduleConfig) -> Box<Schedule> {
        let stack_size = if config.stack_size == 0 {
            DEFAULT_STACK_SIZE
        } else {
            config.stack_size
        };
        let max_free_recycled = if config.max_free_recycled == 0 {
            DEFAULT_MAX_FREE_RECYCLED
        } else {
            config.max_free_recycled
        };

        Box::new(Schedule {
            stack_size,
            max_free_recycled,
            next_id: Cell::new(0),
            running_id: Cell::new(INVALID_CO_ID),
            current_back: Cell::new(None),
            coroutines: RefCell::new(HashMap::new()),
            recycle: RefCell::new(VecDeque::new()),
            _not_send: std::marker::PhantomData,
        })
    }

    /// Live coroutine count (READY + RUNNING + SUSPEND); excludes the
    /// recycle list.
    pub fn len(&self) -> usize {
        self.coroutines.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.coroutines.borrow().is_empty()
    }

    /// Count of retired, stack-reusable shells currently held.
    pub fn recycled_len(&self) -> usize {
        self.recycle.borrow().len()
    }

    fn acquire_stack(&self) -> Result<Stack, CoError> {
        if let Some(stack) = self.recycle.borrow_mut().pop_back() {
            return Ok(stack);
        }
        allocate_stack(self.stack_size).map_err(CoError::Os)
    }

    fn insert_new(&self, entry: Entry) -> Result<CoroutineId, CoError> {
        let stack = self.acquire_stack()?;
        let context = RawContext::new(&stack, trampoline);
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        self.coroutines.borrow_mut().insert(
            id,
            CoroutineSlot {
                status: Status::Ready,
                stack,
                context: Some(context),
                entry: Some(entry),
            },
        );
        trace!("coroutine {} created", id);
        Ok(id)
    }

    /// Creates a coroutine whose body is `entry(self, ud)`, matching the
    /// original C-ABI-flavored entry shape.
    pub fn new_fn(
        &self,
        entry: fn(&Schedule, *mut c_void),
        ud: *mut c_void,
    ) -> Result<CoroutineId, CoError> {
        self.insert_new(Entry::Extern(entry, ud))
    }

    /// Creates a coroutine whose body is the zero-argument closure `body`.
    pub fn new_closure<F>(&self, body: F) -> Result<CoroutineId, CoError>
    where
        F: FnOnce() + 'static,
    {
        self.insert_new(Entry::Closure(Box::new(body)))
    }

    /// Resumes `id` with `result` delivered to the `yield` call that wakes
    /// it (ignored on a coroutine's very first resume).
    pub fn resume(&self, id: CoroutineId, result: i32) -> Result<(), CoError> {
        if self.running_id.get() != INVALID_CO_ID {
            return Err(CoError::CannotResumeInCoroutine);
        }

        let (ctx, is_first) = {
            let mut coroutines = self.coroutines.borrow_mut();
            let slot = coroutines
                .get_mut(&id)
                .ok_or(CoError::CoroutineUnexist)?;
            match slot.status {
                Status::Ready | Status::Suspend => {}
                Status::Running | Status::Dead => {
                    return Err(CoError::CoroutineStatusError)
                }
            }
            let is_first = slot.status == Status::Ready;
            slot.status = Status::Running;
            let ctx = slot
                .context
                .take()
                .expect("ready/suspended slot has no resume context");
            (ctx, is_first)
        };

        self.running_id.set(id);

        let data = if is_first {
            self as *const Schedule as usize
        } else {
            (result as u32) as usize
        };

        trace!("resuming coroutine {}", id);
        let transfer = unsafe { ctx.resume(data) };

        self.running_id.set(INVALID_CO_ID);

        let mut coroutines = self.coroutines.borrow_mut();
        let status_now = coroutines
            .get(&id)
            .map(|slot| slot.status)
            .expect("coroutine missing its own slot after resume returned");
        match status_now {
            Status::Suspend => {
                coroutines.get_mut(&id).unwrap().context = Some(transfer.context);
            }
            Status::Dead => {
                drop(coroutines);
                self.retire(id);
            }
            Status::Ready | Status::Running => {
                unreachable!("coroutine left RUNNING/READY after its own swap returned")
            }
        }

        Ok(())
    }

    fn retire(&self, id: CoroutineId) {
        let slot = self
            .coroutines
            .borrow_mut()
            .remove(&id)
            .expect("dead coroutine missing from map at retirement");
        debug!("coroutine {} finished, recycling its stack", id);

        let mut recycle = self.recycle.borrow_mut();
        if recycle.len() >= self.max_free_recycled {
            recycle.pop_front();
        }
        recycle.push_back(slot.stack);
    }

    /// Suspends the calling coroutine, returning once externally resumed
    /// with the `result` that resume call carried.
    pub fn yield_now(&self) -> Result<i32, CoError> {
        let id = self.running_id.get();
        if id == INVALID_CO_ID {
            return Err(CoError::NotInCoroutine);
        }
        {
            let coroutines = self.coroutines.borrow();
            let slot = coroutines.get(&id).ok_or(CoError::NotInCoroutine)?;
            if slot.status != Status::Running {
                return Err(CoError::NotRunning);
            }
        }

        self.coroutines.borrow_mut().get_mut(&id).unwrap().status = Status::Suspend;
        CURRENT.with(|c| c.set(ptr::null()));

        let back = self
            .current_back
            .take()
            .expect("yield_now called with no recorded return context");
        trace!("coroutine {} yielding", id);
        let transfer = unsafe { back.resume(0) };

        CURRENT.with(|c| c.set(self as *const Schedule));
        self.current_back.set(Some(transfer.context));

        Ok((transfer.data as u32) as i32)
    }

    /// The status of `id`; an unknown id reports `Dead`.
    pub fn status(&self, id: CoroutineId) -> Status {
        self.coroutines
            .borrow()
            .get(&id)
            .map(|slot| slot.status)
            .unwrap_or(Status::Dead)
    }

    /// The currently running coroutine's id, or [`INVALID_CO_ID`].
    pub fn running(&self) -> CoroutineId {
        self.running_id.get()
    }

    /// Destroys every live and recycled coroutine and frees the schedule.
    /// In-flight stack frames of any still-suspended coroutine are not
    /// unwound (see the crate's teardown policy).
    pub fn close(self: Box<Self>) {
        debug!(
            "closing schedule: {} live, {} recycled",
            self.len(),
            self.recycled_len()
        );
        // Field drops (HashMap -> CoroutineSlot -> Stack, VecDeque -> Stack)
        // unmap every stack; nothing further to do.
    }
}

/// The schedule the currently executing coroutine belongs to, if any.
pub fn current() -> Option<&'static Schedule> {
    let ptr = CURRENT.with(|c| c.get());
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &*ptr })
    }
}

/// Suspends the calling coroutine using whichever schedule it is running
/// on. For use by zero-argument closure bodies, which have no explicit
/// `&Schedule` handle.
pub fn yield_now() -> Result<i32, CoError> {
    current().ok_or(CoError::NotInCoroutine)?.yield_now()
}

extern "C" fn trampoline(t: Transfer) -> ! {
    let schedule = unsafe { &*(t.data as *const Schedule) };
    let id = schedule.running_id.get();

    schedule.current_back.set(Some(t.context));
    CURRENT.with(|c| c.set(schedule as *const Schedule));

    let entry = {
        let mut coroutines = schedule.coroutines.borrow_mut();
        let slot = coroutines
            .get_mut(&id)
            .expect("trampoline entered for a coroutine missing its own slot");
        slot.entry
            .take()
            .expect("trampoline entered twice for the same coroutine")
    };

    debug!("coroutine {} starting", id);
    let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| match entry {
        Entry::Extern(f, ud) => f(schedule, ud),
        Entry::Closure(body) => body(),
    }));

    if let Err(payload) = outcome {
        error!("coroutine {} panicked: {}", id, describe_panic(&payload));
    }

    CURRENT.with(|c| c.set(ptr::null()));
    schedule
        .coroutines
        .borrow_mut()
        .get_mut(&id)
        .expect("coroutine missing its own slot at exit")
        .status = Status::Dead;
    debug!("coroutine {} finished", id);

    let back = schedule
        .current_back
        .take()
        .expect("back context missing at coroutine exit");
    let _ = unsafe { back.resume(0) };
    unreachable!("coroutine {} resumed after it had already finished", id)
}

fn describe_panic(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn quiescent_schedule_has_no_running_coroutine() {
        let schedule = Schedule::open(ScheduleConfig::default());
        assert_eq!(schedule.running(), INVALID_CO_ID);
    }

    #[test]
    fn round_trip_yield_delivers_resume_result() {
        let schedule = Schedule::open(ScheduleConfig::default());
        let observed = Rc::new(StdRefCell::new(Vec::new()));
        let observed_clone = observed.clone();

        let id = schedule
            .new_closure(move || {
                for _ in 0..3 {
                    let got = super::yield_now().unwrap();
                    observed_clone.borrow_mut().push(got);
                }
            })
            .unwrap();

        schedule.resume(id, 0).unwrap();
        assert_eq!(schedule.status(id), Status::Suspend);
        schedule.resume(id, 10).unwrap();
        schedule.resume(id, 20).unwrap();
        schedule.resume(id, 30).unwrap();

        assert_eq!(schedule.status(id), Status::Dead);
        assert_eq!(*observed.borrow(), vec![10, 20, 30]);
    }

    #[test]
    fn unknown_id_status_is_dead() {
        let schedule = Schedule::open(ScheduleConfig::default());
        assert_eq!(schedule.status(999), Status::Dead);
    }

    #[test]
    fn resume_unknown_id_is_an_error() {
        let schedule = Schedule::open(ScheduleConfig::default());
        assert!(matches!(schedule.resume(0, 0), Err(CoError::CoroutineUnexist)));
    }

    #[test]
    fn cannot_resume_from_inside_a_coroutine() {
        let schedule = Rc::new(Schedule::open(ScheduleConfig::default()));
        let inner_schedule = schedule.clone();
        let other_id_slot = Rc::new(StdRefCell::new(None));
        let other_id_slot_clone = other_id_slot.clone();

        let a = schedule
            .new_closure(move || {
                let other = *other_id_slot_clone.borrow();
                if let Some(other_id) = other {
                    let result = inner_schedule.resume(other_id, 0);
                    assert!(matches!(result, Err(CoError::CannotResumeInCoroutine)));
                }
                super::yield_now().unwrap();
            })
            .unwrap();

        let b = schedule.new_closure(|| {}).unwrap();
        *other_id_slot.borrow_mut() = Some(b);

        schedule.resume(a, 0).unwrap();
        schedule.resume(a, 0).unwrap();
        assert_eq!(schedule.status(a), Status::Dead);
    }

    #[test]
    fn finished_coroutine_recycles_its_stack() {
        let schedule = Schedule::open(ScheduleConfig::default());
        assert_eq!(schedule.recycled_len(), 0);
        let id = schedule.new_closure(|| {}).unwrap();
        schedule.resume(id, 0).unwrap();
        assert_eq!(schedule.status(id), Status::Dead);
        assert_eq!(schedule.recycled_len(), 1);
    }

    #[test]
    fn recycle_list_is_capped() {
        let schedule = Schedule::open(ScheduleConfig {
            stack_size: 0,
            max_free_recycled: 2,
        });
        for _ in 0..5 {
            let id = schedule.new_closure(|| {}).unwrap();
            schedule.resume(id, 0).unwrap();
        }
        assert_eq!(schedule.recycled_len(), 2);
    }

    #[test]
    fn yield_outside_coroutine_is_an_error() {
        assert!(matches!(super::yield_now(), Err(CoError::NotInCoroutine)));
    }
}
