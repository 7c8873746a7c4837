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

//! Glues the coroutine core to an external [`TimerDriver`]: a [`Task`] runs
//! inside a coroutine and can [`TaskHandle::yield_for`] a timeout, waking
//! either when externally [`Schedule::resume`]d or when its wake-up timer
//! fires.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use log::{debug, error};

use crate::coroutine::{self, CoroutineId, ScheduleConfig, INVALID_CO_ID};
use crate::error::{CoError, TIMEOUT};
use crate::timer::{TimerDriver, TimerOutcome};

/// A unit of work that runs inside a coroutine.
///
/// `run` takes `self` by boxed value (Rust has no implicit base-class
/// `this`, so ownership of the task is handed to its own body instead of
/// shared with it) and a [`TaskHandle`] for yielding and self-identification.
pub trait Task {
    fn run(self: Box<Self>, handle: TaskHandle);
}

/// Passed to a running [`Task`]'s body: its own id, and the ability to
/// yield for a timeout.
pub struct TaskHandle {
    schedule: *const Schedule,
    id: CoroutineId,
}

impl TaskHandle {
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    /// Yields. If `timeout_ms > 0`, also arms a one-shot wake-up timer; the
    /// return value is [`TIMEOUT`] if the timer fired first, or whatever
    /// `result` an external [`Schedule::resume`] supplied otherwise.
    pub fn yield_for(&self, timeout_ms: u32) -> Result<i32, CoError> {
        let schedule = unsafe { &*self.schedule };
        schedule.yield_for(self.id, timeout_ms)
    }
}

/// A task that has been handed to a [`Schedule`] but not yet started.
/// Dropping it without calling [`PendingTask::start`] discards the task,
/// matching "destroying a task before Start removes it from pre-start".
pub struct PendingTask<'a> {
    schedule: &'a Schedule,
    task: Option<Box<dyn Task>>,
}

impl<'a> PendingTask<'a> {
    /// Starts the task: allocates a coroutine whose body runs `Task::run`.
    /// If `immediate`, and the caller is not itself inside a coroutine,
    /// resumes it synchronously before returning its id. If `immediate` is
    /// requested from inside a coroutine, or the schedule was already
    /// [`Schedule::close`]d, the task is dropped unstarted and
    /// [`INVALID_CO_ID`] is returned.
    pub fn start(mut self, immediate: bool) -> CoroutineId {
        let task = self.task.take().expect("PendingTask started twice");
        self.schedule
            .pending_count
            .set(self.schedule.pending_count.get().saturating_sub(1));
        self.schedule.start_task(task, immediate)
    }
}

impl Drop for PendingTask<'_> {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.schedule
                .pending_count
                .set(self.schedule.pending_count.get().saturating_sub(1));
        }
    }
}

/// Binds a coroutine core to an external timer, running [`Task`]s atop it.
pub struct Schedule {
    co: RefCell<Option<Box<coroutine::Schedule>>>,
    timer: Rc<RefCell<dyn TimerDriver>>,
    pending_count: Cell<usize>,
    _not_send: PhantomData<*const ()>,
}

impl Schedule {
    /// Opens a coroutine scheduler with `stack_size` (`0` for the default)
    /// bound to `timer`.
    pub fn init(timer: Rc<RefCell<dyn TimerDriver>>, stack_size: usize) -> Box<Schedule> {
        Schedule::init_with(
            timer,
            ScheduleConfig {
                stack_size,
                ..ScheduleConfig::default()
            },
        )
    }

    /// As [`Schedule::init`], with full control over the coroutine core's
    /// configuration.
    pub fn init_with(timer: Rc<RefCell<dyn TimerDriver>>, config: ScheduleConfig) -> Box<Schedule> {
        Box::new(Schedule {
            co: RefCell::new(Some(coroutine::Schedule::open(config))),
            timer,
            pending_count: Cell::new(0),
            _not_send: PhantomData,
        })
    }

    /// Number of active (started, not yet dead) tasks.
    pub fn size(&self) -> usize {
        self.co.borrow().as_ref().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of [`PendingTask`]s handed out and not yet started or
    /// dropped.
    pub fn pending_len(&self) -> usize {
        self.pending_count.get()
    }

    /// Hands `task` to this schedule; it stays un-started until
    /// [`PendingTask::start`] is called (or the returned value is dropped).
    pub fn add_task(&self, task: Box<dyn Task>) -> PendingTask<'_> {
        self.pending_count.set(self.pending_count.get() + 1);
        PendingTask {
            schedule: self,
            task: Some(task),
        }
    }

    fn start_task(&self, task: Box<dyn Task>, immediate: bool) -> CoroutineId {
        if immediate && coroutine::current().is_some() {
            debug!("immediate start requested from inside a coroutine; task dropped");
            drop(task);
            return INVALID_CO_ID;
        }

        let schedule_ptr = self as *const Schedule;
        let id = {
            let co_ref = self.co.borrow();
            let co = match co_ref.as_ref() {
                Some(co) => co,
                None => {
                    debug!("start requested on a closed schedule; task dropped");
                    return INVALID_CO_ID;
                }
            };
            co.new_closure(move || {
                let id = coroutine::current()
                    .expect("task body runs inside its own coroutine")
                    .running();
                let handle = TaskHandle {
                    schedule: schedule_ptr,
                    id,
                };
                task.run(handle);
            })
            .expect("stack allocation for task failed")
        };

        if immediate {
            if let Err(e) = self.resume(id, 0) {
                error!("immediate resume of task {} failed: {}", id, e);
            }
        }
        id
    }

    /// Forwards to the coroutine core; an unknown id or a closed schedule
    /// both report `Dead`.
    pub fn status(&self, id: CoroutineId) -> coroutine::Status {
        self.co
            .borrow()
            .as_ref()
            .map(|c| c.status(id))
            .unwrap_or(coroutine::Status::Dead)
    }

    /// Forwards to the coroutine core.
    pub fn resume(&self, id: CoroutineId, result: i32) -> Result<(), CoError> {
        let co_ref = self.co.borrow();
        let co = co_ref.as_ref().ok_or(CoError::CoroutineUnexist)?;
        co.resume(id, result)
    }

    fn yield_for(&self, id: CoroutineId, timeout_ms: u32) -> Result<i32, CoError> {
        let timer_id = if timeout_ms > 0 {
            let schedule_addr = self as *const Schedule as usize;
            let started = self.timer.borrow_mut().start_timer(
                timeout_ms,
                Box::new(move |_timer_id| {
                    let schedule = unsafe { &*(schedule_addr as *const Schedule) };
                    if let Err(e) = schedule.resume(id, TIMEOUT) {
                        error!("timer-driven resume of task {} failed: {}", id, e);
                    }
                    TimerOutcome::Remove
                }),
            );
            match started {
                Ok(tid) => Some(tid),
                Err(_) => return Err(CoError::StartTimerFailed),
            }
        } else {
            None
        };

        // The raw coroutine's `yield_now` suspends *this* call stack; we must
        // not hold the `co` RefCell borrow across it; something else on this
        // same thread (a timer callback driven by `Update`) legitimately
        // borrows `self.co` again while we are dormant.
        let co_ptr: *const coroutine::Schedule = {
            let co_ref = self.co.borrow();
            let co = co_ref.as_ref().ok_or(CoError::NotInCoroutine)?;
            &**co
        };
        let result = unsafe { &*co_ptr }.yield_now();

        if let Some(tid) = timer_id {
            // Benign if the timer already fired: its callback removed it
            // and this is a no-op UNEXISTED, per the accepted open question.
            let _ = self.timer.borrow_mut().stop_timer(tid);
        }

        result
    }

    /// Closes the coroutine core, destroying every active task, and
    /// invalidates every outstanding pre-start [`PendingTask`]: once closed,
    /// [`PendingTask::start`] on one returns [`INVALID_CO_ID`] instead of
    /// starting it. Returns the total number of active-plus-pre-start tasks
    /// destroyed. Takes `&self` rather than consuming ownership, since an
    /// outstanding [`PendingTask`] legitimately still borrows this schedule
    /// and must be able to observe the close afterward.
    pub fn close(&self) -> usize {
        let co = self.co.borrow_mut().take();
        let active = co.as_ref().map(|c| c.len()).unwrap_or(0);
        let pending = self.pending_count.get();
        debug!(
            "closing task schedule: {} active + {} pre-start task(s) destroyed",
            active, pending
        );
        if let Some(co) = co {
            co.close();
        }
        active + pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fake::FakeClock;
    use crate::timer::{Timer, TimerConfig};
    use std::cell::RefCell as StdRefCell;

    fn new_schedule() -> (Box<Schedule>, Rc<FakeClock>) {
        let clock = Rc::new(FakeClock::new(0));
        let timer: Rc<RefCell<dyn TimerDriver>> =
            Rc::new(RefCell::new(Timer::new(clock.clone(), TimerConfig::default())));
        (Schedule::init(timer, 0), clock)
    }

    struct RecordingTask {
        log: Rc<StdRefCell<Vec<String>>>,
        yields: u32,
    }

    impl Task for RecordingTask {
        fn run(self: Box<Self>, handle: TaskHandle) {
            self.log.borrow_mut().push(format!("begin {}", handle.id()));
            for i in 0..self.yields {
                handle.yield_for(0).unwrap();
                self.log.borrow_mut().push(format!("loop {} {}", handle.id(), i));
            }
            self.log.borrow_mut().push(format!("end {}", handle.id()));
        }
    }

    #[test]
    fn quiescent_schedule_is_empty() {
        let (schedule, _clock) = new_schedule();
        assert_eq!(schedule.size(), 0);
    }

    #[test]
    fn close_counts_both_active_and_pre_start_tasks() {
        let (schedule, _clock) = new_schedule();
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let started = schedule
            .add_task(Box::new(RecordingTask {
                log: log.clone(),
                yields: 1,
            }))
            .start(true);
        assert_eq!(schedule.status(started), crate::coroutine::Status::Suspend);

        let pending = schedule.add_task(Box::new(RecordingTask {
            log: log.clone(),
            yields: 1,
        }));

        assert_eq!(schedule.close(), 2);

        // The schedule behind `pending` is now closed: starting it is a
        // graceful no-op, not a panic.
        assert_eq!(pending.start(true), INVALID_CO_ID);
    }

    #[test]
    fn dropping_a_pending_task_discards_it() {
        let (schedule, _clock) = new_schedule();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let pending = schedule.add_task(Box::new(RecordingTask { log, yields: 1 }));
        assert_eq!(schedule.pending_len(), 1);
        drop(pending);
        assert_eq!(schedule.pending_len(), 0);
        assert_eq!(schedule.size(), 0);
    }

    #[test]
    fn round_robin_five_tasks_five_yields() {
        let (schedule, _clock) = new_schedule();
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let mut ids = Vec::new();
        for _ in 0..5 {
            let pending = schedule.add_task(Box::new(RecordingTask {
                log: log.clone(),
                yields: 5,
            }));
            ids.push(pending.start(false));
        }

        // Round-robin driver: pop the front, resume it, push it to the back
        // unless it finished.
        let mut queue: std::collections::VecDeque<CoroutineId> = ids.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            schedule.resume(id, 0).unwrap();
            if !matches!(schedule.status(id), crate::coroutine::Status::Dead) {
                queue.push_back(id);
            }
        }

        let entries = log.borrow();
        assert_eq!(entries.iter().filter(|l| l.starts_with("begin")).count(), 5);
        assert_eq!(entries.iter().filter(|l| l.starts_with("loop")).count(), 25);
        assert_eq!(entries.iter().filter(|l| l.starts_with("end")).count(), 5);
        for id in ids {
            assert!(matches!(
                schedule.resume(id, 0),
                Err(CoError::CoroutineUnexist)
            ));
        }
    }

    #[test]
    fn timeout_resume_delivers_timeout_code() {
        let (schedule, clock) = new_schedule();

        struct Waiter {
            results: Rc<StdRefCell<Vec<i32>>>,
        }
        impl Task for Waiter {
            fn run(self: Box<Self>, handle: TaskHandle) {
                let result = handle.yield_for(50).unwrap();
                self.results.borrow_mut().push(result);
            }
        }

        let results = Rc::new(StdRefCell::new(Vec::new()));
        let pending = schedule.add_task(Box::new(Waiter {
            results: results.clone(),
        }));
        let id = pending.start(true);

        clock.advance(50);
        let fired = drive_timer(&schedule);
        assert_eq!(fired, 1);
        assert_eq!(*results.borrow(), vec![TIMEOUT]);
        assert_eq!(schedule.status(id), crate::coroutine::Status::Dead);
    }

    fn drive_timer(schedule: &Schedule) -> usize {
        // Reaches `Schedule`'s private `timer` field directly since this
        // module is a descendant of the one that defines it.
        schedule.timer.borrow_mut().update()
    }
}
