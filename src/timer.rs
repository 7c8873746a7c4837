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

//! A bucketed, insertion-ordered one-shot timeout service.
//!
//! Entries sharing a `timeout_ms` live in one FIFO bucket; since every entry
//! in a bucket has the same timeout, the head of the bucket is always the
//! next one due. `update` walks every bucket once, firing everything whose
//! deadline has passed.

use std::collections::HashMap;

use log::{debug, trace};

use crate::clock::Clock;
use crate::error::TimerError;
use crate::list::{Handle, IntrusiveList};

/// What a fired callback asks the timer to do with its own entry.
///
/// Replaces the historical tri-valued `< 0 / = 0 / > 0` callback-return
/// protocol (`kTIMER_BE_REMOVED` and friends); [`Timer::to_code`]-style
/// conversions are unnecessary here since the callback shape is entirely
/// internal to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Do not reinsert (`BE_REMOVED`).
    Remove,
    /// Reinsert at tail with the same `timeout_ms`, `start_time = now`.
    Continue,
    /// Reinsert at tail with a new `timeout_ms`, `start_time = now`.
    Reschedule(u32),
}

type Callback = Box<dyn FnMut(u64) -> TimerOutcome>;

struct TimerEntry {
    id: u64,
    timeout_ms: u32,
    start_time_ms: i64,
    callback: Callback,
}

/// Construction-time configuration for a [`Timer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerConfig {
    /// Upper bound on live timers. `None` (the default) means unbounded.
    pub max_timer_num: Option<u32>,
}

/// The object-safe surface of [`Timer`], used so the task layer does not
/// need to carry a `Clock` type parameter of its own.
pub trait TimerDriver {
    fn start_timer(
        &mut self,
        timeout_ms: u32,
        callback: Callback,
    ) -> Result<u64, TimerError>;

    fn stop_timer(&mut self, id: u64) -> Result<(), TimerError>;

    fn restart_timer(&mut self, id: u64) -> Result<(), TimerError>;

    fn update(&mut self) -> usize;
}

/// A bucketed timeout service driven by an explicit [`Clock`].
pub struct Timer<C: Clock> {
    clock: C,
    next_id: u64,
    max_timer_num: Option<u32>,
    in_callback: bool,
    index: HashMap<u64, (u32, Handle)>,
    buckets: HashMap<u32, IntrusiveList<TimerEntry>>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl<C: Clock> Timer<C> {
    pub fn new(clock: C, config: TimerConfig) -> Timer<C> {
        Timer {
            clock,
            next_id: 1,
            max_timer_num: config.max_timer_num,
            in_callback: false,
            index: HashMap::new(),
            buckets: HashMap::new(),
            _not_send: std::marker::PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl<C: Clock> TimerDriver for Timer<C> {
    /// Registers a one-shot entry expiring `timeout_ms` after now.
    fn start_timer(
        &mut self,
        timeout_ms: u32,
        callback: Callback,
    ) -> Result<u64, TimerError> {
        if timeout_ms == 0 {
            return Err(TimerError::InvalidParam);
        }
        if let Some(max) = self.max_timer_num {
            if self.index.len() as u32 >= max {
                return Err(TimerError::NumOutOfRange);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let now = self.clock.now_ms();

        let bucket = self.buckets.entry(timeout_ms).or_default();
        let handle = bucket.push_back(TimerEntry {
            id,
            timeout_ms,
            start_time_ms: now,
            callback,
        });
        self.index.insert(id, (timeout_ms, handle));

        trace!("timer {} started, timeout_ms={}", id, timeout_ms);
        Ok(id)
    }

    /// Cancels `id`. Returns `Unexisted` if already fired or unknown.
    fn stop_timer(&mut self, id: u64) -> Result<(), TimerError> {
        if self.in_callback {
            return Err(TimerError::InCallback);
        }
        let (timeout_ms, handle) = self.index.remove(&id).ok_or(TimerError::Unexisted)?;
        let bucket = self
            .buckets
            .get_mut(&timeout_ms)
            .expect("bucket missing for indexed timer");
        bucket.remove(handle);
        trace!("timer {} stopped", id);
        Ok(())
    }

    /// Rebases `id`'s `start_time` to now and moves it to the tail of its
    /// bucket, keeping the same `timeout_ms`.
    fn restart_timer(&mut self, id: u64) -> Result<(), TimerError> {
        if self.in_callback {
            return Err(TimerError::InCallback);
        }
        let (timeout_ms, handle) = self.index.remove(&id).ok_or(TimerError::Unexisted)?;
        let bucket = self
            .buckets
            .get_mut(&timeout_ms)
            .expect("bucket missing for indexed timer");
        let entry = bucket.remove(handle).expect("handle tracked by index");

        let now = self.clock.now_ms();
        let new_handle = bucket.push_back(TimerEntry {
            id: entry.id,
            timeout_ms: entry.timeout_ms,
            start_time_ms: now,
            callback: entry.callback,
        });
        self.index.insert(id, (timeout_ms, new_handle));
        trace!("timer {} restarted", id);
        Ok(())
    }

    /// Fires every entry whose deadline has passed, in bucket-FIFO order.
    /// Entries are detached from their bucket *before* the callback runs so
    /// the callback may freely `start_timer` again; `in_callback` rejects
    /// `stop_timer`/`restart_timer` for the duration of the sweep.
    fn update(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.in_callback = true;
        let mut fired = 0usize;

        // `Reschedule` may target a different bucket than the one currently
        // being swept, which would need a second `&mut self.buckets` while
        // the sweep's own borrow of that bucket is still live. Rescheduled
        // entries are queued here instead and only inserted once every
        // bucket's sweep (and its borrow) has ended.
        let mut reschedules: Vec<(u32, TimerEntry)> = Vec::new();

        let timeouts: Vec<u32> = self.buckets.keys().copied().collect();
        for timeout_ms in timeouts {
            let bucket = match self.buckets.get_mut(&timeout_ms) {
                Some(bucket) => bucket,
                None => continue,
            };
            loop {
                let due = match bucket.front() {
                    Some(handle) => {
                        let entry = bucket.get(handle).expect("front handle is live");
                        entry.start_time_ms + i64::from(entry.timeout_ms) <= now
                    }
                    None => false,
                };
                if !due {
                    break;
                }

                let handle = bucket.front().unwrap();
                let mut entry = bucket.remove(handle).expect("front handle is live");
                self.index.remove(&entry.id);

                let outcome = (entry.callback)(entry.id);
                fired += 1;

                match outcome {
                    TimerOutcome::Remove => {
                        debug!("timer {} fired and removed", entry.id);
                    }
                    TimerOutcome::Continue => {
                        entry.start_time_ms = now;
                        let new_handle = bucket.push_back(TimerEntry {
                            id: entry.id,
                            timeout_ms,
                            start_time_ms: now,
                            callback: entry.callback,
                        });
                        self.index.insert(entry.id, (timeout_ms, new_handle));
                        debug!("timer {} fired and reinserted (periodic)", entry.id);
                    }
                    TimerOutcome::Reschedule(new_timeout) => {
                        entry.start_time_ms = now;
                        entry.timeout_ms = new_timeout;
                        debug!(
                            "timer {} fired and rescheduled to {} ms",
                            entry.id, new_timeout
                        );
                        reschedules.push((new_timeout, entry));
                    }
                }
            }
        }

        for (new_timeout, entry) in reschedules {
            let id = entry.id;
            let new_bucket = self.buckets.entry(new_timeout).or_default();
            let new_handle = new_bucket.push_back(entry);
            self.index.insert(id, (new_timeout, new_handle));
        }

        self.in_callback = false;
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fake::FakeClock;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn new_timer() -> (Timer<Rc<FakeClock>>, Rc<FakeClock>) {
        let clock = Rc::new(FakeClock::new(0));
        (Timer::new(clock.clone(), TimerConfig::default()), clock)
    }

    #[test]
    fn fires_after_timeout_elapses() {
        let (mut timer, clock) = new_timer();
        let fired = Rc::new(RefCell::new(false));
        let fired_clone = fired.clone();
        timer
            .start_timer(
                50,
                Box::new(move |_| {
                    *fired_clone.borrow_mut() = true;
                    TimerOutcome::Remove
                }),
            )
            .unwrap();

        assert_eq!(timer.update(), 0);
        assert!(!*fired.borrow());

        clock.advance(50);
        assert_eq!(timer.update(), 1);
        assert!(*fired.borrow());
    }

    #[test]
    fn cancel_vs_fire_scenario() {
        // StartTimer(100) twice at t=0; Stop(a) at t=50; Update at t=100
        // should fire only b, and Stop(a) again is UNEXISTED.
        let (mut timer, clock) = new_timer();
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = log.clone();
        let a = timer
            .start_timer(
                100,
                Box::new(move |id| {
                    log_a.borrow_mut().push(id);
                    TimerOutcome::Remove
                }),
            )
            .unwrap();
        let log_b = log.clone();
        let b = timer
            .start_timer(
                100,
                Box::new(move |id| {
                    log_b.borrow_mut().push(id);
                    TimerOutcome::Remove
                }),
            )
            .unwrap();

        clock.advance(50);
        timer.stop_timer(a).unwrap();

        clock.advance(50);
        assert_eq!(timer.update(), 1);
        assert_eq!(*log.borrow(), vec![b]);
        assert_eq!(timer.stop_timer(a), Err(TimerError::Unexisted));
    }

    #[test]
    fn restart_pushes_to_tail() {
        let (mut timer, clock) = new_timer();
        let order = Rc::new(RefCell::new(Vec::new()));

        let mut start = |timer: &mut Timer<Rc<FakeClock>>| {
            let order = order.clone();
            timer
                .start_timer(
                    10,
                    Box::new(move |id| {
                        order.borrow_mut().push(id);
                        TimerOutcome::Remove
                    }),
                )
                .unwrap()
        };

        let a = start(&mut timer);
        let b = start(&mut timer);
        let c = start(&mut timer);

        clock.advance(5);
        timer.restart_timer(a).unwrap();

        clock.advance(5);
        assert_eq!(timer.update(), 3);
        assert_eq!(*order.borrow(), vec![b, c, a]);
    }

    #[test]
    fn stop_unknown_id_is_unexisted() {
        let (mut timer, _clock) = new_timer();
        assert_eq!(timer.stop_timer(999), Err(TimerError::Unexisted));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let (mut timer, _clock) = new_timer();
        assert_eq!(
            timer.start_timer(0, Box::new(|_| TimerOutcome::Remove)),
            Err(TimerError::InvalidParam)
        );
    }

    #[test]
    fn respects_max_timer_num() {
        let clock = Rc::new(FakeClock::new(0));
        let mut timer = Timer::new(
            clock,
            TimerConfig {
                max_timer_num: Some(1),
            },
        );
        timer.start_timer(10, Box::new(|_| TimerOutcome::Remove)).unwrap();
        assert_eq!(
            timer.start_timer(10, Box::new(|_| TimerOutcome::Remove)),
            Err(TimerError::NumOutOfRange)
        );
    }

    #[test]
    fn periodic_outcome_refires_every_interval() {
        let (mut timer, clock) = new_timer();
        let count = Rc::new(RefCell::new(0));
        let count_clone = count.clone();
        timer
            .start_timer(
                10,
                Box::new(move |_| {
                    *count_clone.borrow_mut() += 1;
                    TimerOutcome::Continue
                }),
            )
            .unwrap();

        clock.advance(10);
        assert_eq!(timer.update(), 1);
        clock.advance(10);
        assert_eq!(timer.update(), 1);
        assert_eq!(*count.borrow(), 2);
        assert_eq!(timer.len(), 1);
    }
}
