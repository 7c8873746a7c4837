//! Timer-driven end-to-end scenarios: a task yielding with a timeout, and
//! the bucketed timer's cancel/restart ordering guarantees.

use std::cell::RefCell;
use std::rc::Rc;

use seqco::clock::fake::FakeClock;
use seqco::task::{Schedule, Task, TaskHandle};
use seqco::timer::{Timer, TimerConfig, TimerDriver, TimerOutcome};
use seqco::{Status, TimerError, TIMEOUT};

#[test]
fn timeout_resume_delivers_timeout_code() {
    let clock = Rc::new(FakeClock::new(0));
    let timer: Rc<RefCell<dyn TimerDriver>> =
        Rc::new(RefCell::new(Timer::new(clock.clone(), TimerConfig::default())));
    let schedule = Schedule::init(timer.clone(), 0);

    struct Waiter {
        results: Rc<RefCell<Vec<i32>>>,
    }
    impl Task for Waiter {
        fn run(self: Box<Self>, handle: TaskHandle) {
            let result = handle.yield_for(50).expect("yield_for failed");
            self.results.borrow_mut().push(result);
        }
    }

    let results = Rc::new(RefCell::new(Vec::new()));
    let pending = schedule.add_task(Box::new(Waiter {
        results: results.clone(),
    }));
    let id = pending.start(true);
    assert_eq!(schedule.status(id), Status::Suspend);

    // Advance the fake clock in small steps, driving the timer each time,
    // mirroring a real driver loop polling less often than the timeout.
    for _ in 0..5 {
        clock.advance(10);
        timer.borrow_mut().update();
    }

    assert_eq!(*results.borrow(), vec![TIMEOUT]);
    assert_eq!(schedule.status(id), Status::Dead);
}

#[test]
fn cancel_vs_fire_only_the_uncancelled_timer_fires() {
    let clock = Rc::new(FakeClock::new(0));
    let mut timer = Timer::new(clock.clone(), TimerConfig::default());

    let fired = Rc::new(RefCell::new(Vec::new()));
    let fired_a = fired.clone();
    let a = timer
        .start_timer(100, Box::new(move |id| {
            fired_a.borrow_mut().push(id);
            TimerOutcome::Remove
        }))
        .unwrap();
    let fired_b = fired.clone();
    let b = timer
        .start_timer(100, Box::new(move |id| {
            fired_b.borrow_mut().push(id);
            TimerOutcome::Remove
        }))
        .unwrap();

    clock.advance(50);
    timer.stop_timer(a).expect("stop_timer(a) should succeed at t=50");

    clock.advance(50);
    let count = timer.update();
    assert_eq!(count, 1);
    assert_eq!(*fired.borrow(), vec![b]);

    assert_eq!(timer.stop_timer(a), Err(TimerError::Unexisted));
}

#[test]
fn restart_pushes_to_the_tail_of_its_bucket() {
    let clock = Rc::new(FakeClock::new(0));
    let mut timer = Timer::new(clock.clone(), TimerConfig::default());

    let order = Rc::new(RefCell::new(Vec::new()));
    let mk = |order: Rc<RefCell<Vec<u64>>>| {
        Box::new(move |id| {
            order.borrow_mut().push(id);
            TimerOutcome::Remove
        }) as Box<dyn FnMut(u64) -> TimerOutcome>
    };

    let a = timer.start_timer(10, mk(order.clone())).unwrap();
    let b = timer.start_timer(10, mk(order.clone())).unwrap();
    let c = timer.start_timer(10, mk(order.clone())).unwrap();

    clock.advance(5);
    timer.restart_timer(a).expect("restart_timer(a) should succeed at t=5");

    clock.advance(5);
    let count = timer.update();
    assert_eq!(count, 3);
    assert_eq!(*order.borrow(), vec![b, c, a]);
}
