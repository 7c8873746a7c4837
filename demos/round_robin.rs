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

//! Five tasks, each looping five times and yielding, driven by a LIFO
//! wait set until all are dead.

use std::cell::RefCell;
use std::rc::Rc;

use seqco::clock::SystemClock;
use seqco::task::{Schedule, Task, TaskHandle};
use seqco::timer::{Timer, TimerConfig, TimerDriver};
use seqco::CoroutineId;

struct PrintTask {
    index: usize,
    wait_stack: Rc<RefCell<Vec<CoroutineId>>>,
}

impl Task for PrintTask {
    fn run(self: Box<Self>, handle: TaskHandle) {
        println!("begin task id:{}", self.index);
        for k in 0..5 {
            println!("task id {} loop idx {}", self.index, k);
            self.wait_stack.borrow_mut().push(handle.id());
            handle.yield_for(0).expect("yield_for failed");
        }
        println!("end task id: {}", self.index);
    }
}

fn main() {
    env_logger::init();

    let timer: Rc<RefCell<dyn TimerDriver>> =
        Rc::new(RefCell::new(Timer::new(SystemClock, TimerConfig::default())));
    let schedule = Schedule::init(timer, 0);

    let wait_stack: Rc<RefCell<Vec<CoroutineId>>> = Rc::new(RefCell::new(Vec::new()));
    for index in 0..5 {
        let pending = schedule.add_task(Box::new(PrintTask {
            index,
            wait_stack: wait_stack.clone(),
        }));
        pending.start(true);
    }

    loop {
        let next = wait_stack.borrow_mut().pop();
        match next {
            Some(id) => schedule.resume(id, 0).expect("resume failed"),
            None => break,
        }
    }
}
