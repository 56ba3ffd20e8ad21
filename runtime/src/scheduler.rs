use std::cell::RefCell;
use std::collections::VecDeque;

use crate::engine::Engine;

type Task = Box<dyn FnOnce(&Engine)>;

/// Single-threaded run queue. Tasks run in the order they were scheduled;
/// a task may schedule more work.
#[derive(Default)]
pub struct Scheduler {
    queue: RefCell<VecDeque<Task>>,
}

impl Scheduler {
    pub fn schedule(&self, task: impl FnOnce(&Engine) + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Schedule `task` to run after `ticks` further turns of the queue.
    pub fn schedule_after(&self, ticks: usize, task: impl FnOnce(&Engine) + 'static) {
        if ticks == 0 {
            self.schedule(task);
        } else {
            self.schedule(move |engine: &Engine| engine.scheduler().schedule_after(ticks - 1, task));
        }
    }

    pub fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Run tasks until the queue is empty. Returns the number of tasks run.
    pub fn run_until_idle(&self, engine: &Engine) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(task) = next else { return ran };
            task(engine);
            ran += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::engine::Engine;

    #[test]
    fn delayed_tasks_run_after_earlier_ones() {
        let engine = Engine::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (ticks, name) in [(2, "late"), (0, "now"), (1, "soon")] {
            let log = log.clone();
            engine.schedule_after(ticks, move |_| log.borrow_mut().push(name));
        }
        engine.run_until_idle();
        assert_eq!(*log.borrow(), ["now", "soon", "late"]);
    }
}
