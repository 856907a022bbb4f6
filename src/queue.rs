//! The job queue every continuation runs on.
//!
//! The engine only ever enqueues; draining happens in [`Engine::run_jobs`]
//! and [`Engine::block_on`], one job at a time.
//!
//! [`Engine::run_jobs`]: crate::Engine::run_jobs
//! [`Engine::block_on`]: crate::Engine::block_on
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

use crate::promise::ReactionType;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Runs a `then` handler (or passes the value through) for a settled
    /// promise.
    PromiseReaction(ReactionType),
    /// Calls a thenable's then action with a fresh resolver pair.
    ResolveThenable,
}

/// A unit of deferred work. An `Err` from [`Job::run`] means the job failed
/// and had no promise to reject.
pub struct Job {
    kind: JobKind,
    run: Box<dyn FnOnce() -> Result<(), Error>>,
}

impl Job {
    pub fn new(kind: JobKind, run: impl FnOnce() -> Result<(), Error> + 'static) -> Self {
        Self {
            kind,
            run: Box::new(run),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn run(self) -> Result<(), Error> {
        (self.run)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// FIFO scheduling contract. `enqueue` must never run the job it is given.
pub trait JobQueue {
    fn enqueue(&self, job: Job);
    fn dequeue(&self) -> Option<Job>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MicrotaskQueue {
    jobs: RefCell<VecDeque<Job>>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobQueue for MicrotaskQueue {
    fn enqueue(&self, job: Job) {
        self.jobs.borrow_mut().push_back(job);
    }

    fn dequeue(&self) -> Option<Job> {
        self.jobs.borrow_mut().pop_front()
    }

    fn len(&self) -> usize {
        self.jobs.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{Job, JobKind, JobQueue, MicrotaskQueue};

    #[test]
    fn test_jobs_run_in_enqueue_order() {
        let queue = MicrotaskQueue::new();
        let order = Rc::new(RefCell::new(vec![]));
        for i in 0..3 {
            let order = order.clone();
            queue.enqueue(Job::new(JobKind::ResolveThenable, move || {
                order.borrow_mut().push(i);
                Ok(())
            }));
        }
        assert!(order.borrow().is_empty());
        assert_eq!(queue.len(), 3);
        while let Some(job) = queue.dequeue() {
            job.run().unwrap();
        }
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_job_may_enqueue_while_running() {
        let queue = Rc::new(MicrotaskQueue::new());
        let inner = queue.clone();
        queue.enqueue(Job::new(JobKind::ResolveThenable, move || {
            inner.enqueue(Job::new(JobKind::ResolveThenable, || Ok(())));
            Ok(())
        }));
        let mut ran = 0;
        while let Some(job) = queue.dequeue() {
            job.run().unwrap();
            ran += 1;
        }
        assert_eq!(ran, 2);
    }
}
