// Blocking primitives shared by the dispatcher and its callers

use std::marker::PhantomData;

use parking_lot::{Condvar, Mutex};

use super::value::Value;
use crate::error::{runtime_error, VmResult};

/// Counting semaphore
#[derive(Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Block until the count is positive, then take one
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    pub fn signal(&self) {
        *self.count.lock() += 1;
        self.cond.notify_one();
    }
}

/// One-shot result slot a caller blocks on until the worker fills it
#[derive(Default)]
pub struct Completion {
    done: Semaphore,
    result: Mutex<Option<VmResult<Value>>>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self, result: VmResult<Value>) {
        *self.result.lock() = Some(result);
        self.done.signal();
    }

    /// Release the waiter of an event that will never run
    pub fn abandon(&self) {
        self.complete(Err(runtime_error("The VM shut down before the event was handled")));
    }

    pub fn wait(&self) -> VmResult<Value> {
        self.done.wait();
        self.result
            .lock()
            .take()
            .unwrap_or_else(|| Err(runtime_error("Event completed without a result")))
    }
}

/// Proof of running in worker context. The dispatcher creates one when its
/// worker starts and hands it to everything that handles events; it cannot
/// leave the thread it was created on.
#[derive(Clone, Copy)]
pub struct WorkerToken {
    _not_send: PhantomData<*const ()>,
}

impl WorkerToken {
    pub(crate) fn new() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_semaphore_counts() {
        let sem = Arc::new(Semaphore::new(1));
        sem.wait();
        let signaller = {
            let sem = sem.clone();
            thread::spawn(move || {
                sem.signal();
                sem.signal();
            })
        };
        sem.wait();
        sem.wait();
        signaller.join().unwrap();
        assert_eq!(*sem.count.lock(), 0);
    }

    #[test]
    fn test_completion_across_threads() {
        let completion = Arc::new(Completion::new());
        let worker = {
            let completion = completion.clone();
            thread::spawn(move || completion.complete(Ok(Value::Integer(7))))
        };
        assert_eq!(completion.wait().unwrap().to_int32(), 7);
        worker.join().unwrap();
    }

    #[test]
    fn test_abandoned_completion_is_error() {
        let completion = Completion::new();
        completion.abandon();
        assert!(completion.wait().is_err());
    }
}
