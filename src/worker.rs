//! Acquisition-thread harness.
//!
//! Every reader owns one worker thread that drives the external source and
//! feeds the bounded queue. The worker never panics across the thread
//! boundary: any failure is stored in the shared error slot, the stop flag
//! is raised, the end sentinel is pushed, and the thread exits. The caller
//! observes the stored error on its next operation.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::queue::{FrameQueue, OverflowPolicy};

/// State shared between the acquisition thread and the caller.
#[derive(Debug)]
pub(crate) struct Shared<T> {
    pub(crate) queue: FrameQueue<T>,
    error: Mutex<Option<Error>>,
}

impl<T> Shared<T> {
    pub(crate) fn new(policy: OverflowPolicy) -> Arc<Self> {
        Arc::new(Self {
            queue: FrameQueue::new(policy),
            error: Mutex::new(None),
        })
    }

    /// Records a terminal worker error. The first error wins.
    pub(crate) fn store_error(&self, error: Error) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Takes the captured error, if any, for rethrow on the caller thread.
    pub(crate) fn take_error(&self) -> Option<Error> {
        self.error.lock().unwrap().take()
    }
}

/// Handle to the acquisition thread. Joining is idempotent and never blocks
/// indefinitely: every worker loop bounds its blocking calls and honors the
/// stop flag.
#[derive(Debug)]
pub(crate) struct Worker {
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Starts the acquisition loop. `run` returns `Ok(())` on normal
    /// exhaustion (end of stream or stop); any error is captured into the
    /// shared slot. The end sentinel is pushed on every exit path.
    pub(crate) fn spawn<T, F>(name: &str, shared: Arc<Shared<T>>, run: F) -> Result<Worker>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Err(error) = run() {
                    shared.store_error(error);
                    shared.queue.request_stop();
                }
                shared.queue.push_end();
            })
            .map_err(|err| Error::runtime(format!("failed to spawn acquisition thread: {err}")))?;
        Ok(Worker {
            handle: Some(handle),
        })
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Slot;

    #[test]
    fn worker_error_is_deferred_to_the_caller() {
        let shared: Arc<Shared<u64>> = Shared::new(OverflowPolicy::DropOldest {
            high: 100,
            drop: 90,
        });
        let mut worker = Worker::spawn("acquisition-test", Arc::clone(&shared), {
            let shared = Arc::clone(&shared);
            move || {
                shared.queue.push(1);
                Err(Error::runtime("source went away"))
            }
        })
        .unwrap();
        worker.join();

        // The item pushed before the failure is lost to the stop signal;
        // the caller sees the sentinel and then the stored error.
        assert!(matches!(shared.queue.pop_blocking(), Slot::End));
        let error = shared.take_error().expect("captured error");
        assert!(matches!(error, Error::Runtime(_)));
        assert!(shared.take_error().is_none());
    }

    #[test]
    fn clean_exit_pushes_the_end_sentinel() {
        let shared: Arc<Shared<u64>> = Shared::new(OverflowPolicy::DropOldest {
            high: 100,
            drop: 90,
        });
        let mut worker = Worker::spawn("acquisition-test", Arc::clone(&shared), {
            let shared = Arc::clone(&shared);
            move || {
                shared.queue.push(7);
                Ok(())
            }
        })
        .unwrap();
        worker.join();

        assert!(matches!(shared.queue.pop_blocking(), Slot::Item(7)));
        assert!(matches!(shared.queue.pop_blocking(), Slot::End));
        assert!(shared.take_error().is_none());
    }
}
