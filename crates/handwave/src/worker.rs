//! Worker threads and one-shot promises.

use std::{
    fmt, io,
    panic::resume_unwind,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Sender, TrySendError};

use crate::drop::defer;

/// Creates a connected pair of [`Promise`] and [`PromiseHandle`].
pub fn promise<T>() -> (Promise<T>, PromiseHandle<T>) {
    // Capacity of 1 means that `Promise::fulfill` will never block.
    let (sender, recv) = crossbeam::channel::bounded(1);
    (Promise { inner: sender }, PromiseHandle { recv })
}

/// An empty slot that can be filled with a `T`, fulfilling the promise.
///
/// The tracking session hands one of these to its loop thread, which fulfills it with the outcome
/// of acquiring the camera and detector.
pub struct Promise<T> {
    inner: Sender<T>,
}

impl<T> Promise<T> {
    /// Fulfills the promise with a value, consuming it.
    ///
    /// This method does not block or fail. If the connected [`PromiseHandle`] was dropped, `value`
    /// is dropped.
    pub fn fulfill(self, value: T) {
        self.inner.send(value).ok();
    }
}

/// A handle connected to a [`Promise`] that will eventually resolve to a value of type `T`.
pub struct PromiseHandle<T> {
    recv: crossbeam::channel::Receiver<T>,
}

impl<T> PromiseHandle<T> {
    /// Blocks the calling thread until the [`Promise`] is fulfilled.
    ///
    /// Returns an error if the [`Promise`] was dropped without being fulfilled, which happens when
    /// the fulfilling thread panics.
    pub fn block(self) -> Result<T, PromiseDropped> {
        self.recv.recv().map_err(|_| PromiseDropped { _priv: () })
    }
}

/// An error returned by [`PromiseHandle::block`] indicating that the connected [`Promise`] object
/// was dropped without being fulfilled.
#[derive(Debug, Clone, Copy)]
pub struct PromiseDropped {
    _priv: (),
}

impl fmt::Display for PromiseDropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("promise dropped without being fulfilled")
    }
}

impl std::error::Error for PromiseDropped {}

/// A builder object that can be used to configure and spawn a [`Worker`].
#[derive(Clone)]
pub struct WorkerBuilder {
    name: Option<String>,
    capacity: usize,
}

impl WorkerBuilder {
    /// Sets the name of the [`Worker`] thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the channel capacity of the [`Worker`].
    ///
    /// By default, a capacity of 0 is used, which means that [`Worker::try_send`] only succeeds
    /// while the worker is idle.
    pub fn capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    /// Spawns a [`Worker`] thread that uses `handler` to process incoming messages.
    pub fn spawn<I, F>(self, mut handler: F) -> io::Result<Worker<I>>
    where
        I: Send + 'static,
        F: FnMut(I) + Send + 'static,
    {
        let (sender, recv) = crossbeam::channel::bounded(self.capacity);
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        let handle = builder.spawn(move || {
            let _guard;
            if let Some(name) = self.name {
                log::trace!("worker '{name}' starting");
                _guard = defer(move || log::trace!("worker '{name}' exiting"));
            }
            for message in recv {
                handler(message);
            }
        })?;

        Ok(Worker {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

/// A handle to a worker thread that processes messages of type `I`.
///
/// When dropped, the channel to the thread will be dropped and the thread will be joined after it
/// has processed all queued messages. If the thread has panicked, the panic will be forwarded to
/// the thread dropping the `Worker`.
pub struct Worker<I: Send + 'static> {
    sender: Option<Sender<I>>,
    handle: Option<JoinHandle<()>>,
}

impl<I: Send + 'static> Drop for Worker<I> {
    fn drop(&mut self) {
        // Close the channel to signal the thread to exit.
        drop(self.sender.take());

        self.wait_for_exit();
    }
}

impl Worker<()> {
    /// Returns a builder that can be used to configure and spawn a [`Worker`].
    #[inline]
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder {
            name: None,
            capacity: 0,
        }
    }
}

/// Error returned by [`Worker::try_send`].
#[derive(Debug, PartialEq, Eq)]
pub enum TrySendFailure<I> {
    /// The worker's queue is full. The message is handed back.
    Full(I),
    /// The worker has exited.
    Disconnected(I),
}

impl<I: Send + 'static> Worker<I> {
    fn wait_for_exit(&mut self) {
        // Wait for it to exit and propagate its panic if it panicked.
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(()) => {}
                Err(payload) => {
                    if !thread::panicking() {
                        resume_unwind(payload);
                    }
                }
            }
        }
    }

    /// Attempts to queue a message without blocking.
    pub fn try_send(&self, msg: I) -> Result<(), TrySendFailure<I>> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(TrySendFailure::Disconnected(msg));
        };
        sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(msg) => TrySendFailure::Full(msg),
            TrySendError::Disconnected(msg) => TrySendFailure::Disconnected(msg),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::{Arc, Mutex};

    use super::*;

    fn silent_panic(payload: String) {
        resume_unwind(Box::new(payload));
    }

    #[test]
    fn worker_propagates_panic_on_drop() {
        let worker = Worker::builder()
            .capacity(1)
            .spawn(|_: ()| silent_panic("worker panic".into()))
            .unwrap();
        worker.try_send(()).unwrap();
        catch_unwind(AssertUnwindSafe(|| drop(worker))).unwrap_err();
    }

    #[test]
    fn worker_drains_queue_on_drop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let worker = Worker::builder()
            .name("drain")
            .capacity(8)
            .spawn(move |i: u32| seen2.lock().unwrap().push(i))
            .unwrap();
        for i in 0..8 {
            worker.try_send(i).unwrap();
        }
        drop(worker);
        assert_eq!(*seen.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn try_send_reports_full_queue() {
        let (gate, gate_handle) = promise::<()>();
        let mut gate_handle = Some(gate_handle);
        let worker = Worker::builder()
            .capacity(1)
            .spawn(move |_: u32| {
                if let Some(handle) = gate_handle.take() {
                    handle.block().ok();
                }
            })
            .unwrap();

        // The first message is picked up and blocks the worker, the second fills the queue.
        worker.try_send(0).unwrap();
        let mut queued = 0;
        let mut full = false;
        for i in 1..100 {
            match worker.try_send(i) {
                Ok(()) => queued += 1,
                Err(TrySendFailure::Full(msg)) => {
                    assert_eq!(msg, i);
                    full = true;
                    break;
                }
                Err(TrySendFailure::Disconnected(_)) => panic!("worker exited"),
            }
        }
        assert!(full);
        assert!(queued <= 1);
        gate.fulfill(());
    }

    #[test]
    fn promise_resolves() {
        let (promise, handle) = promise();
        promise.fulfill(42);
        assert_eq!(handle.block().unwrap(), 42);

        let (promise, handle) = super::promise::<()>();
        drop(promise);
        handle.block().unwrap_err();
    }
}
