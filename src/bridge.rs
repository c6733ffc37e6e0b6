//! Handoff between the synchronous control thread and the single-threaded BLE worker.
//!
//! The worker owns a current-thread tokio runtime. Submitted operations run one after the other
//! in submission order; tasks the operations spawn (notification pumps, timers) interleave with
//! them at await points.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use log::{debug, info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Pending result of an operation submitted to the worker.
pub struct BridgeHandle<T> {
    result: Result<Receiver<T>, BridgeError>,
}

impl<T> BridgeHandle<T> {
    fn failed(error: BridgeError) -> Self {
        BridgeHandle { result: Err(error) }
    }

    /// Non-blocking check; `None` while the operation is still running.
    pub fn poll(&self) -> Option<Result<T, BridgeError>> {
        match &self.result {
            Err(error) => Some(Err(*error)),
            Ok(receiver) => match receiver.try_recv() {
                Ok(value) => Some(Ok(value)),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(Err(BridgeError::WorkerGone)),
            },
        }
    }

    /// Block the calling thread until the result arrives, or until `timeout` if one is given.
    pub fn wait(self, timeout: Option<Duration>) -> Result<T, BridgeError> {
        let receiver = self.result?;
        match timeout {
            None => receiver.recv().map_err(|_| BridgeError::WorkerGone),
            Some(timeout) => receiver.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => BridgeError::Timeout,
                RecvTimeoutError::Disconnected => BridgeError::WorkerGone,
            }),
        }
    }
}

pub struct AsyncBridge {
    sender: Mutex<Option<UnboundedSender<Job>>>,
    closing: Arc<AtomicBool>,
    cancel: CancellationToken,
    finished: Mutex<Option<Receiver<()>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AsyncBridge {
    pub fn start(name: &str) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let (sender, mut receiver) = unbounded_channel::<Job>();
        let (finished_tx, finished_rx) = sync_channel::<()>(1);

        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            runtime.block_on(async move {
                while let Some(job) = receiver.recv().await {
                    job.await;
                }
            });
            // tasks still spawned on the runtime are dropped with it
            drop(runtime);
            let _ = finished_tx.send(());
        })?;

        info!("Started session worker {}", name);

        Ok(AsyncBridge {
            sender: Mutex::new(Some(sender)),
            closing: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            finished: Mutex::new(Some(finished_rx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Cancelled when the bridge shuts down; background tasks on the worker should watch it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn submit<F, T>(&self, operation: F) -> BridgeHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closing() {
            return BridgeHandle::failed(BridgeError::SessionClosed);
        }

        let (result_tx, result_rx) = sync_channel::<T>(1);
        let job: Job = Box::pin(async move {
            let result = operation.await;
            // the caller may have stopped waiting
            let _ = result_tx.send(result);
        });

        let sender = match self.sender.lock() {
            Ok(sender) => sender,
            Err(_) => return BridgeHandle::failed(BridgeError::WorkerGone),
        };

        match sender.as_ref() {
            None => BridgeHandle::failed(BridgeError::SessionClosed),
            Some(sender) => match sender.send(job) {
                Ok(()) => BridgeHandle { result: Ok(result_rx) },
                Err(_) => BridgeHandle::failed(BridgeError::WorkerGone),
            },
        }
    }

    /// Stop accepting work, let queued operations drain and wait up to `grace` for the worker.
    /// Returns `false` if the worker was abandoned because it did not stop in time.
    pub fn shutdown(&self, grace: Duration) -> bool {
        if self.closing.swap(true, Ordering::SeqCst) {
            return true;
        }

        info!("Stopping session worker");
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        self.cancel.cancel();

        let finished = self.finished.lock().ok().and_then(|mut finished| finished.take());
        let stopped = match finished {
            Some(finished) => finished.recv_timeout(grace).is_ok(),
            None => true,
        };

        let thread = self.thread.lock().ok().and_then(|mut thread| thread.take());
        if stopped {
            if let Some(thread) = thread {
                if thread.join().is_err() {
                    warn!("Session worker panicked while stopping");
                }
            }
            debug!("Session worker stopped");
        } else {
            warn!("Session worker did not stop within {:?}; abandoning it", grace);
        }

        stopped
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        if !self.is_closing() {
            self.shutdown(Duration::from_millis(crate::device::constants::SHUTDOWN_GRACE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::time::sleep;

    #[test]
    fn operations_run_in_submission_order() {
        let bridge = AsyncBridge::start("bridge-test").unwrap();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let handles: Vec<_> = (0..5u64).map(|i| {
            let order = order.clone();
            bridge.submit(async move {
                // later submissions finish their sleep sooner
                sleep(Duration::from_millis(10 * (5 - i))).await;
                order.lock().unwrap().push(i);
                i
            })
        }).collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.wait(Some(Duration::from_secs(2))).unwrap(), i as u64);
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(bridge.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn submit_after_shutdown_fails_with_session_closed() {
        let bridge = AsyncBridge::start("bridge-test").unwrap();
        assert!(bridge.shutdown(Duration::from_secs(1)));

        let handle = bridge.submit(async { 1 });
        assert_eq!(handle.wait(None), Err(BridgeError::SessionClosed));
    }

    #[test]
    fn wait_times_out_without_stopping_the_worker() {
        let bridge = AsyncBridge::start("bridge-test").unwrap();

        let slow = bridge.submit(async { sleep(Duration::from_millis(200)).await });
        assert_eq!(slow.wait(Some(Duration::from_millis(10))), Err(BridgeError::Timeout));

        let next = bridge.submit(async { "still alive" });
        assert_eq!(next.wait(Some(Duration::from_secs(2))), Ok("still alive"));
    }

    #[test]
    fn shutdown_abandons_a_hung_worker_after_the_grace_period() {
        let bridge = AsyncBridge::start("bridge-test").unwrap();
        let _hung = bridge.submit(futures::future::pending::<()>());

        let started = std::time::Instant::now();
        assert!(!bridge.shutdown(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn poll_reports_completion() {
        let bridge = AsyncBridge::start("bridge-test").unwrap();
        let handle = bridge.submit(async { 42 });

        let mut result = None;
        for _ in 0..200 {
            result = handle.poll();
            if result.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(result, Some(Ok(42)));
    }
}
