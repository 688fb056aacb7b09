//! Serial background job queue
//!
//! Stands in for the OS job scheduler that runs broadcast handlers away from
//! the delivery context. Jobs run one at a time, in order, on a dedicated
//! thread.

use crossbeam_channel::{bounded, unbounded, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum QueueRequest {
    Run(Job),
    /// Acknowledged once every job queued before it has finished
    Barrier(Sender<()>),
    Shutdown,
}

pub struct BackgroundQueue {
    name: String,
    request_tx: Sender<QueueRequest>,
    worker_handle: Option<JoinHandle<()>>,
}

impl BackgroundQueue {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (request_tx, request_rx) = unbounded::<QueueRequest>();
        let worker_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for request in request_rx.iter() {
                    match request {
                        QueueRequest::Run(job) => job(),
                        QueueRequest::Barrier(ack) => {
                            let _ = ack.send(());
                        }
                        QueueRequest::Shutdown => break,
                    }
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            request_tx,
            worker_handle: Some(worker_handle),
        })
    }

    /// Queue `job` behind everything already queued. Returns false if the
    /// worker has gone away.
    pub fn enqueue<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.request_tx.send(QueueRequest::Run(Box::new(job))) {
            Ok(()) => true,
            Err(_) => {
                warn!("Background queue {} is closed, dropping job", self.name);
                false
            }
        }
    }

    /// Block until all jobs queued so far have run, or `timeout` passes
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = bounded(1);
        if self.request_tx.send(QueueRequest::Barrier(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for BackgroundQueue {
    fn drop(&mut self) {
        let _ = self.request_tx.send(QueueRequest::Shutdown);
        if let Some(handle) = self.worker_handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        debug!("Background queue {} stopped", self.name);
    }
}
