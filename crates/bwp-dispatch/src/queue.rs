//! Bounded FIFO between submitters and workers
//!
//! Admission is a single `try_send` on a bounded channel, so the capacity
//! check and the insertion happen as one step and concurrent producers can
//! never push the queue past its limit.

use async_channel::{Receiver, Sender, TrySendError};
use bwp_common::Job;

use crate::error::PoolError;

/// A refused job together with the reason, so the caller can recycle it.
#[derive(Debug)]
pub struct Rejected {
    pub reason: PoolError,
    pub job: Job,
}

pub struct BoundedJobQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    limit: usize,
}

impl BoundedJobQueue {
    pub fn new(limit: usize) -> Self {
        // a zero-capacity channel would be a rendezvous, not an empty queue
        let (tx, rx) = async_channel::bounded(limit.max(1));
        Self { tx, rx, limit }
    }

    /// Non-blocking admission.
    pub fn try_enqueue(&self, job: Job) -> Result<(), Rejected> {
        if self.tx.is_closed() {
            return Err(Rejected { reason: PoolError::Closed, job });
        }
        if self.limit == 0 {
            return Err(Rejected { reason: PoolError::CapacityExceeded, job });
        }
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => Err(Rejected {
                reason: PoolError::CapacityExceeded,
                job,
            }),
            Err(TrySendError::Closed(job)) => Err(Rejected {
                reason: PoolError::Closed,
                job,
            }),
        }
    }

    /// Receiver handle for a worker
    pub fn receiver(&self) -> Receiver<Job> {
        self.rx.clone()
    }

    /// Stop admitting. Jobs already queued stay receivable until drained.
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Take one queued job without waiting
    pub fn try_dequeue(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
