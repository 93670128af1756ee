//! Free list of reusable `HttpJob` values
//!
//! Ingestion takes a value with [`JobRecycler::acquire`], fills it in and
//! submits it. Workers hand executed jobs back through
//! [`JobRecycler::release`]; rejected jobs come back the same way.

use bwp_common::{HttpJob, Job};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct JobRecycler {
    free: Mutex<Vec<HttpJob>>,
    capacity: usize,
    reused: AtomicU64,
    allocated: AtomicU64,
}

impl JobRecycler {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    /// Hand out a cleared job, reusing a released one when available.
    pub fn acquire(&self) -> HttpJob {
        match self.free.lock().pop() {
            Some(job) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                job
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                HttpJob::default()
            }
        }
    }

    /// Reset the job and keep it for reuse. Dropped once the list is full.
    pub fn release(&self, mut job: HttpJob) {
        job.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(job);
        }
    }

    pub fn release_job(&self, job: Job) {
        match job {
            Job::Http(http) => self.release(http),
        }
    }

    /// Number of idle values currently held
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (reused, freshly allocated) counts since creation
    pub fn counts(&self) -> (u64, u64) {
        (
            self.reused.load(Ordering::Relaxed),
            self.allocated.load(Ordering::Relaxed),
        )
    }
}

impl Default for JobRecycler {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_job_comes_back_reset() {
        let recycler = JobRecycler::new(4);

        let mut job = recycler.acquire();
        job.url.push_str("http://example.com/a");
        job.method.push_str("POST");
        job.body.extend_from_slice(b"data");
        job.headers.insert("X-A".into(), "1".into());
        recycler.release(job);

        assert_eq!(recycler.idle(), 1);
        let job = recycler.acquire();
        assert!(job.is_reset());
        assert!(job.url.capacity() >= "http://example.com/a".len());
        assert_eq!(recycler.counts(), (1, 1));
    }

    #[test]
    fn test_free_list_is_bounded() {
        let recycler = JobRecycler::new(2);
        for _ in 0..5 {
            recycler.release(HttpJob::new("http://example.com"));
        }
        assert_eq!(recycler.idle(), 2);
    }

    #[test]
    fn test_zero_capacity_never_retains() {
        let recycler = JobRecycler::new(0);
        recycler.release_job(Job::Http(HttpJob::new("http://example.com")));
        assert_eq!(recycler.idle(), 0);
    }
}
