// src/locker.rs

//! Per-task lock capability.
//!
//! A task configured with a locker factory acquires the lock before its
//! handler runs and releases it on every exit path. This is the extension
//! point for at-most-one-concurrent-runner-per-task across a distributed
//! fleet (e.g. a DynamoDB or Redis lock); the crate itself only ships
//! in-process implementations.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Semaphore;

/// Lock capability used by [`Task::execute`](crate::dag::task::Task::execute).
///
/// `try_lock` must not block waiting for the lock: a lock that is currently
/// held is reported as not granted, which the executor translates into a
/// retryable failure.
#[async_trait]
pub trait TaskLocker: Send + Sync {
    /// Attempt to acquire the lock. `Ok(false)` means the lock is held
    /// elsewhere and the task should be retried on a later invocation.
    async fn try_lock(&self) -> Result<bool>;

    /// Release the lock.
    async fn unlock(&self) -> Result<()>;
}

/// Locker that always grants. Used when a task has no locker factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLocker;

#[async_trait]
impl TaskLocker for NopLocker {
    async fn try_lock(&self) -> Result<bool> {
        Ok(true)
    }

    async fn unlock(&self) -> Result<()> {
        Ok(())
    }
}

/// In-process locker over a shared [`Semaphore`].
///
/// Share one semaphore with a single permit between the task instances that
/// must exclude each other.
#[derive(Debug, Clone)]
pub struct SemaphoreLocker {
    semaphore: Arc<Semaphore>,
}

impl SemaphoreLocker {
    pub fn new(semaphore: Arc<Semaphore>) -> Self {
        Self { semaphore }
    }
}

#[async_trait]
impl TaskLocker for SemaphoreLocker {
    async fn try_lock(&self) -> Result<bool> {
        match self.semaphore.try_acquire() {
            Ok(permit) => {
                // The permit is restored explicitly in `unlock`.
                permit.forget();
                Ok(true)
            }
            Err(tokio::sync::TryAcquireError::NoPermits) => Ok(false),
            Err(err) => Err(anyhow::Error::new(err).context("acquiring task lock")),
        }
    }

    async fn unlock(&self) -> Result<()> {
        self.semaphore.add_permits(1);
        Ok(())
    }
}
