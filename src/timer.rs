//! Retry budgets and cancellable background tasks.
//!
//! - [`RetryPolicy`] bounds the SYN and FIN exchanges: send, wait up to
//!   `timeout` for the reply, repeat at most `max_attempts` times.
//! - [`TaskSlot`] owns at most one spawned task (a send-queue drainer or a
//!   CLOSE_WAIT reaper) and aborts it when replaced, cancelled or dropped.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// Total transmissions, including the first.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts,
        }
    }

    /// 1-based attempt numbers.
    pub fn attempts(&self) -> impl Iterator<Item = u32> {
        1..=self.max_attempts
    }

    /// Wait for `fut` for one attempt's timeout. `None` means it elapsed.
    pub async fn wait<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::time::timeout(self.timeout, fut).await.ok()
    }
}

/// Holder for an optional background task.
#[derive(Debug, Default)]
pub struct TaskSlot {
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    /// Install `handle`, aborting whatever task was there before.
    pub fn replace(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.handle.replace(handle) {
            old.abort();
        }
    }

    pub fn cancel(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl From<JoinHandle<()>> for TaskSlot {
    fn from(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
