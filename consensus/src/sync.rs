//! Bounded, single-flight, in-order block verification queue used during
//! catch-up (C8).

use chain_core::Block;
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default bound on how many not-yet-verified blocks may queue up.
pub const DEFAULT_CAPACITY: usize = 64;

/// A queue of blocks delivered during catch-up, drained by a single
/// in-flight verifier. `add` enqueues a block and, if no verification is
/// currently running, starts draining: it verifies blocks in arrival order
/// until one succeeds, then discards the rest of the queue (duplicate or
/// stale adjacent blocks never get their own verification pass). No two
/// verifications ever run concurrently.
pub struct SyncQueue {
    capacity: usize,
    queue: Mutex<VecDeque<Block>>,
    verifying: Mutex<bool>,
}

impl Default for SyncQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SyncQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::new()),
            verifying: Mutex::new(false),
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Clears the queue without verifying anything. Only safe to call
    /// between blocks — it never interrupts a verification already in
    /// flight, it just empties what remains for the drain loop to find.
    pub async fn wipe(&self) {
        self.queue.lock().await.clear();
        debug!("sync queue wiped");
    }

    /// Enqueues `block` and, if nothing is currently verifying, drains the
    /// queue with `verify` until one block verifies successfully (at which
    /// point the remainder is discarded) or the queue empties out.
    pub async fn add<F, Fut>(&self, block: Block, mut verify: F)
    where
        F: FnMut(Block) -> Fut,
        Fut: Future<Output = bool>,
    {
        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.capacity {
                queue.pop_front();
            }
            queue.push_back(block);
        }

        {
            let mut verifying = self.verifying.lock().await;
            if *verifying {
                debug!("verification already in flight, leaving block queued");
                return;
            }
            *verifying = true;
        }

        loop {
            let next = {
                let mut queue = self.queue.lock().await;
                queue.pop_front()
            };
            let Some(candidate) = next else { break };
            let number = candidate.number;
            if verify(candidate).await {
                info!(number, "sync block verified, discarding remainder of queue");
                self.queue.lock().await.clear();
                break;
            }
            debug!(number, "sync block failed verification, trying next queued block");
        }

        *self.verifying.lock().await = false;
    }
}
