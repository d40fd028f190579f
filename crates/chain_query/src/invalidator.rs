use std::sync::Arc;

use chain_query_key::CacheKey;
use futures::{Stream, StreamExt as _};
use parking_lot::Mutex;
use tokio::{runtime, sync::oneshot, task::JoinHandle};

use crate::store::ResultCacheStore;

/// Marks block-scoped entries stale as new blocks are observed.
///
/// Block notifications are applied as a single scan over the tracked entries,
/// so the cost of a block doesn't depend on the number of subscribers.
pub struct BlockInvalidator {
    store: Arc<ResultCacheStore>,
    latest_block: Mutex<Option<u64>>,
}

impl BlockInvalidator {
    /// Constructs an invalidator for the provided store.
    pub fn new(store: Arc<ResultCacheStore>) -> Self {
        Self {
            store,
            latest_block: Mutex::new(None),
        }
    }

    /// Applies a block notification. Returns the keys that became stale.
    ///
    /// Duplicate and out-of-order notifications are harmless: an entry is
    /// only invalidated by a block newer than the block it was fetched at.
    pub fn on_block(&self, block_number: u64) -> Vec<CacheKey> {
        {
            let mut latest_block = self.latest_block.lock();
            if latest_block.is_none_or(|latest| latest < block_number) {
                *latest_block = Some(block_number);
            }
        }

        let staled = self.store.mark_block_stale(block_number);
        if !staled.is_empty() {
            log::debug!(
                "Block {block_number} invalidated {} cache entries",
                staled.len()
            );
        }

        staled
    }

    /// The highest block number observed so far.
    pub fn latest_block(&self) -> Option<u64> {
        *self.latest_block.lock()
    }
}

/// Drives a block handler from a stream of block numbers on a background
/// task. The task is cancelled when the watcher is dropped.
pub struct BlockWatcher {
    inner: Option<Inner>,
}

/// Inner type of [`BlockWatcher`], required for the implementation of
/// `Drop`.
struct Inner {
    cancellation_sender: oneshot::Sender<()>,
    background_task: JoinHandle<()>,
}

impl BlockWatcher {
    /// Spawns a task that calls `handler` for every block number emitted by
    /// `blocks`.
    pub fn new<StreamT, HandlerT>(
        runtime: &runtime::Handle,
        blocks: StreamT,
        handler: HandlerT,
    ) -> Self
    where
        StreamT: Stream<Item = u64> + Send + 'static,
        HandlerT: Fn(u64) + Send + 'static,
    {
        let (cancellation_sender, cancellation_receiver) = oneshot::channel();
        let background_task =
            runtime.spawn(async move { watch_loop(blocks, handler, cancellation_receiver).await });

        Self {
            inner: Some(Inner {
                cancellation_sender,
                background_task,
            }),
        }
    }

    /// Whether the block stream ended or the watcher was cancelled.
    pub fn is_finished(&self) -> bool {
        self.inner
            .as_ref()
            .is_none_or(|inner| inner.background_task.is_finished())
    }
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn watch_loop<StreamT, HandlerT>(
    blocks: StreamT,
    handler: HandlerT,
    mut cancellation_receiver: oneshot::Receiver<()>,
) where
    StreamT: Stream<Item = u64> + Send,
    HandlerT: Fn(u64),
{
    let mut blocks = Box::pin(blocks);

    loop {
        tokio::select! {
            _ = &mut cancellation_receiver => return,
            block_number = blocks.next() => match block_number {
                Some(block_number) => handler(block_number),
                None => {
                    log::debug!("Block source ended");
                    return;
                }
            },
        }
    }
}

impl Drop for BlockWatcher {
    fn drop(&mut self) {
        if let Some(Inner {
            cancellation_sender,
            background_task: _,
        }) = self.inner.take()
        {
            // Fails if the task already ended with the block source.
            let _result = cancellation_sender.send(());
        }
    }
}
