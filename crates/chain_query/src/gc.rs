use std::{sync::Weak, time::Duration};

use tokio::{
    runtime,
    sync::oneshot,
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{executor::QueryExecutor, time::TimeSinceEpoch, Provider};

/// Periodically evicts unobserved entries whose retention elapsed.
pub(crate) struct GarbageCollector {
    inner: Option<Inner>,
}

/// Inner type of [`GarbageCollector`], required for the implementation of
/// `Drop`.
struct Inner {
    cancellation_sender: oneshot::Sender<()>,
    background_task: JoinHandle<()>,
}

impl GarbageCollector {
    pub fn new<ProviderT: Provider, TimerT: TimeSinceEpoch>(
        runtime: &runtime::Handle,
        interval: Duration,
        executor: Weak<QueryExecutor<ProviderT, TimerT>>,
    ) -> Self {
        let (cancellation_sender, cancellation_receiver) = oneshot::channel();
        let background_task = runtime.spawn(async move {
            gc_loop(interval, executor, cancellation_receiver).await;
        });

        Self {
            inner: Some(Inner {
                cancellation_sender,
                background_task,
            }),
        }
    }

    /// Whether the collector stopped, either because it was cancelled or
    /// because its executor is gone.
    pub fn is_finished(&self) -> bool {
        self.inner
            .as_ref()
            .is_none_or(|inner| inner.background_task.is_finished())
    }
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn gc_loop<ProviderT: Provider, TimerT: TimeSinceEpoch>(
    interval: Duration,
    executor: Weak<QueryExecutor<ProviderT, TimerT>>,
    mut cancellation_receiver: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut cancellation_receiver => return,
            _ = ticker.tick() => {
                let Some(executor) = executor.upgrade() else {
                    return;
                };

                executor.sweep();
            }
        }
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        if let Some(Inner {
            cancellation_sender,
            background_task: _,
        }) = self.inner.take()
        {
            let _result = cancellation_sender.send(());
        }
    }
}
