// =============================================================================
// Consumer — bounded queue + async callback loop
// =============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::channels::routing::Subscription;
use crate::channels::topics::Message;

/// Async handler invoked once per dequeued message.
pub type ConsumerCallback<P> =
    Arc<dyn Fn(Message<P>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`ConsumerCallback`].
pub fn callback<P, F, Fut>(f: F) -> ConsumerCallback<P>
where
    F: Fn(Message<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

pub struct Consumer<P> {
    label: String,
    subscription: Subscription,
    sender: mpsc::Sender<Message<P>>,
    receiver: Mutex<Option<mpsc::Receiver<Message<P>>>>,
    callback: ConsumerCallback<P>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static> Consumer<P> {
    pub(crate) fn new(
        label: String,
        subscription: Subscription,
        callback: ConsumerCallback<P>,
        queue_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        Self {
            label,
            subscription,
            sender,
            receiver: Mutex::new(Some(receiver)),
            callback,
            running: Arc::new(AtomicBool::new(false)),
            cancel,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the consume loop. Calling it twice is a no-op.
    pub fn run(&self) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };
        let callback = Arc::clone(&self.callback);
        let cancel = self.cancel.clone();
        let running = Arc::clone(&self.running);
        let label = self.label.clone();
        running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(consumer = %label, "consumer cancelled");
                        break;
                    }
                    next = receiver.recv() => {
                        let Some(message) = next else {
                            debug!(consumer = %label, "consumer queue closed");
                            break;
                        };
                        let key = message.key.clone();
                        if let Err(e) = (callback)(message).await {
                            error!(consumer = %label, key = %key, error = %e, "consumer callback failed");
                        }
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });
        *self.handle.lock() = Some(handle);
    }

    /// Enqueue a message, waiting while the queue is full. Returns `false`
    /// when the consumer was cancelled before the message could be queued.
    pub async fn push(&self, message: Message<P>) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                info!(consumer = %self.label, "send cancelled");
                false
            }
            sent = self.sender.send(message) => sent.is_ok(),
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.subscription.rate_limited
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Wait for the consume loop to exit after [`Consumer::stop`].
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl<P> Drop for Consumer<P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
