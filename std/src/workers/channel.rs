use dendrite_core::identity::short_type_name;
use dendrite_core::worker::Worker;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Creates a worker that emits every value sent through the returned sender.
/// The worker finishes once all senders are dropped.
pub fn channel<T: Send + 'static>(buffer: usize) -> (mpsc::Sender<T>, ChannelWorker<T>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        tx,
        ChannelWorker {
            receiver: Arc::new(Mutex::new(Some(rx))),
        },
    )
}

/// Bridges values pushed from outside the tree into a workflow.
///
/// The receiver can only be consumed once. If the worker is torn down and
/// declared again, the new run fails.
pub struct ChannelWorker<T> {
    receiver: Arc<Mutex<Option<mpsc::Receiver<T>>>>,
}

impl<T> Clone for ChannelWorker<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<T: Send + 'static> Worker for ChannelWorker<T> {
    type Output = T;

    fn run(&self) -> BoxStream<'static, anyhow::Result<T>> {
        match self.receiver.lock().take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                let value = rx.recv().await?;
                Some((Ok(value), rx))
            })
            .boxed(),
            None => {
                tracing::warn!(worker = %self.describe(), "Channel worker restarted after its receiver was consumed");
                stream::once(async {
                    Err(anyhow::anyhow!("channel worker was restarted after its receiver was consumed"))
                })
                .boxed()
            }
        }
    }

    /// Clones of one channel are the same work; separate channels are not.
    fn does_same_work_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.receiver, &other.receiver)
    }

    fn describe(&self) -> String {
        format!("ChannelWorker<{}>", short_type_name::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emits_sent_values_until_senders_drop() {
        let (tx, worker) = channel::<u32>(4);
        let mut events = worker.run();
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        assert_eq!(events.next().await.unwrap().unwrap(), 1);
        assert_eq!(events.next().await.unwrap().unwrap(), 2);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_second_run_fails() {
        let (_tx, worker) = channel::<u32>(1);
        let _first = worker.run();
        let mut second = worker.clone().run();
        assert!(second.next().await.unwrap().is_err());
    }

    #[test]
    fn test_only_clones_are_equivalent() {
        let (_a, first) = channel::<u32>(1);
        let (_b, second) = channel::<u32>(1);
        assert!(first.does_same_work_as(&first.clone()));
        assert!(!first.does_same_work_as(&second));
    }
}
