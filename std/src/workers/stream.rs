use dendrite_core::identity::short_type_name;
use dendrite_core::worker::Worker;
use futures_util::stream::{BoxStream, Stream, StreamExt, TryStream, TryStreamExt};
use std::fmt;
use std::sync::Arc;

type StreamFactory<T> = Arc<dyn Fn() -> BoxStream<'static, anyhow::Result<T>> + Send + Sync>;

/// Runs a stream built by a factory. The factory is called each time the
/// worker starts; equivalent redeclarations keep the running stream.
pub struct StreamWorker<T> {
    factory: StreamFactory<T>,
}

impl<T: Send + 'static> StreamWorker<T> {
    pub fn new<F, S>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            factory: Arc::new(move || factory().map(Ok).boxed()),
        }
    }

    /// A stream whose first error fails the worker.
    pub fn try_new<F, S, E>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: TryStream<Ok = T, Error = E> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        Self {
            factory: Arc::new(move || factory().map_err(Into::into).into_stream().boxed()),
        }
    }
}

impl<T> Clone for StreamWorker<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
        }
    }
}

impl<T> fmt::Debug for StreamWorker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamWorker<{}>", short_type_name::<T>())
    }
}

impl<T: Send + 'static> Worker for StreamWorker<T> {
    type Output = T;

    fn run(&self) -> BoxStream<'static, anyhow::Result<T>> {
        (self.factory)()
    }

    fn describe(&self) -> String {
        format!("StreamWorker<{}>", short_type_name::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn test_factory_runs_on_every_start() {
        let worker = StreamWorker::new(|| stream::iter(["a", "b"]));
        let first: Vec<_> = worker.run().map(|item| item.unwrap()).collect().await;
        let second: Vec<_> = worker.clone().run().map(|item| item.unwrap()).collect().await;
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_error_item_is_reported() {
        let worker = StreamWorker::try_new(|| {
            stream::iter(vec![Ok(1), Err(std::io::Error::other("disk gone"))])
        });
        let items: Vec<_> = worker.run().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        assert!(items[1].as_ref().unwrap_err().to_string().contains("disk gone"));
    }

    #[test]
    fn test_description_names_output_type() {
        let worker = StreamWorker::new(|| futures_util::stream::empty::<u64>());
        assert_eq!(worker.describe(), "StreamWorker<u64>");
    }
}
