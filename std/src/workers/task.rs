use async_trait::async_trait;
use dendrite_core::identity::short_type_name;
use dendrite_core::worker::Worker;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, StreamExt};
use std::future::Future;
use std::sync::Arc;

/// One-shot asynchronous work, such as a request to an external service.
///
/// Wrap it in [`Task`] to declare it from a render pass.
#[async_trait]
pub trait TaskWorker: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn perform(&self) -> anyhow::Result<Self::Output>;

    /// Return `false` to restart an in-flight task when its inputs change.
    fn does_same_work_as(&self, _other: &Self) -> bool {
        true
    }
}

/// Runs a [`TaskWorker`]: emits its result once, or fails with its error.
pub struct Task<T>(Arc<T>);

impl<T: TaskWorker> Task<T> {
    pub fn new(task: T) -> Self {
        Self(Arc::new(task))
    }

    pub fn inner(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: TaskWorker> Worker for Task<T> {
    type Output = T::Output;

    fn run(&self) -> BoxStream<'static, anyhow::Result<T::Output>> {
        let task = self.0.clone();
        stream::once(logged(self.describe(), async move { task.perform().await })).boxed()
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self.0.does_same_work_as(&other.0)
    }

    fn describe(&self) -> String {
        format!("Task<{}>", short_type_name::<T>())
    }
}

type FutureFactory<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// A one-shot worker built from a closure. See [`from_fn`].
pub struct FutureWorker<T> {
    factory: FutureFactory<T>,
}

/// Creates a worker that runs the future returned by `f` and emits its
/// result once.
pub fn from_fn<T, F, Fut>(f: F) -> FutureWorker<T>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    FutureWorker {
        factory: Arc::new(move || f().boxed()),
    }
}

impl<T> Clone for FutureWorker<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
        }
    }
}

impl<T: Send + 'static> Worker for FutureWorker<T> {
    type Output = T;

    fn run(&self) -> BoxStream<'static, anyhow::Result<T>> {
        stream::once(logged(self.describe(), (self.factory)())).boxed()
    }

    fn describe(&self) -> String {
        format!("FutureWorker<{}>", short_type_name::<T>())
    }
}

async fn logged<T>(work: String, result: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
    let result = result.await;
    match &result {
        Ok(_) => tracing::trace!(%work, "Task completed"),
        Err(error) => tracing::debug!(%work, error = %error, "Task failed"),
    }
    result
}
