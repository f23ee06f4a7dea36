// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::future::Future;
use std::panic::resume_unwind;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::FutureExt as _;

static RUNTIME_ID: AtomicUsize = AtomicUsize::new(0);

/// A runtime to run future tasks.
#[derive(Debug, Clone)]
pub struct Runtime {
    name: String,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl Runtime {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Spawn a future and execute it in this thread pool.
    ///
    /// A panic inside `future` is logged and re-raised from the returned
    /// `JoinHandle` rather than silently dropped, so a panicking load or
    /// sweep job is never mistaken for a stalled one.
    #[must_use = "this task may panic, join it to properly observe panics"]
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let caught = AssertUnwindSafe(future).catch_unwind().map(|res| match res {
            Ok(val) => val,
            Err(payload) => {
                log::error!("task panicked: {payload:?}");
                resume_unwind(payload)
            }
        });
        JoinHandle::new(self.runtime.spawn(caught))
    }

    /// Run the provided function on an executor dedicated to blocking
    /// operations.
    #[must_use = "this task may panic, join it to properly observe panics"]
    pub fn spawn_blocking<F, R>(&self, func: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let caught = move || match std::panic::catch_unwind(AssertUnwindSafe(func)) {
            Ok(val) => val,
            Err(payload) => {
                log::error!("task panicked: {payload:?}");
                resume_unwind(payload)
            }
        };
        JoinHandle::new(self.runtime.spawn_blocking(caught))
    }

    /// Run a future to completion; this is the runtime entry point.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, thiserror::Error)]
#[error("task was canceled")]
pub struct CanceledError;

#[derive(Debug)]
pub struct JoinHandle<R> {
    inner: tokio::task::JoinHandle<R>,
}

impl<R> JoinHandle<R> {
    fn new(inner: tokio::task::JoinHandle<R>) -> Self {
        Self { inner }
    }

    pub fn cancel(&self) {
        self.inner.abort()
    }
}

impl<R> Future for JoinHandle<R> {
    type Output = Result<R, CanceledError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(val)) => Poll::Ready(Ok(val)),
            Poll::Ready(Err(err)) => {
                if err.is_panic() {
                    log::error!("task panicked: {err:?}");
                    resume_unwind(err.into_panic())
                } else {
                    Poll::Ready(Err(CanceledError))
                }
            }
        }
    }
}

pub struct Builder {
    runtime_name: String,
    thread_name: String,
    builder: tokio::runtime::Builder,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            runtime_name: format!("runtime-{}", RUNTIME_ID.fetch_add(1, Ordering::Relaxed)),
            thread_name: "default-worker".to_string(),
            builder: tokio::runtime::Builder::new_multi_thread(),
        }
    }
}

impl Builder {
    /// Sets the number of worker threads the Runtime will use.
    pub fn worker_threads(&mut self, val: usize) -> &mut Self {
        self.builder.worker_threads(val);
        self
    }

    /// Sets a custom timeout for a thread in the blocking pool.
    pub fn thread_keep_alive(&mut self, duration: Duration) -> &mut Self {
        self.builder.thread_keep_alive(duration);
        self
    }

    pub fn runtime_name(&mut self, val: impl Into<String>) -> &mut Self {
        self.runtime_name = val.into();
        self
    }

    /// Sets name of threads spawned by the Runtime thread pool.
    pub fn thread_name(&mut self, val: impl Into<String>) -> &mut Self {
        self.thread_name = val.into();
        self
    }

    pub fn build(&mut self) -> std::io::Result<Runtime> {
        let name = self.runtime_name.clone();
        let runtime = self
            .builder
            .enable_all()
            .thread_name(self.thread_name.clone())
            .build()
            .map(Arc::new)?;
        Ok(Runtime { name, runtime })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    fn runtime() -> Arc<Runtime> {
        let runtime = Builder::default()
            .worker_threads(2)
            .thread_name("test_spawn_join")
            .build();
        Arc::new(runtime.unwrap())
    }

    #[test]
    fn test_block_on() {
        let runtime = runtime();

        let out = runtime.block_on(async {
            let (tx, rx) = oneshot::channel();

            let _ = thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                tx.send("ZONE").unwrap();
            });

            rx.await.unwrap()
        });

        assert_eq!(out, "ZONE");
    }

    #[test]
    fn test_spawn_join() {
        let runtime = runtime();
        let handle = runtime.spawn(async { 1 + 1 });

        assert_eq!(2, runtime.block_on(handle).unwrap());
    }

    #[test]
    fn test_cancel() {
        let runtime = runtime();
        let handle = runtime.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        handle.cancel();
        assert!(runtime.block_on(handle).is_err());
    }
}
