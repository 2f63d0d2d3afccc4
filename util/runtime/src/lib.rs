//! Global tokio runtime for quarry services.
//!
//! The binary constructs the runtime exactly once and hands the [`Handle`]
//! down to every component that needs to spawn tasks or block on futures.

use std::future::Future;

use tokio::runtime::Builder;
pub use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

/// Handle to the global runtime, cheap to clone.
#[derive(Debug, Clone)]
pub struct Handle {
    inner: tokio::runtime::Handle,
}

impl Handle {
    /// Spawns a future onto the runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.spawn(future)
    }

    /// Runs a future to completion on the current thread.
    ///
    /// Must not be called from within the runtime itself.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.inner.block_on(future)
    }

    /// Enters the runtime context, e.g. to construct timers outside a task.
    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _enter = self.inner.enter();
        f()
    }

    /// The raw tokio handle.
    pub fn inner(&self) -> &tokio::runtime::Handle {
        &self.inner
    }
}

/// Creates the global multi-thread runtime.
pub fn new_global_runtime() -> (Handle, Runtime) {
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("GlobalRt")
        .build()
        .expect("quarry runtime init");
    let handle = Handle {
        inner: runtime.handle().clone(),
    };
    (handle, runtime)
}
