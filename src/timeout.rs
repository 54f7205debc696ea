use std::time::Duration;

use tokio::runtime::Runtime;

use crate::error::{Error, Result};

/// Runs blocking capability calls (model inference, remote scoring) under a
/// deadline.
///
/// The call runs on tokio's blocking pool; if it does not finish in time
/// the caller gets [`Error::Timeout`] while the call itself is left to
/// finish in the background. Dropping a `CallTimeout` does not wait for such
/// abandoned calls.
///
/// `run` blocks the calling thread and must not be called from async code.
/// Inside a tokio runtime it fails with a capability error; wrap the whole
/// operation in `spawn_blocking` instead.
#[derive(Debug)]
pub struct CallTimeout {
    limit: Duration,
    runtime: Option<Runtime>,
}

impl CallTimeout {
    pub fn new(limit: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("docgate-capability")
            .enable_time()
            .build()?;
        Ok(Self {
            limit,
            runtime: Some(runtime),
        })
    }

    /// Run `call`, failing with [`Error::Timeout`] after the limit.
    ///
    /// A panic inside `call` is reported as a capability error, and so is
    /// calling this from within an async runtime.
    pub fn run<T, F>(&self, capability: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let Some(runtime) = &self.runtime else {
            return Err(Error::capability(capability, "runtime is shut down"));
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::capability(
                capability,
                "blocking call issued from inside an async runtime",
            ));
        }
        let limit = self.limit;
        runtime.block_on(async move {
            let task = tokio::task::spawn_blocking(call);
            match tokio::time::timeout(limit, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(Error::capability(
                    capability,
                    format!("call aborted: {join_err}"),
                )),
                Err(_) => {
                    tracing::warn!(
                        capability,
                        ?limit,
                        "capability call timed out"
                    );
                    Err(Error::Timeout {
                        capability,
                        after: limit,
                    })
                }
            }
        })
    }
}

impl Drop for CallTimeout {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
