//! Background task handle shared by both transports

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawned transport task plus the channel used to ask it to stop
#[derive(Debug)]
pub(crate) struct TaskHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `run`, handing it the shutdown receiver
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let join = tokio::spawn(run(rx));
        Self { shutdown, join }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal shutdown and give the task `grace` to exit on its own before aborting it
    pub(crate) fn cancel(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        if grace.is_zero() || self.join.is_finished() {
            self.join.abort();
            return;
        }

        let mut join = self.join;
        let abort = join.abort_handle();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if tokio::time::timeout(grace, &mut join).await.is_err() {
                        debug!("transport task ignored shutdown, aborting");
                        abort.abort();
                    }
                });
            }
            Err(_) => abort.abort(),
        }
    }
}

/// Resolves once shutdown has been requested (or the handle was dropped)
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
