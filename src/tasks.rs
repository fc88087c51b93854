// src/tasks.rs
use futures::future::join_all;
use log::{error, info};
use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Held by main, triggers shutdown of every background job.
#[derive(Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

/// Cloned into each background job.
#[derive(Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

pub fn shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

impl ShutdownTx {
    pub fn trigger(&self) {
        let _ = self.0.send(true);
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

impl ShutdownRx {
    /// Resolves once shutdown was signaled or the sender is gone.
    pub async fn wait(&mut self) {
        while !*self.0.borrow() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Waits for SIGINT or SIGTERM on unix, Ctrl+C elsewhere.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers, falling back to ctrl-c: {}", e);
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        return;
    }
    info!("Received Ctrl+C");
}

/// Named background jobs sharing one shutdown signal, joined together.
pub struct TaskSet {
    shutdown: ShutdownTx,
    rx: ShutdownRx,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskSet {
    pub fn new() -> Self {
        let (shutdown, rx) = shutdown_channel();
        Self {
            shutdown,
            rx,
            handles: Vec::new(),
        }
    }

    /// Spawns a job; the closure receives its own shutdown receiver.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, job: F)
    where
        F: FnOnce(ShutdownRx) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        info!("Starting background task {}", name);
        let handle = tokio::spawn(job(self.rx.clone()));
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signals shutdown and waits for every job to return.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        let (names, handles): (Vec<_>, Vec<_>) = self.handles.into_iter().unzip();
        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            match result {
                Ok(()) => info!("Background task {} stopped", name),
                Err(e) => error!("Background task {} failed: {}", name, e),
            }
        }
    }
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}
