use anyhow::{Context, Result};
use flume::Receiver;
use std::{fmt::Debug, future::Future, thread::JoinHandle};

use super::bus::ConsumerBus;

/// Spawn a dedicated worker thread that drives `make_future` to completion on
/// its own single-threaded runtime.
///
/// All tasks spawned from inside the future stay on that one thread, so the
/// state owned by a connection is never touched from two threads at once.
pub fn spawn_worker<F, Fut>(name: &str, make_future: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + 'static,
{
    let thread_name = name.to_string();
    std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::error!("Failed to create runtime for worker {thread_name}: {err}");
                    return;
                }
            };
            let local = tokio::task::LocalSet::new();
            local.block_on(&runtime, make_future());
            log::debug!("Worker {thread_name} finished");
        })
        .with_context(|| format!("Failed to spawn worker thread {name}"))
}

/// Wait for a worker thread, reporting a panic instead of propagating it.
pub fn join_worker(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    if handle.join().is_err() {
        log::error!("Worker {name} panicked");
    }
}

/// Consumer-side ownership of one worker thread and its channel pair.
///
/// Dropping the handle sends the worker's stop command and joins the thread.
pub struct WorkerHandle<C: Debug + Clone, E> {
    bus: ConsumerBus<C, E>,
    worker: Option<JoinHandle<()>>,
    stop_command: C,
}

impl<C: Debug + Clone, E> WorkerHandle<C, E> {
    pub fn new(bus: ConsumerBus<C, E>, worker: JoinHandle<()>, stop_command: C) -> Self {
        Self {
            bus,
            worker: Some(worker),
            stop_command,
        }
    }

    pub fn send(&self, command: C) {
        self.bus.send(command);
    }

    pub fn events(&self) -> &Receiver<E> {
        &self.bus.events
    }

    /// True once the worker thread has exited on its own or been stopped
    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(true, |worker| worker.is_finished())
    }

    /// Ask the worker to stop and wait for its thread.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.bus.send(self.stop_command.clone());
            join_worker(worker);
        }
    }
}

impl<C: Debug + Clone, E> Drop for WorkerHandle<C, E> {
    fn drop(&mut self) {
        self.stop();
    }
}
