//! Worker fleet sharing one listening socket.
//!
//! Every worker is a thread with its own single-threaded runtime, store
//! connection and HTTP client, accepting from a clone of the same socket.
//! A worker that returns or panics is replaced.

use notice_forwarder::config::Config as ForwarderConfig;
use notice_forwarder::errors::ForwarderError;
use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

/// Process exit status when a worker cannot reach the correlation store.
pub const STORE_FAILURE_EXIT_CODE: i32 = 6;

/// Binds the socket all workers accept from.
pub fn bind(host: &str, port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((host, port))?;
    // Required by tokio::net::TcpListener::from_std
    listener.set_nonblocking(true)?;
    Ok(listener)
}

pub struct Supervisor {
    listener: TcpListener,
    workers: usize,
    /// Replacements to start before giving up. Unbounded if `None`.
    restart_limit: Option<usize>,
}

impl Supervisor {
    pub fn new(listener: TcpListener, workers: usize) -> Self {
        Supervisor {
            listener,
            workers,
            restart_limit: None,
        }
    }

    /// Starts the workers and replaces each one that exits.
    ///
    /// Only returns once the restart limit is reached, or if a worker thread
    /// cannot be started.
    pub fn run<F>(self, worker: F) -> io::Result<()>
    where
        F: Fn(usize, TcpListener) + Send + Sync + 'static,
    {
        let worker = Arc::new(worker);
        let (exits_tx, exits_rx) = mpsc::channel();

        for id in 0..self.workers {
            self.spawn(id, &worker, &exits_tx)?;
        }

        let mut restarts = 0;
        for id in exits_rx.iter() {
            if self.restart_limit.is_some_and(|limit| restarts >= limit) {
                tracing::warn!(worker = id, restarts, "Worker exited, restart limit reached");
                return Ok(());
            }

            restarts += 1;
            tracing::warn!(worker = id, "Worker exited, starting a replacement");
            self.spawn(id, &worker, &exits_tx)?;
        }

        Ok(())
    }

    fn spawn<F>(&self, id: usize, worker: &Arc<F>, exits: &mpsc::Sender<usize>) -> io::Result<()>
    where
        F: Fn(usize, TcpListener) + Send + Sync + 'static,
    {
        let listener = self.listener.try_clone()?;
        let worker = worker.clone();
        let guard = ExitGuard {
            id,
            exits: exits.clone(),
        };

        thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                let _guard = guard;
                worker(id, listener);
            })?;

        tracing::debug!(worker = id, "Worker started");
        Ok(())
    }
}

/// Reports the worker's exit to the supervisor, including on panic.
struct ExitGuard {
    id: usize,
    exits: mpsc::Sender<usize>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.exits.send(self.id);
    }
}

/// The worker body for the notice forwarder.
///
/// Exits the process if the correlation store cannot be reached.
pub fn forwarder_worker(config: ForwarderConfig) -> impl Fn(usize, TcpListener) + Send + Sync + 'static {
    move |id, listener| match serve(listener, config.clone()) {
        Ok(()) => tracing::warn!(worker = id, "Worker stopped serving"),
        Err(ForwarderError::Store(e)) => {
            tracing::error!(worker = id, error = %e, "Could not connect to the correlation store");
            std::process::exit(STORE_FAILURE_EXIT_CODE);
        }
        Err(e) => tracing::error!(worker = id, error = %e, "Worker failed"),
    }
}

fn serve(listener: TcpListener, config: ForwarderConfig) -> Result<(), ForwarderError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        notice_forwarder::run(listener, config).await
    })
}
