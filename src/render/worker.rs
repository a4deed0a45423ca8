//! Render worker - one background thread, at most one render in flight

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};

use super::entry::lock_buffers;
use super::generation::GenerationGuard;
use super::request::{RenderCompletion, RenderOutcome, RenderRequest, RenderTicket};
use super::transform::{TransformError, transform};

/// Binary permit: taken by the control thread before dispatch, given back by
/// the worker when a render ends, however it ends.
#[derive(Debug)]
pub struct CompletionPermit {
    available: Mutex<bool>,
    released: Condvar,
}

impl Default for CompletionPermit {
    fn default() -> Self {
        Self {
            available: Mutex::new(true),
            released: Condvar::new(),
        }
    }
}

impl CompletionPermit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the permit if nobody holds it
    pub fn try_acquire(&self) -> bool {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *available, false)
    }

    pub fn release(&self) {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.released.notify_all();
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the permit is free, leaving it free
    pub fn wait_idle(&self) {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while !*available {
            available = self
                .released
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Gives the permit back when dropped, also during unwinding
struct PermitRelease<'a>(&'a CompletionPermit);

impl Drop for PermitRelease<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[derive(Debug, thiserror::Error)]
#[error("render worker has stopped")]
pub struct WorkerGone;

/// Handle to the render thread
pub struct RenderWorker {
    requests: Sender<RenderRequest>,
    completions: Receiver<RenderCompletion>,
    permit: Arc<CompletionPermit>,
    abort: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Start the worker thread. Results are only written back while
    /// `generation` still matches the ticket.
    pub fn spawn(generation: GenerationGuard) -> std::io::Result<Self> {
        let (request_tx, request_rx) = flume::unbounded();
        let (completion_tx, completion_rx) = flume::unbounded();
        let permit = Arc::new(CompletionPermit::new());
        let abort = Arc::new(AtomicBool::new(false));

        let handle = {
            let permit = Arc::clone(&permit);
            let abort = Arc::clone(&abort);
            std::thread::Builder::new()
                .name("render".to_string())
                .spawn(move || {
                    render_worker(&request_rx, &completion_tx, &permit, &abort, &generation);
                })?
        };

        Ok(Self {
            requests: request_tx,
            completions: completion_rx,
            permit,
            abort,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn permit(&self) -> &CompletionPermit {
        &self.permit
    }

    /// Hand a ticket to the worker. The caller must hold the permit; it is
    /// given back here if the worker is gone.
    pub fn submit(&self, ticket: RenderTicket) -> Result<(), WorkerGone> {
        self.requests
            .send(RenderRequest::Render(Box::new(ticket)))
            .map_err(|_| {
                self.permit.release();
                WorkerGone
            })
    }

    #[must_use]
    pub fn try_recv(&self) -> Option<RenderCompletion> {
        self.completions.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<RenderCompletion, RecvTimeoutError> {
        self.completions.recv_timeout(timeout)
    }

    /// Wait for the render in flight, if any, to finish
    pub fn wait_idle(&self) {
        self.permit.wait_idle();
    }

    /// Stop the current render early and join the thread
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.abort.store(true, Ordering::Relaxed);
        let _ = self.requests.send(RenderRequest::Shutdown);
        if handle.join().is_err() {
            log::error!("Render worker panicked during shutdown");
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_worker(
    requests: &Receiver<RenderRequest>,
    completions: &Sender<RenderCompletion>,
    permit: &CompletionPermit,
    abort: &AtomicBool,
    generation: &GenerationGuard,
) {
    for request in requests {
        match request {
            RenderRequest::Render(ticket) => {
                let release = PermitRelease(permit);
                let outcome = render_ticket(&ticket, abort, generation);
                drop(release);

                let completion = RenderCompletion {
                    index: ticket.index,
                    generation: ticket.generation,
                    outcome,
                };
                if completions.send(completion).is_err() {
                    break;
                }
            }

            RenderRequest::Shutdown => break,
        }
    }
}

fn render_ticket(
    ticket: &RenderTicket,
    abort: &AtomicBool,
    generation: &GenerationGuard,
) -> RenderOutcome {
    if !generation.is_current(ticket.generation) {
        return RenderOutcome::Stale;
    }

    let source = ticket.record.render_source();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        transform(&source, &ticket.tweaks, ticket.target, abort)
    }));

    match result {
        Ok(Ok(output)) => {
            let mut buffers = lock_buffers(&ticket.record.buffers);
            if !generation.is_current(ticket.generation) {
                return RenderOutcome::Stale;
            }
            buffers.store(output);
            RenderOutcome::Rendered
        }
        Ok(Err(TransformError::Aborted)) => RenderOutcome::Aborted,
        Ok(Err(e)) => {
            log::warn!("Render of entry {} failed: {e}", ticket.index);
            RenderOutcome::Failed(e.to_string())
        }
        Err(_) => {
            log::error!("Render of entry {} panicked", ticket.index);
            RenderOutcome::Failed("render panicked".to_string())
        }
    }
}
