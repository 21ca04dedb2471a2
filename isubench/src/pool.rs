//! Bounded supply of fresh Sessions.
//!
//! A single producer task keeps up to `capacity` ready Sessions queued.
//! Every Session handed out holds one permit of a `capacity` sized
//! semaphore until its lease is dropped, so queued plus checked out Sessions
//! never exceed `capacity`.
use crate::context::BenchContext;
use crate::error::SessionError;
use crate::session::Session;
use async_channel::{bounded, Receiver};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

/// A Session checked out of the pool. Dropping it frees its slot.
#[derive(Debug)]
pub struct LeasedSession {
    session: Session,
    _permit: OwnedSemaphorePermit,
    in_use: Option<Arc<InUse>>,
}

impl LeasedSession {
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Deref for LeasedSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for LeasedSession {
    fn drop(&mut self) {
        if let Some(in_use) = &self.in_use {
            in_use.current.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[derive(Debug, Default)]
struct InUse {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InUse {
    fn checkout(&self) {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
    }
}

pub struct SessionPool {
    rx: Receiver<LeasedSession>,
    acquire: Mutex<()>,
    in_use: Arc<InUse>,
    producer: Mutex<Option<JoinHandle<Result<(), SessionError>>>>,
    capacity: usize,
}

impl SessionPool {
    /// Starts the producer. It stops filling the queue once `cancel` fires.
    pub fn spawn(ctx: Arc<BenchContext>, capacity: usize, cancel: CancellationToken) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let permits = Arc::new(Semaphore::new(capacity));

        let producer = tokio::spawn(
            async move {
                loop {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        permit = permits.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    let lease = LeasedSession {
                        session: Session::new(ctx.clone())?,
                        _permit: permit,
                        in_use: None,
                    };

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = tx.send(lease) => if sent.is_err() {
                            break;
                        },
                    }
                }
                debug!("Session producer stopped");
                Ok::<(), SessionError>(())
            }
            .in_current_span(),
        );

        Self {
            rx,
            acquire: Mutex::new(()),
            in_use: Arc::new(InUse::default()),
            producer: Mutex::new(Some(producer)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for a ready Session. `None` once the pool is closed and drained.
    pub async fn acquire(&self) -> Option<LeasedSession> {
        let _guard = self.acquire.lock().await;
        self.recv().await
    }

    /// Waits for `n` Sessions at once.
    ///
    /// Multi-session requests are served one at a time so two callers can
    /// never each hold part of the pool while waiting for the rest.
    pub async fn acquire_many(&self, n: usize) -> Option<Vec<LeasedSession>> {
        let _guard = self.acquire.lock().await;
        let mut leases = Vec::with_capacity(n);
        for _ in 0..n {
            leases.push(self.recv().await?);
        }
        Some(leases)
    }

    async fn recv(&self) -> Option<LeasedSession> {
        let mut lease = self.rx.recv().await.ok()?;
        self.in_use.checkout();
        lease.in_use = Some(self.in_use.clone());
        Some(lease)
    }

    /// Sessions currently checked out.
    pub fn in_use(&self) -> usize {
        self.in_use.current.load(Ordering::Acquire)
    }

    /// Highest number of Sessions ever checked out at the same time.
    pub fn peak_in_use(&self) -> usize {
        self.in_use.peak.load(Ordering::Acquire)
    }

    /// Waits for the producer to acknowledge cancellation, then closes the
    /// queue. Sessions still queued are dropped.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let producer = self.producer.lock().await.take();
        let result = match producer {
            Some(handle) => producer_outcome(handle.await),
            None => Ok(()),
        };
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        result
    }
}

fn producer_outcome(
    joined: Result<Result<(), SessionError>, JoinError>,
) -> Result<(), SessionError> {
    match joined {
        Ok(result) => result,
        Err(err) => {
            error!("Session producer panicked: {err}");
            Err(SessionError::Producer(err.to_string()))
        }
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("capacity", &self.capacity)
            .field("queued", &self.rx.len())
            .field("in_use", &self.in_use())
            .finish()
    }
}
