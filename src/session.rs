use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::grid::{GridConnector, GridSession};

/// Identity of the worker a session belongs to. Assigned by the task
/// executors rather than taken from ambient thread identity, so a checkout
/// survives whatever thread a task happens to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u64);

/// Proof of one successful `acquire`. Not cloneable; the only way to give it
/// back is `release`, so checkouts and releases pair up by construction.
#[derive(Debug)]
pub struct SessionTicket {
    worker: WorkerId,
}

impl SessionTicket {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }
}

struct SessionSlot {
    session: Arc<Mutex<Box<dyn GridSession>>>,
    checkouts: u32,
}

/// Keeps at most one live grid session per worker, reference counted. The
/// session opens on the first checkout and closes when the last checkout on
/// that worker is released. One session is never handed to two workers.
pub struct SessionPool {
    connector: Arc<dyn GridConnector>,
    slots: Mutex<HashMap<WorkerId, SessionSlot>>,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn GridConnector>) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Opens (or re-enters) the calling worker's session. Nested acquires on
    /// the same worker increment the checkout count and reuse the session.
    pub fn acquire(&self, worker: WorkerId) -> Result<SessionTicket, AppError> {
        let mut slots = self.slots.lock().expect("session map poisoned");
        if let Some(slot) = slots.get_mut(&worker) {
            slot.checkouts += 1;
            log::trace!(
                "Worker {:?} re-entered its session ({} checkouts).",
                worker,
                slot.checkouts
            );
            return Ok(SessionTicket { worker });
        }

        let session = self.connector.connect()?;
        slots.insert(
            worker,
            SessionSlot {
                session: Arc::new(Mutex::new(session)),
                checkouts: 1,
            },
        );
        log::debug!("Opened grid session for worker {:?}.", worker);
        Ok(SessionTicket { worker })
    }

    /// Gives back one checkout. At zero the underlying session is closed and
    /// forgotten. A release with no matching slot is a bookkeeping bug: it is
    /// logged and ignored rather than closing another worker's session.
    pub fn release(&self, ticket: SessionTicket) {
        let mut slots = self.slots.lock().expect("session map poisoned");
        let worker = ticket.worker;
        let last_checkout = match slots.get_mut(&worker) {
            Some(slot) if slot.checkouts > 1 => {
                slot.checkouts -= 1;
                log::trace!(
                    "Worker {:?} released a checkout ({} remain).",
                    worker,
                    slot.checkouts
                );
                false
            }
            Some(_) => true,
            None => {
                log::warn!(
                    "Unmatched session release for worker {:?}; ignoring.",
                    worker
                );
                false
            }
        };

        if last_checkout {
            if let Some(slot) = slots.remove(&worker) {
                drop(slots);
                log::debug!("Closing grid session for worker {:?}.", worker);
                let mut session = slot.session.lock().expect("session poisoned");
                if let Err(e) = session.close() {
                    log::warn!("Error closing grid session for {:?}: {}", worker, e);
                }
            }
        }
    }

    /// Runs `f` against the ticket holder's session. The per-session lock is
    /// uncontended in correct use since only the owning worker holds tickets.
    pub fn with_session<R>(
        &self,
        ticket: &SessionTicket,
        f: impl FnOnce(&mut dyn GridSession) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let session = {
            let slots = self.slots.lock().expect("session map poisoned");
            let slot = slots.get(&ticket.worker).ok_or_else(|| {
                AppError::Grid(format!("no open session for worker {:?}", ticket.worker))
            })?;
            Arc::clone(&slot.session)
        };
        let mut session = session.lock().expect("session poisoned");
        f(session.as_mut())
    }

    /// Number of workers currently holding an open session.
    pub fn open_sessions(&self) -> usize {
        self.slots.lock().expect("session map poisoned").len()
    }
}
