//! Session registry.
//!
//! Maps session IDs to running workers. The lock guards map membership
//! only; no I/O happens while it is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::worker::Worker;
use crate::error::GatewayError;
use crate::session::{SessionId, SessionStatus};
use crate::Result;

/// Result of [`Registry::register`].
pub enum Registration {
    /// A live worker was already registered; nothing was started.
    Existing(Arc<Worker>),
    /// A new worker was registered and its task spawned.
    Started(Arc<Worker>),
}

/// Process-wide table of active workers.
pub struct Registry {
    workers: RwLock<HashMap<SessionId, Arc<Worker>>>,
    max_workers: usize,
    next_generation: AtomicU64,
}

impl Registry {
    pub fn new(max_workers: usize) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            max_workers,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_workers
    }

    pub fn get(&self, id: &SessionId) -> Result<Option<Arc<Worker>>> {
        let workers = self.workers.read().map_err(|_| GatewayError::LockPoisoned)?;
        Ok(workers.get(id).cloned())
    }

    /// IDs of every registered worker, including ones in `Error`.
    pub fn list_active(&self) -> Result<Vec<SessionId>> {
        let workers = self.workers.read().map_err(|_| GatewayError::LockPoisoned)?;
        Ok(workers.keys().cloned().collect())
    }

    /// IDs of workers currently connected.
    pub fn list_connected(&self) -> Result<Vec<SessionId>> {
        let workers = self.workers.read().map_err(|_| GatewayError::LockPoisoned)?;
        Ok(workers
            .iter()
            .filter(|(_, worker)| worker.status() == SessionStatus::Connected)
            .map(|(id, _)| id.clone())
            .collect())
    }

    pub fn count(&self) -> Result<usize> {
        let workers = self.workers.read().map_err(|_| GatewayError::LockPoisoned)?;
        Ok(workers.len())
    }

    /// Register and spawn a worker for `id`.
    ///
    /// A live worker already under `id` is returned untouched. A dead or
    /// failed one is replaced; the new worker stops it before connecting.
    /// Replacement does not count against capacity.
    pub fn register<F>(&self, id: &SessionId, build: F) -> Result<Registration>
    where
        F: FnOnce(u64) -> Arc<Worker>,
    {
        let mut workers = self.workers.write().map_err(|_| GatewayError::LockPoisoned)?;

        let predecessor = match workers.get(id) {
            Some(existing) if existing.is_live() => {
                return Ok(Registration::Existing(Arc::clone(existing)));
            }
            Some(existing) => Some(Arc::clone(existing)),
            None => None,
        };

        if predecessor.is_none() && workers.len() >= self.max_workers {
            return Err(GatewayError::CapacityExceeded {
                max: self.max_workers,
            });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let worker = build(generation);
        // The durable write waits until the predecessor has stopped.
        worker.mark(SessionStatus::Connecting);

        let task = tokio::spawn(Arc::clone(&worker).run(predecessor));
        worker.attach(task);
        workers.insert(id.clone(), Arc::clone(&worker));

        debug!(session_id = %id, generation, "worker registered");
        Ok(Registration::Started(worker))
    }

    /// Remove `id` only if it is still held by `generation`.
    pub fn remove_if_current(&self, id: &SessionId, generation: u64) -> Result<bool> {
        let mut workers = self.workers.write().map_err(|_| GatewayError::LockPoisoned)?;
        match workers.get(id) {
            Some(worker) if worker.generation() == generation => {
                workers.remove(id);
                debug!(session_id = %id, generation, "worker removed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Take every registered worker out of the table.
    pub fn drain(&self) -> Result<Vec<Arc<Worker>>> {
        let mut workers = self.workers.write().map_err(|_| GatewayError::LockPoisoned)?;
        Ok(workers.drain().map(|(_, worker)| worker).collect())
    }
}
