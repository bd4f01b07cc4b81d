//! # Task module
//!
//! This module provides a registry of background reconciliation loops, keyed
//! by the identity of the resource type they watch, so a loop is started at
//! most once per type and every loop can be cancelled on shutdown.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::task::JoinHandle;

// -----------------------------------------------------------------------------
// Registry structure

#[derive(Clone, Default, Debug)]
pub struct Registry {
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// spawn the given future on the tokio runtime and keep its handle under
    /// the given key, returns false without spawning when a task is already
    /// registered for that key
    pub fn spawn<F>(&self, key: &str, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(key) {
            return false;
        }

        tasks.insert(key.to_string(), tokio::spawn(future));
        true
    }

    /// returns whether a task is registered under the given key
    pub fn contains(&self, key: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// returns the number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    /// abort every registered task and drain the registry
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::future::pending;

    use super::Registry;

    #[tokio::test]
    async fn spawn_registers_a_task_once_per_key() {
        let registry = Registry::new();

        assert!(registry.spawn("dbsmalls.servicebrokers.cloud", pending()));
        assert!(!registry.spawn("dbsmalls.servicebrokers.cloud", pending()));
        assert!(registry.spawn("dblarges.servicebrokers.cloud", pending()));

        assert_eq!(2, registry.len());
        assert!(registry.contains("dbsmalls.servicebrokers.cloud"));
        assert!(!registry.contains("cachesmalls.servicebrokers.cloud"));

        registry.shutdown();
    }

    #[tokio::test]
    async fn shutdown_aborts_and_drains_every_task() {
        let registry = Registry::new();

        registry.spawn("a", pending());
        registry.spawn("b", pending());
        assert_eq!(2, registry.len());

        registry.shutdown();
        assert!(registry.is_empty());

        // a key can be reused once the registry has been drained
        assert!(registry.spawn("a", pending()));
        registry.shutdown();
    }
}
