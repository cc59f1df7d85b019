//! The async seam to a remote data service.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use daybook_foundation::{Error, Result};

/// A remote data service reachable by resource path.
///
/// This is the only surface the rest of the crate knows about a server:
/// a name and a string body per GET. HTTP specifics, retries, and
/// authentication belong to implementations.
#[async_trait]
pub trait DataServiceApi: Send + Sync {
    /// A stable name identifying the service, used to key cached metadata.
    fn service_name(&self) -> &str;

    /// Fetches the body served at `resource_path`.
    ///
    /// # Errors
    ///
    /// Returns a service error when the resource cannot be produced.
    async fn get(&self, resource_path: &str) -> Result<String>;
}

pub(crate) fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`DataServiceApi`] serving staged responses, consumed in order.
///
/// Each `get` pops the next staged body for its path and records the
/// call, so tests can assert how often a resource was hit. A path with
/// nothing staged produces a service error.
#[derive(Debug, Default)]
pub struct InMemoryDataService {
    name: String,
    responses: Mutex<HashMap<String, VecDeque<std::result::Result<String, String>>>>,
    calls: Mutex<Vec<String>>,
}

impl InMemoryDataService {
    /// Creates a service with the given name and nothing staged.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stages a successful response body for a resource path.
    pub fn stage(&self, resource_path: impl Into<String>, body: impl Into<String>) {
        relock(&self.responses)
            .entry(resource_path.into())
            .or_default()
            .push_back(Ok(body.into()));
    }

    /// Stages a failure for a resource path.
    pub fn stage_error(&self, resource_path: impl Into<String>, message: impl Into<String>) {
        relock(&self.responses)
            .entry(resource_path.into())
            .or_default()
            .push_back(Err(message.into()));
    }

    /// Every resource path requested so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        relock(&self.calls).clone()
    }

    /// How many times a resource path has been requested.
    #[must_use]
    pub fn call_count(&self, resource_path: &str) -> usize {
        relock(&self.calls)
            .iter()
            .filter(|p| p.as_str() == resource_path)
            .count()
    }
}

#[async_trait]
impl DataServiceApi for InMemoryDataService {
    fn service_name(&self) -> &str {
        &self.name
    }

    async fn get(&self, resource_path: &str) -> Result<String> {
        relock(&self.calls).push(resource_path.to_string());
        let staged = relock(&self.responses)
            .get_mut(resource_path)
            .and_then(VecDeque::pop_front);
        match staged {
            Some(Ok(body)) => Ok(body),
            Some(Err(message)) => Err(Error::service(message)),
            None => Err(Error::service(format!(
                "nothing staged for '{resource_path}'"
            ))),
        }
    }
}
