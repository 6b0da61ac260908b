//! Single-flight: collapse concurrent identical work into one execution.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

type Flights<T> = DashMap<String, Flight<T>>;

struct Flight<T> {
    id: u64,
    /// `None` if the task panicked or was cancelled by runtime shutdown.
    output: Shared<BoxFuture<'static, Option<T>>>,
}

/// In-flight map keyed by operation name.
///
/// The first caller for a key spawns the work on its own task; callers
/// arriving while it runs await the same shared output. The task removes
/// its own entry when it finishes, so the next call starts fresh even if
/// every waiter went away mid-flight.
pub struct SingleFlight<T: Clone> {
    flights: Arc<Flights<T>>,
    next_id: AtomicU64,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `make()` unless a flight for `key` is already running, and
    /// return the (shared) result.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let output = match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().output.clone(),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let landing = Landing {
                    flights: Arc::clone(&self.flights),
                    key: key.to_string(),
                    id,
                };
                let work = make();
                // The shard stays locked until the insert below, so the task
                // cannot deregister before it is registered.
                let task = tokio::spawn(async move {
                    let _landing = landing;
                    work.await
                });
                let output = task.map(Result::ok).boxed().shared();
                entry.insert(Flight {
                    id,
                    output: output.clone(),
                });
                output
            }
        };

        output.await
    }

    /// Whether a flight for `key` is currently registered.
    pub fn is_running(&self, key: &str) -> bool {
        self.flights.contains_key(key)
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Drops the flight's entry when its task ends, panics included.
struct Landing<T> {
    flights: Arc<Flights<T>>,
    key: String,
    id: u64,
}

impl<T> Drop for Landing<T> {
    fn drop(&mut self) {
        // A newer flight may already hold the key.
        self.flights
            .remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}
