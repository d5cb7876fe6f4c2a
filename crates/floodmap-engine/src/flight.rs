//! Single-flight request collapsing.
//!
//! At most one task computes the value for a given key at a time. The
//! first arrival becomes the leader; later arrivals become followers that
//! suspend until the leader publishes its result and then share the same
//! bytes. A leader's failure (or cancellation mid-compute) is never
//! published: the key is released and the next waiting follower promotes
//! itself to leader and retries.

use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::Notify;

/// Number of lock stripes for the in-flight key map.
const FLIGHT_STRIPES: usize = 8;

struct Flight<V> {
    notify: Notify,
    /// Set exactly once by the leader: `Some(v)` on success, `None` when
    /// the leader failed or was cancelled (followers then retry).
    slot: OnceLock<Option<V>>,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Flight {
            notify: Notify::new(),
            slot: OnceLock::new(),
        }
    }

    async fn wait(&self) -> Option<V> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if let Some(result) = self.slot.get() {
            return result.clone();
        }
        notified.await;
        self.slot.get().cloned().flatten()
    }
}

/// Keyed single-flight coordinator.
pub(crate) struct SingleFlight<K, V> {
    stripes: Vec<Mutex<HashMap<K, Arc<Flight<V>>>>>,
}

enum Role<V> {
    Leader,
    Follower(Arc<Flight<V>>),
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        SingleFlight {
            stripes: (0..FLIGHT_STRIPES).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Run `compute` for `key` under single-flight.
    ///
    /// The closure is invoked only by leaders; followers await the
    /// leader's published value. When a leader fails, its own error is
    /// returned to its own caller, and one follower retries as a fresh
    /// leader — failures are never shared or cached.
    pub(crate) async fn run<F, Fut, E>(&self, key: K, compute: F) -> std::result::Result<V, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        loop {
            let (role, flight) = self.begin(&key);
            match role {
                Role::Leader => {
                    let guard = LeaderGuard {
                        owner: self,
                        key: key.clone(),
                        flight: flight.clone(),
                        published: false,
                    };
                    let result = compute().await;
                    return guard.publish(result);
                }
                Role::Follower(flight) => {
                    if let Some(value) = flight.wait().await {
                        return Ok(value);
                    }
                    // Leader failed or was cancelled; loop and contend for
                    // leadership of a fresh flight.
                }
            }
        }
    }

    fn begin(&self, key: &K) -> (Role<V>, Arc<Flight<V>>) {
        let mut stripe = self.stripe(key);
        if let Some(existing) = stripe.get(key) {
            let flight = existing.clone();
            return (Role::Follower(flight.clone()), flight);
        }
        let flight = Arc::new(Flight::new());
        stripe.insert(key.clone(), flight.clone());
        (Role::Leader, flight)
    }

    fn release(&self, key: &K, flight: &Arc<Flight<V>>) {
        let mut stripe = self.stripe(key);
        // Only remove our own flight; a successor may already be in place.
        if stripe.get(key).is_some_and(|f| Arc::ptr_eq(f, flight)) {
            stripe.remove(key);
        }
    }

    fn stripe(&self, key: &K) -> std::sync::MutexGuard<'_, HashMap<K, Arc<Flight<V>>>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % FLIGHT_STRIPES;
        self.stripes[stripe].lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cleans up leadership on every exit path. If the leader future is
/// dropped at an await point (request cancelled), `Drop` releases the key
/// with an empty slot so waiting followers retry.
struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    owner: &'a SingleFlight<K, V>,
    key: K,
    flight: Arc<Flight<V>>,
    published: bool,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn publish<E>(mut self, result: std::result::Result<V, E>) -> std::result::Result<V, E> {
        let value = match &result {
            Ok(v) => Some(v.clone()),
            Err(_) => None,
        };
        let _ = self.flight.slot.set(value);
        self.owner.release(&self.key, &self.flight);
        self.flight.notify.notify_waiters();
        self.published = true;
        result
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.published {
            self.owner.release(&self.key, &self.flight);
            self.flight.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn followers_share_the_leaders_result() {
        let flight = Arc::new(SingleFlight::<u32, u32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run(7, || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<u32, ()>(42)
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leader_failure_is_not_shared() {
        let flight = Arc::new(SingleFlight::<u32, u32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run(1, || {
                        let calls = calls.clone();
                        async move {
                            let n = calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            // The first leader fails; retries succeed.
                            if n == 0 {
                                Err("boom")
                            } else {
                                Ok(5u32)
                            }
                        }
                    })
                    .await
            }));
        }
        let mut failures = 0;
        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(5) => successes += 1,
                Ok(_) => unreachable!(),
                Err(_) => failures += 1,
            }
        }
        assert_eq!(failures, 1, "exactly the failing leader sees its error");
        assert_eq!(successes, 7);
        // The failing call plus one successful retry.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_keys_run_concurrently() {
        let flight = Arc::new(SingleFlight::<u32, u32>::new());
        let a = flight.run(1, || async { Ok::<u32, ()>(1) });
        let b = flight.run(2, || async { Ok::<u32, ()>(2) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(2));
    }

    #[tokio::test]
    async fn cancelled_leader_releases_the_key() {
        let flight = Arc::new(SingleFlight::<u32, u32>::new());

        let leader = {
            let flight = flight.clone();
            tokio::spawn(async move {
                flight
                    .run(9, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok::<u32, ()>(0)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        let _ = leader.await;

        // A new request must be able to take leadership and complete.
        let value = tokio::time::timeout(
            Duration::from_secs(1),
            flight.run(9, || async { Ok::<u32, ()>(3) }),
        )
        .await
        .expect("key was not released");
        assert_eq!(value, Ok(3));
    }
}
