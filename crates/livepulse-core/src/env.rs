//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from system resources (time, randomness). Tests
//! drive the state machines with a virtual clock and seeded ids; production
//! uses [`SystemEnv`].

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// Implementations MUST guarantee that `now()` never goes backwards within a
/// single execution context.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; test environments
    /// may use any monotonic stand-in.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time, epoch milliseconds. Stamps envelopes.
    fn unix_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this; protocol logic never blocks.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u128`, for envelope and connection ids.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }

    /// Fresh unique envelope id in hex form.
    fn envelope_id(&self) -> String {
        format!("{:032x}", self.random_u128())
    }
}

/// Production environment backed by the tokio clock and the thread-local RNG.
///
/// Uses `tokio::time::Instant` so drivers under `tokio::test(start_paused)`
/// observe virtual time consistently across `now()` and `sleep()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(buffer);
    }
}

pub mod test_utils {
    //! Deterministic environment for tests.

    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use super::Environment;

    /// Environment with a manually advanced clock and a counter RNG.
    ///
    /// `now()` starts at construction time and only moves when
    /// [`MockEnv::advance`] is called, so timer-driven behavior is fully
    /// scripted. Ids come from an incrementing counter, so the first
    /// envelope id is predictable.
    #[derive(Clone)]
    pub struct MockEnv {
        inner: Arc<Mutex<MockState>>,
    }

    struct MockState {
        epoch: Instant,
        offset: Duration,
        millis: u64,
        counter: u64,
    }

    impl MockEnv {
        /// Create an environment anchored at the current instant.
        #[must_use]
        pub fn new() -> Self {
            Self {
                inner: Arc::new(Mutex::new(MockState {
                    epoch: Instant::now(),
                    offset: Duration::ZERO,
                    millis: 1_700_000_000_000,
                    counter: 0,
                })),
            }
        }

        /// Move the virtual clock forward.
        pub fn advance(&self, by: Duration) {
            if let Ok(mut state) = self.inner.lock() {
                state.offset += by;
                state.millis += by.as_millis() as u64;
            }
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.inner.lock().map_or_else(|_| Instant::now(), |s| s.epoch + s.offset)
        }

        fn unix_millis(&self) -> u64 {
            self.inner.lock().map_or(0, |mut s| {
                // Strictly increasing so envelope timestamps never collide.
                s.millis += 1;
                s.millis
            })
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let seed = self.inner.lock().map_or(0, |mut s| {
                s.counter += 1;
                s.counter
            });
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = (seed as u8).wrapping_add(i as u8);
            }
        }
    }
}
