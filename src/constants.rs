//! Constants used by the load tester.

use std::time::Duration;

/// A sender used more recently than this is held back until the window has
/// passed.
pub const COLLISION_WINDOW: Duration = Duration::from_millis(100);
/// Fixed pause between two submissions of the same round.
pub const INTER_SUBMISSION_DELAY: Duration = Duration::from_millis(10);
/// Upper bound on how long a confirmation tracker waits for a receipt.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout applied to a single connectivity probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Number of connectivity probes attempted at startup.
pub const STARTUP_ATTEMPTS: usize = 30;
/// Delay between two startup connectivity probes.
pub const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Time given to in-flight trackers after a cancelled run before they are
/// abandoned.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Gas limit for funding transfers.
pub const FUNDING_GAS_LIMIT: u64 = 21_000;
/// The smallest pool for which a distinct sender/receiver pair exists.
pub const MIN_POOL_SIZE: usize = 2;
