//! Test helpers shared by the pipeline tests

use crate::core::ConnectionSite;
use std::time::Duration;

/// Poll step for [`wait_until`]
const POLL_STEP: Duration = Duration::from_millis(10);

/// Upper bound on polls; covers several read timeouts under paused time
const MAX_POLLS: u32 = 100_000;

/// Site on the memory broker's `flows` topic
pub fn test_site(reset_enabled: bool) -> ConnectionSite {
    ConnectionSite::new("memory", "flows", "tests").with_reset(reset_enabled)
}

/// Sleep in small steps until `condition` holds
///
/// Panics if it does not hold within `MAX_POLLS` steps.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..MAX_POLLS {
        if condition() {
            return;
        }
        tokio::time::sleep(POLL_STEP).await;
    }
    panic!("condition not reached after {} polls", MAX_POLLS);
}
