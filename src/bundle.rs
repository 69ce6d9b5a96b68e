//! Bundles and in-flight transits.

use serde::{Deserialize, Serialize};

/// Unique bundle identifier within a run
pub type BundleId = u64;

/// The unit of data carried through the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,
    /// Index of the originating node
    pub source: usize,
    /// Index of the destination node
    pub destination: usize,
    pub payload_bytes: u32,
    /// Simulated time of creation (seconds)
    pub created_at: u64,
    /// Simulated time after which the bundle is discarded (seconds)
    pub expires_at: u64,
    /// Links traversed so far
    pub hops: u16,
    /// Times the bundle was resent after losing a link mid-flight
    pub retransmissions: u16,
}

impl Bundle {
    pub fn new(
        id: BundleId,
        source: usize,
        destination: usize,
        payload_bytes: u32,
        created_at: u64,
        ttl_secs: u64,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            payload_bytes,
            created_at,
            expires_at: created_at.saturating_add(ttl_secs),
            hops: 0,
            retransmissions: 0,
        }
    }

    /// Whether the bundle's lifetime has ended at `now`
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Seconds since creation
    #[inline]
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

/// A bundle travelling over a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transit {
    pub bundle: Bundle,
    /// Link index in the topology
    pub link: usize,
    /// Sending node (keeps custody until arrival)
    pub from: usize,
    /// Receiving node
    pub to: usize,
    pub departed_at: u64,
    pub arrives_at: u64,
}

impl Transit {
    /// Fraction of the hop completed at `now`, in [0, 1]
    pub fn progress(&self, now: u64) -> f32 {
        let total = self.arrives_at.saturating_sub(self.departed_at);
        if total == 0 {
            return 1.0;
        }
        let done = now.saturating_sub(self.departed_at).min(total);
        done as f32 / total as f32
    }
}

/// Number of whole steps needed to cross a link with the given delay.
///
/// Every hop takes at least one step.
pub fn transit_steps(delay_secs: f64, step_secs: u64) -> u64 {
    let steps = (delay_secs / step_secs as f64).ceil();
    if steps.is_finite() && steps > 1.0 {
        steps as u64
    } else {
        1
    }
}

/// Time a bundle leaving at `departed_at` reaches the far end of a link.
/// Saturates instead of wrapping for absurdly long delays.
pub fn arrival_time(departed_at: u64, delay_secs: f64, step_secs: u64) -> u64 {
    departed_at.saturating_add(transit_steps(delay_secs, step_secs).saturating_mul(step_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_expiry() {
        let bundle = Bundle::new(1, 0, 7, 1024, 120, 3600);
        assert_eq!(bundle.expires_at, 3720);
        assert!(!bundle.is_expired(3719));
        assert!(bundle.is_expired(3720));
        assert_eq!(bundle.age(180), 60);
    }

    #[test]
    fn test_transit_progress() {
        let transit = Transit {
            bundle: Bundle::new(1, 0, 1, 10, 0, 100),
            link: 0,
            from: 0,
            to: 1,
            departed_at: 60,
            arrives_at: 180,
        };
        assert_eq!(transit.progress(60), 0.0);
        assert_eq!(transit.progress(120), 0.5);
        assert_eq!(transit.progress(500), 1.0);
    }

    #[test]
    fn test_transit_steps() {
        assert_eq!(transit_steps(0.05, 60), 1);
        assert_eq!(transit_steps(60.0, 60), 1);
        assert_eq!(transit_steps(61.0, 60), 2);
        assert_eq!(transit_steps(750.0, 60), 13);
    }

    #[test]
    fn test_arrival_time_saturates() {
        assert_eq!(arrival_time(600, 750.0, 60), 600 + 13 * 60);
        assert_eq!(arrival_time(600, 1e300, 60), u64::MAX);
        assert_eq!(arrival_time(u64::MAX - 10, 30.0, 60), u64::MAX);
    }
}
