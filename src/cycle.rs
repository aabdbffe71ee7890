/// Value of the last-seen cycle id at cold start.
///
/// Arbitrary non-zero sentinel, distinct from the first cycle id actually
/// transmitted (the sentinel plus one), so the very first genuine inbound
/// frame can never collide with it.
pub(crate) const CYCLE_SEED: u8 = 99;

/// 8-bit wrapping sequence tag for request/response exchanges.
///
/// One instance exists per controller; it is the sole duplicate/echo
/// suppression mechanism. It never resets except at controller cold start.
pub struct CycleSequencer {
    last_seen_cycle: u8,
}

impl CycleSequencer {
    pub const fn new() -> Self {
        CycleSequencer {
            last_seen_cycle: CYCLE_SEED,
        }
    }

    /// Allocate the cycle id for the next outbound request.
    ///
    /// The new id is also adopted as the last-seen value, so a relayed copy of
    /// the controller's own request is rejected as a duplicate instead of
    /// being processed as fresh inbound traffic. Cycling is cheap enough to
    /// keep on even in networks without relays.
    pub fn next_outbound_cycle(&mut self) -> u8 {
        self.last_seen_cycle = self.last_seen_cycle.wrapping_add(1);
        self.last_seen_cycle
    }

    /// Accept `candidate` only if it differs from the last-seen cycle id,
    /// adopting it on acceptance.
    ///
    /// This deliberately detects "same as immediately previous" and nothing
    /// more: a matching id showing up again after an intervening exchange
    /// passes. It is not a replay window.
    pub fn accept_if_new(&mut self, candidate: u8) -> bool {
        if candidate == self.last_seen_cycle {
            return false;
        }
        self.last_seen_cycle = candidate;
        true
    }
}
