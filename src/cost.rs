//! Link and path cost arithmetic.
//!
//! Costs are small non-negative integers. [`INFINITE_COST`] doubles as the
//! "unreachable" marker, so every addition saturates at it: a path through
//! an unreachable hop is itself unreachable.

/// Sentinel cost meaning "no known path".
pub const INFINITE_COST: u32 = 999;

/// `a + b`, clamped to [`INFINITE_COST`].
#[inline]
pub fn add(a: u32, b: u32) -> u32 {
    a.saturating_add(b).min(INFINITE_COST)
}

#[inline]
pub fn is_reachable(cost: u32) -> bool {
    cost < INFINITE_COST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_saturates_at_infinity() {
        assert_eq!(add(1, 2), 3);
        assert_eq!(add(INFINITE_COST, 1), INFINITE_COST);
        assert_eq!(add(500, 600), INFINITE_COST);
        assert_eq!(add(u32::MAX, u32::MAX), INFINITE_COST);
    }

    #[test]
    fn infinity_is_unreachable() {
        assert!(is_reachable(0));
        assert!(is_reachable(INFINITE_COST - 1));
        assert!(!is_reachable(INFINITE_COST));
    }
}
