//! Byzantine fault tolerance for DON sizing.
//!
//! DONs assume the classic `n = 3f + 1` model: a DON of `n` members
//! tolerates `f = floor(n / 3)` faulty ones.

/// Fault tolerance of a DON with `members` capability-hosting nodes.
///
/// # Examples
///
/// ```
/// use keystone_topology::fault_tolerance;
///
/// assert_eq!(fault_tolerance(4), 1);
/// assert_eq!(fault_tolerance(7), 2);
/// ```
pub const fn fault_tolerance(members: usize) -> u8 {
    let f = members / 3;
    if f > u8::MAX as usize {
        u8::MAX
    } else {
        f as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_table() {
        let cases = [(1, 0), (2, 0), (3, 1), (4, 1), (6, 2), (7, 2), (10, 3), (31, 10)];
        for (n, f) in cases {
            assert_eq!(fault_tolerance(n), f, "fault_tolerance({}) should be {}", n, f);
        }
    }

    #[test]
    fn tolerance_never_exceeds_third() {
        for n in 0..=64 {
            let f = fault_tolerance(n) as usize;
            assert!(3 * f <= n, "n={} f={}", n, f);
        }
    }

    #[test]
    fn tolerance_saturates() {
        assert_eq!(fault_tolerance(10_000), u8::MAX);
    }
}
