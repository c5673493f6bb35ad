//! Quorum predicate.

/// Decides whether `signers` out of `total` parties constitute quorum.
pub trait SupermajorityPolicy: Send + Sync {
    fn has_supermajority(&self, signers: usize, total: usize) -> bool;
}

/// `signers * denominator >= total * numerator`, capped at `total` signers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FractionSupermajority {
    pub numerator: u64,
    pub denominator: u64,
}

impl FractionSupermajority {
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator: denominator.max(1),
        }
    }
}

impl Default for FractionSupermajority {
    fn default() -> Self {
        Self::new(2, 3)
    }
}

impl SupermajorityPolicy for FractionSupermajority {
    fn has_supermajority(&self, signers: usize, total: usize) -> bool {
        if total == 0 || signers > total {
            return false;
        }
        let signers = signers as u128 * self.denominator as u128;
        let required = total as u128 * self.numerator as u128;
        signers >= required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_thirds() {
        let policy = FractionSupermajority::default();
        assert!(!policy.has_supermajority(2, 4));
        assert!(policy.has_supermajority(3, 4));
        assert!(policy.has_supermajority(2, 3));
        assert!(!policy.has_supermajority(1, 3));
        assert!(policy.has_supermajority(1, 1));
    }

    #[test]
    fn test_degenerate_inputs() {
        let policy = FractionSupermajority::default();
        assert!(!policy.has_supermajority(0, 0));
        assert!(!policy.has_supermajority(5, 4));
        assert_eq!(FractionSupermajority::new(1, 0).denominator, 1);
    }
}
