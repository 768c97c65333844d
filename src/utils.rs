use alloy::{consensus::constants::GWEI_TO_WEI, primitives::U256};

/// Converts a wei amount to gwei for gauge reporting.
pub fn wei_to_gwei(wei: u128) -> f64 {
    wei as f64 / GWEI_TO_WEI as f64
}

/// Converts a U256 to an f64 for gauge reporting. Values above `u128::MAX`
/// saturate.
pub fn u256_to_f64(value: U256) -> f64 {
    value.saturating_to::<u128>() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wei_to_gwei() {
        assert_eq!(wei_to_gwei(0), 0.0);
        assert_eq!(wei_to_gwei(1_500_000_000), 1.5);
        assert_eq!(wei_to_gwei(30 * GWEI_TO_WEI as u128), 30.0);
    }

    #[test]
    fn test_u256_to_f64_saturates() {
        assert_eq!(u256_to_f64(U256::from(42)), 42.0);
        assert_eq!(u256_to_f64(U256::MAX), u128::MAX as f64);
    }
}
