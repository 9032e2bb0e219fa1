//! ============================================================================
//! Units - Hundredths encoding and display formatting
//! ============================================================================
//! The booking contract stores prices and durations as integers scaled by
//! 100. These helpers are the only place that encoding is defined:
//!
//! - price:    50.75 <-> 5075
//! - duration: 1 unit = 0.6 minutes, so 100 = 1 hour, "1h 30m" <-> 150
//! ============================================================================

use alloy_primitives::U256;

/// Minutes represented by one duration unit
pub const MINUTES_PER_UNIT: f64 = 0.6;

/// Gas used by a `bookSession` call with short names, rounded up
pub const BOOKING_GAS_UNITS: u64 = 180_000;

/// Fallback gas price when the wallet cannot quote one (20 gwei)
pub const DEFAULT_GAS_PRICE_WEI: u128 = 20_000_000_000;

const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

/// Display price -> contract hundredths, rounded to nearest
pub fn price_to_hundredths(price: f64) -> u64 {
    if !price.is_finite() || price <= 0.0 {
        return 0;
    }
    (price * 100.0).round() as u64
}

/// Contract hundredths -> "50.75"
pub fn format_price(price_in_hundredths: u64) -> String {
    format!("{}.{:02}", price_in_hundredths / 100, price_in_hundredths % 100)
}

/// "1h 30m" / "45m" / "2h" -> contract duration units.
/// Oversized values saturate at `u64::MAX`.
pub fn time_to_hundredths(time: &str) -> u64 {
    let mut hours: Option<u64> = None;
    let mut minutes: Option<u64> = None;
    let mut digits = String::new();

    for c in time.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if !digits.is_empty() {
            // only digits were pushed, so the sole failure is overflow
            let value = digits.parse::<u64>().unwrap_or(u64::MAX);
            match c {
                'h' if hours.is_none() => hours = Some(value),
                'm' if minutes.is_none() => minutes = Some(value),
                _ => {}
            }
            digits.clear();
        }
    }

    let minutes_units = (minutes.unwrap_or(0) as f64 / MINUTES_PER_UNIT).round() as u64;
    hours
        .unwrap_or(0)
        .saturating_mul(100)
        .saturating_add(minutes_units)
}

/// Contract duration units -> "1h 30m" / "27m"
pub fn format_time(time_in_hundredths: u64) -> String {
    let hours = time_in_hundredths / 100;
    let minutes = ((time_in_hundredths % 100) as f64 * MINUTES_PER_UNIT).round() as u64;

    match (hours, minutes) {
        (0, m) => format!("{}m", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h {}m", h, m),
    }
}

/// "0x1234...abcd"
pub fn format_address(address: &str) -> String {
    if address.len() <= 10 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Wei balance -> "1.2345 ETH", rounded to 4 decimals
pub fn format_balance(wei: U256, symbol: &str) -> String {
    let step = U256::from(100_000_000_000_000u64); // 1e14 wei = 0.0001
    let units = (wei + step / U256::from(2u8)) / step;
    let whole = units / U256::from(10_000u64);
    let frac = units % U256::from(10_000u64);
    format!("{}.{:04} {}", whole, frac.to::<u64>(), symbol)
}

/// Estimated fee for one booking transaction, in native units
pub fn estimate_gas_fee(gas_price_wei: u128) -> String {
    let fee_wei = gas_price_wei.saturating_mul(BOOKING_GAS_UNITS as u128);
    let micro = (fee_wei + WEI_PER_ETH / 2_000_000) / (WEI_PER_ETH / 1_000_000);
    format!("{}.{:06}", micro / 1_000_000, micro % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_round_trip() {
        for price in [0.01, 0.1, 1.0, 50.75, 59.99, 79.99, 299.0, 1234.56] {
            let encoded = price_to_hundredths(price);
            assert_eq!(format_price(encoded), format!("{:.2}", price));
        }
        assert_eq!(price_to_hundredths(50.75), 5075);
    }

    #[test]
    fn test_price_rounds_to_nearest() {
        assert_eq!(price_to_hundredths(0.125), 13);
        assert_eq!(price_to_hundredths(19.994), 1999);
        assert_eq!(price_to_hundredths(-3.0), 0);
    }

    #[test]
    fn test_time_encoding() {
        assert_eq!(time_to_hundredths("1h 30m"), 150);
        assert_eq!(time_to_hundredths("45m"), 75);
        assert_eq!(time_to_hundredths("2h"), 200);
        assert_eq!(time_to_hundredths(""), 0);
    }

    #[test]
    fn test_time_encoding_saturates() {
        assert_eq!(time_to_hundredths("999999999999999999h"), u64::MAX);
        assert_eq!(time_to_hundredths("100000000000000000000m"), u64::MAX);
        assert_eq!(time_to_hundredths("99999999999999999999999h 30m"), u64::MAX);
    }

    #[test]
    fn test_time_formatting() {
        assert_eq!(format_time(150), "1h 30m");
        assert_eq!(format_time(45), "27m");
        assert_eq!(format_time(100), "1h");
        assert_eq!(format_time(0), "0m");
    }

    #[test]
    fn test_format_address() {
        assert_eq!(
            format_address("0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            "0x5FbD...0aa3"
        );
        assert_eq!(format_address("0x12"), "0x12");
    }

    #[test]
    fn test_format_balance() {
        let one_and_a_bit = U256::from(1_234_560_000_000_000_000u128);
        assert_eq!(format_balance(one_and_a_bit, "ETH"), "1.2346 ETH");
        assert_eq!(format_balance(U256::ZERO, "ETH"), "0.0000 ETH");
    }

    #[test]
    fn test_gas_estimate() {
        // 180k gas at 20 gwei = 0.0036 ETH
        assert_eq!(estimate_gas_fee(DEFAULT_GAS_PRICE_WEI), "0.003600");
    }
}
