// Booking contract ABI
//
// The deployed TutorSessions contract keeps an append-only array of sessions.
// Only the functions and events below are used; everything else about the
// contract is opaque to this crate.

use alloy_primitives::U256;
use alloy_sol_types::sol;

use crate::error::{BookingError, Result};

sol! {
    interface ITutorSessions {
        event SessionBooked(
            uint256 indexed sessionId,
            string tutorName,
            string studentName,
            uint256 time,
            uint256 price
        );

        event SessionCompleted(uint256 indexed sessionId);

        function bookSession(
            string tutorName,
            string studentName,
            uint256 time,
            uint256 price
        ) external returns (uint256 sessionId);

        function completeSession(uint256 sessionId) external;

        function sessionCount() external view returns (uint256);

        function sessions(uint256 index) external view returns (
            string tutor,
            string student,
            uint256 time,
            uint256 price,
            bool completed
        );
    }
}

/// Narrow a contract integer to u64
pub(crate) fn to_u64(value: U256, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| BookingError::Abi(format!("{} out of range: {}", what, value)))
}
