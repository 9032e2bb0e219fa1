//! ============================================================================
//! Store Types - Versioned records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::types::PendingPaymentIntent;

/// Current layout of every persisted record
pub const RECORD_VERSION: u32 = 1;

/// Authenticated user profile.
/// Optional fields are explicit; nothing is merged in ad hoc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub version: u32,
    pub email: String,
    pub name: Option<String>,
    /// Last wallet the user connected with
    pub wallet_address: Option<String>,
    pub enrolled_course_ids: Vec<String>,
}

impl UserRecord {
    pub fn new(email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            version: RECORD_VERSION,
            email: email.into(),
            name,
            wallet_address: None,
            enrolled_course_ids: Vec::new(),
        }
    }
}

/// One course the user has paid for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrolledCourse {
    pub id: String,
    pub title: String,
    /// RFC 3339
    pub enrolled_date: String,
    /// 0..=100
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct EnrolledCoursesRecord {
    pub version: u32,
    pub courses: Vec<EnrolledCourse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct PendingPaymentRecord {
    pub version: u32,
    pub intent: PendingPaymentIntent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct WalletRecord {
    pub version: u32,
    pub address: String,
}
