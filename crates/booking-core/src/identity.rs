//! ============================================================================
//! Identity - Who the student is, on-chain and off
//! ============================================================================
//! Bookings record the student as a string. Free-text names drift, so a
//! canonical id derived from the profile email is written at booking time:
//!
//!   uid:<hex(sha256(lowercase(trim(email)))[..16])>
//!
//! Without a profile, the lowercased wallet address is used. When listing
//! sessions, every alias the user is known by matches (case-insensitive),
//! so sessions booked under a name or email still show up.
//! ============================================================================

use alloy_primitives::Address;
use sha2::{Digest, Sha256};

use crate::error::{BookingError, Result};
use crate::store::UserRecord;

const CANONICAL_PREFIX: &str = "uid:";

/// Stable identifier for a profile email
pub fn canonical_id(email: &str) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    format!("{}{}", CANONICAL_PREFIX, hex::encode(&digest[..16]))
}

fn wallet_id(address: &Address) -> String {
    address.to_string().to_lowercase()
}

/// Student identifier to write into a booking
pub fn resolve_student(user: Option<&UserRecord>, wallet: Option<&Address>) -> Result<String> {
    if let Some(user) = user.filter(|u| !u.email.trim().is_empty()) {
        return Ok(canonical_id(&user.email));
    }
    wallet.map(wallet_id).ok_or(BookingError::MissingIdentity)
}

/// Every identifier a user may appear under in session records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentitySet {
    aliases: Vec<String>,
}

impl IdentitySet {
    pub fn for_user(user: Option<&UserRecord>, wallet: Option<&Address>) -> Self {
        let mut set = Self::default();
        if let Some(user) = user {
            if !user.email.trim().is_empty() {
                set.push(canonical_id(&user.email));
                set.push(user.email.clone());
            }
            if let Some(name) = &user.name {
                set.push(name.clone());
            }
            if let Some(addr) = &user.wallet_address {
                set.push(addr.clone());
            }
        }
        if let Some(wallet) = wallet {
            set.push(wallet_id(wallet));
        }
        set
    }

    fn push(&mut self, alias: String) {
        let alias = alias.trim().to_lowercase();
        if !alias.is_empty() && !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Case-insensitive equality against any alias
    pub fn matches(&self, student: &str) -> bool {
        let student = student.trim().to_lowercase();
        self.aliases.iter().any(|a| *a == student)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id_normalizes_email() {
        let a = canonical_id("Ada@Example.com ");
        let b = canonical_id("ada@example.com");
        assert_eq!(a, b);
        assert!(a.starts_with("uid:"));
        assert_eq!(a.len(), 4 + 32);
    }

    #[test]
    fn test_resolve_prefers_profile() {
        let user = UserRecord::new("ada@example.com", Some("Ada".into()));
        let wallet = Address::repeat_byte(0xab);
        assert_eq!(
            resolve_student(Some(&user), Some(&wallet)).unwrap(),
            canonical_id("ada@example.com")
        );
        assert_eq!(
            resolve_student(None, Some(&wallet)).unwrap(),
            format!("0x{}", "ab".repeat(20))
        );
        assert_eq!(resolve_student(None, None), Err(BookingError::MissingIdentity));
    }

    #[test]
    fn test_identity_set_matches_legacy_aliases() {
        let user = UserRecord::new("ada@example.com", Some("Ada Lovelace".into()));
        let set = IdentitySet::for_user(Some(&user), None);

        assert!(set.matches("ADA LOVELACE"));
        assert!(set.matches("ada@example.com"));
        assert!(set.matches(&canonical_id("ada@example.com")));
        assert!(!set.matches("Ada"));
        assert!(IdentitySet::for_user(None, None).is_empty());
    }
}
