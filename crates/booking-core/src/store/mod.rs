// ============================================================================
// LocalStore - Embedded Database (redb)
// ============================================================================
// The single accessor for locally persisted state: user profile, last wallet
// address, the pending-payment slot and enrolled courses.
// Default path: ~/.tutor-chain/state.redb (override via TUTOR_CHAIN_DB_PATH)
// ============================================================================

pub mod types;

pub use types::{EnrolledCourse, UserRecord, RECORD_VERSION};

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{BookingError, Result};
use crate::types::PendingPaymentIntent;
use types::{EnrolledCoursesRecord, PendingPaymentRecord, WalletRecord};

const STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("state");

const KEY_USER: &str = "user";
const KEY_WALLET: &str = "wallet_address";
const KEY_PENDING: &str = "pending_payment";
const KEY_COURSES: &str = "enrolled_courses";

fn storage<E: Display>(context: &'static str) -> impl Fn(E) -> BookingError {
    move |e| BookingError::Storage(format!("{}: {}", context, e))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(storage("Failed to serialize record"))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(storage("Failed to deserialize record"))
}

/// Local persisted state for one user of this device
pub struct LocalStore {
    db: Database,
    path: PathBuf,
}

impl LocalStore {
    /// Open (or create) the store at the given path.
    /// If `path` is None, uses TUTOR_CHAIN_DB_PATH or ~/.tutor-chain/state.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("TUTOR_CHAIN_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir()
                .ok_or_else(|| BookingError::Storage("Cannot determine home directory".into()))?;
            let dir = home.join(".tutor-chain");
            std::fs::create_dir_all(&dir).map_err(storage("Failed to create .tutor-chain"))?;
            dir.join("state.redb")
        };

        info!("Opening local store at: {}", db_path.display());

        let db = Database::create(&db_path).map_err(storage("Failed to open database"))?;

        let write_txn = db.begin_write().map_err(storage("Failed to begin write"))?;
        {
            let _ = write_txn
                .open_table(STATE)
                .map_err(storage("Failed to create state table"))?;
        }
        write_txn.commit().map_err(storage("Failed to commit init"))?;

        Ok(Self { db, path: db_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Generic record access
    // ========================================================================

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(STATE)
            .map_err(storage("Failed to open state table"))?;
        let found = table.get(key).map_err(storage("Failed to get record"))?;
        match found {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn read_in<T: DeserializeOwned>(txn: &WriteTransaction, key: &str) -> Result<Option<T>> {
        let table = txn
            .open_table(STATE)
            .map_err(storage("Failed to open state table"))?;
        let found = table.get(key).map_err(storage("Failed to get record"))?;
        match found {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn write_in<T: Serialize>(txn: &WriteTransaction, key: &str, value: &T) -> Result<()> {
        let bytes = encode(value)?;
        let mut table = txn
            .open_table(STATE)
            .map_err(storage("Failed to open state table"))?;
        table
            .insert(key, bytes.as_slice())
            .map_err(storage("Failed to insert record"))?;
        Ok(())
    }

    fn remove_in(txn: &WriteTransaction, key: &str) -> Result<bool> {
        let mut table = txn
            .open_table(STATE)
            .map_err(storage("Failed to open state table"))?;
        let removed = table
            .remove(key)
            .map_err(storage("Failed to remove record"))?
            .is_some();
        Ok(removed)
    }

    /// Run `f` inside one write transaction; nothing is committed on error
    fn update<R>(&self, f: impl FnOnce(&WriteTransaction) -> Result<R>) -> Result<R> {
        let txn = self.db.begin_write().map_err(storage("Failed to begin write"))?;
        let out = f(&txn)?;
        txn.commit().map_err(storage("Failed to commit"))?;
        Ok(out)
    }

    // ========================================================================
    // User
    // ========================================================================

    pub fn user(&self) -> Result<Option<UserRecord>> {
        let user: Option<UserRecord> = self.read(KEY_USER)?;
        Ok(user.filter(|u| {
            let current = u.version == RECORD_VERSION;
            if !current {
                warn!("Ignoring user record with unknown version {}", u.version);
            }
            current
        }))
    }

    pub fn save_user(&self, user: &UserRecord) -> Result<()> {
        self.update(|txn| Self::write_in(txn, KEY_USER, user))?;
        debug!("Stored user record for {}", user.email);
        Ok(())
    }

    /// Sign out: drops the profile and everything bound to it
    pub fn clear_user(&self) -> Result<()> {
        self.update(|txn| {
            Self::remove_in(txn, KEY_USER)?;
            Self::remove_in(txn, KEY_COURSES)?;
            Self::remove_in(txn, KEY_PENDING)?;
            Ok(())
        })
    }

    // ========================================================================
    // Wallet address
    // ========================================================================

    pub fn wallet_address(&self) -> Result<Option<String>> {
        let record: Option<WalletRecord> = self.read(KEY_WALLET)?;
        Ok(record.map(|r| r.address))
    }

    /// Remember the connected wallet, on its own key and on the profile
    pub fn set_wallet_address(&self, address: &str) -> Result<()> {
        self.update(|txn| {
            let record = WalletRecord {
                version: RECORD_VERSION,
                address: address.to_string(),
            };
            Self::write_in(txn, KEY_WALLET, &record)?;

            if let Some(mut user) = Self::read_in::<UserRecord>(txn, KEY_USER)? {
                if user.wallet_address.as_deref() != Some(address) {
                    user.wallet_address = Some(address.to_string());
                    Self::write_in(txn, KEY_USER, &user)?;
                }
            }
            Ok(())
        })?;
        debug!("Stored wallet address {}", address);
        Ok(())
    }

    pub fn clear_wallet_address(&self) -> Result<()> {
        self.update(|txn| {
            Self::remove_in(txn, KEY_WALLET)?;
            if let Some(mut user) = Self::read_in::<UserRecord>(txn, KEY_USER)? {
                if user.wallet_address.take().is_some() {
                    Self::write_in(txn, KEY_USER, &user)?;
                }
            }
            Ok(())
        })
    }

    // ========================================================================
    // Pending payment (single slot)
    // ========================================================================

    pub fn pending_payment(&self) -> Result<Option<PendingPaymentIntent>> {
        let record: Option<PendingPaymentRecord> = self.read(KEY_PENDING)?;
        Ok(record.map(|r| r.intent))
    }

    /// Replaces any intent already waiting
    pub fn set_pending_payment(&self, intent: &PendingPaymentIntent) -> Result<()> {
        let record = PendingPaymentRecord {
            version: RECORD_VERSION,
            intent: intent.clone(),
        };
        self.update(|txn| Self::write_in(txn, KEY_PENDING, &record))?;
        debug!("Pending payment set: {} {}", intent.item_type, intent.item_id);
        Ok(())
    }

    pub fn clear_pending_payment(&self) -> Result<bool> {
        self.update(|txn| Self::remove_in(txn, KEY_PENDING))
    }

    // ========================================================================
    // Enrolled courses
    // ========================================================================

    pub fn enrolled_courses(&self) -> Result<Vec<EnrolledCourse>> {
        let record: Option<EnrolledCoursesRecord> = self.read(KEY_COURSES)?;
        Ok(record.map(|r| r.courses).unwrap_or_default())
    }

    /// Add a course with progress 0. Returns false if already enrolled.
    pub fn enroll_course(&self, course_id: &str, title: &str) -> Result<bool> {
        let added = self.update(|txn| {
            let mut record = Self::read_in::<EnrolledCoursesRecord>(txn, KEY_COURSES)?
                .unwrap_or(EnrolledCoursesRecord {
                    version: RECORD_VERSION,
                    courses: Vec::new(),
                });

            if record.courses.iter().any(|c| c.id == course_id) {
                return Ok(false);
            }

            record.courses.push(EnrolledCourse {
                id: course_id.to_string(),
                title: title.to_string(),
                enrolled_date: chrono::Utc::now().to_rfc3339(),
                progress: 0,
            });
            Self::write_in(txn, KEY_COURSES, &record)?;

            if let Some(mut user) = Self::read_in::<UserRecord>(txn, KEY_USER)? {
                if !user.enrolled_course_ids.iter().any(|id| id == course_id) {
                    user.enrolled_course_ids.push(course_id.to_string());
                    Self::write_in(txn, KEY_USER, &user)?;
                }
            }
            Ok(true)
        })?;

        if added {
            info!("Enrolled in course {}", course_id);
        } else {
            debug!("Already enrolled in course {}", course_id);
        }
        Ok(added)
    }
}

#[cfg(test)]
impl LocalStore {
    /// Overwrite the enrolled courses record with bytes that cannot decode
    pub(crate) fn corrupt_enrolled_courses(&self) {
        self.update(|txn| {
            let mut table = txn
                .open_table(STATE)
                .map_err(storage("Failed to open state table"))?;
            table
                .insert(KEY_COURSES, [0xffu8].as_slice())
                .map_err(storage("Failed to insert record"))?;
            Ok(())
        })
        .expect("corrupt courses");
    }
}

#[cfg(test)]
pub(crate) fn temp_store() -> LocalStore {
    let path = std::env::temp_dir().join(format!("tutor-chain-{}.redb", uuid::Uuid::new_v4()));
    LocalStore::open(path.to_str()).expect("temp store")
}
