//! Point lookups and inserts against the medical record collections.
//!
//! Lookups on keys that should be unique (user name, policy number, patient policy) return
//! the first matching record, in insertion order.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use swarm_flow::ToolError;
use thiserror::Error;

use crate::models::{Booking, Claim, InsurancePolicy, MedicalReport, Treatment, User};

pub use memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached; worth retrying
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("record store error: {0}")]
    Backend(String),
}

impl From<StoreError> for ToolError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(message) => ToolError::Unavailable(message),
            StoreError::Backend(message) => ToolError::Failed(message),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Collection names, configurable per deployment
#[derive(Debug, Clone, PartialEq)]
pub struct Collections {
    pub users: String,
    pub treatments: String,
    pub reports: String,
    pub bookings: String,
    pub policies: String,
    pub claims: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            users: "users".to_string(),
            treatments: "treatments".to_string(),
            reports: "reports".to_string(),
            bookings: "booked_tests".to_string(),
            policies: "insurance_policies".to_string(),
            claims: "claims".to_string(),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Case-insensitive lookup by user name
    async fn find_user_by_name(&self, user_name: &str) -> StoreResult<Option<User>>;

    /// Case-insensitive lookup by catalog name
    async fn find_treatment(&self, name: &str) -> StoreResult<Option<Treatment>>;

    async fn list_treatments(&self) -> StoreResult<Vec<Treatment>>;

    async fn find_policy_by_patient(&self, patient_id: &str) -> StoreResult<Option<InsurancePolicy>>;

    async fn find_policy_by_number(&self, policy_number: &str)
    -> StoreResult<Option<InsurancePolicy>>;

    async fn find_reports_by_user(&self, user_id: &str) -> StoreResult<Vec<MedicalReport>>;

    async fn find_bookings_by_patient(&self, patient_id: &str) -> StoreResult<Vec<Booking>>;

    async fn insert_booking(&self, booking: Booking) -> StoreResult<Booking>;

    /// Insert unless a claim with the same id exists. Returns the stored claim either way.
    async fn insert_claim(&self, claim: Claim) -> StoreResult<Claim>;
}
