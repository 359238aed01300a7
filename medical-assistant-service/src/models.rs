use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Stored lower-case; lookups lower-case the query
    pub user_name: String,
}

/// Catalog entry for a bookable test or a treatment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub test_name: String,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub patient_id: String,
    pub policy_number: String,
    #[serde(default)]
    pub covered_treatments: Vec<String>,
    #[serde(default)]
    pub coverage_percentage: Option<f64>,
}

impl InsurancePolicy {
    pub fn covers(&self, treatment: &str) -> bool {
        self.covered_treatments
            .iter()
            .any(|t| t.eq_ignore_ascii_case(treatment))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalReport {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub date: Option<String>,
    pub findings: String,
    #[serde(default)]
    pub values: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub patient_id: String,
    pub test_names: Vec<String>,
    pub total_cost: f64,
    pub booked_at: DateTime<Utc>,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub patient_id: String,
    pub policy_number: String,
    pub treatment: String,
    pub coverage_percentage: f64,
    pub total_cost: f64,
    pub reimbursed_amount: f64,
    pub submitted_at: DateTime<Utc>,
}

/// Reference data loaded into an empty record store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub treatments: Vec<Treatment>,
    #[serde(default)]
    pub policies: Vec<InsurancePolicy>,
    #[serde(default)]
    pub reports: Vec<MedicalReport>,
    #[serde(default)]
    pub bookings: Vec<Booking>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub user_query: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub thread_id: String,
    pub response: String,
}
