use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{RecordStore, StoreResult};
use crate::models::{Booking, Claim, InsurancePolicy, MedicalReport, SeedData, Treatment, User};

#[derive(Default)]
struct Collections {
    users: Vec<User>,
    treatments: Vec<Treatment>,
    policies: Vec<InsurancePolicy>,
    reports: Vec<MedicalReport>,
    bookings: Vec<Booking>,
    claims: Vec<Claim>,
}

/// In-memory record store for development and tests
#[derive(Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<Collections>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(seed: SeedData) -> Self {
        let users = seed
            .users
            .into_iter()
            .map(|u| User {
                user_name: u.user_name.to_lowercase(),
                ..u
            })
            .collect();
        Self {
            collections: RwLock::new(Collections {
                users,
                treatments: seed.treatments,
                policies: seed.policies,
                reports: seed.reports,
                bookings: seed.bookings,
                claims: Vec::new(),
            }),
        }
    }

    pub async fn claims(&self) -> Vec<Claim> {
        self.collections.read().await.claims.clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_user_by_name(&self, user_name: &str) -> StoreResult<Option<User>> {
        let needle = user_name.trim().to_lowercase();
        Ok(self
            .collections
            .read()
            .await
            .users
            .iter()
            .find(|u| u.user_name == needle)
            .cloned())
    }

    async fn find_treatment(&self, name: &str) -> StoreResult<Option<Treatment>> {
        let name = name.trim();
        Ok(self
            .collections
            .read()
            .await
            .treatments
            .iter()
            .find(|t| t.test_name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list_treatments(&self) -> StoreResult<Vec<Treatment>> {
        Ok(self.collections.read().await.treatments.clone())
    }

    async fn find_policy_by_patient(&self, patient_id: &str) -> StoreResult<Option<InsurancePolicy>> {
        Ok(self
            .collections
            .read()
            .await
            .policies
            .iter()
            .find(|p| p.patient_id == patient_id)
            .cloned())
    }

    async fn find_policy_by_number(
        &self,
        policy_number: &str,
    ) -> StoreResult<Option<InsurancePolicy>> {
        let policy_number = policy_number.trim();
        Ok(self
            .collections
            .read()
            .await
            .policies
            .iter()
            .find(|p| p.policy_number == policy_number)
            .cloned())
    }

    async fn find_reports_by_user(&self, user_id: &str) -> StoreResult<Vec<MedicalReport>> {
        Ok(self
            .collections
            .read()
            .await
            .reports
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_bookings_by_patient(&self, patient_id: &str) -> StoreResult<Vec<Booking>> {
        Ok(self
            .collections
            .read()
            .await
            .bookings
            .iter()
            .filter(|b| b.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn insert_booking(&self, booking: Booking) -> StoreResult<Booking> {
        self.collections.write().await.bookings.push(booking.clone());
        Ok(booking)
    }

    async fn insert_claim(&self, claim: Claim) -> StoreResult<Claim> {
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.claims.iter().find(|c| c.id == claim.id) {
            return Ok(existing.clone());
        }
        collections.claims.push(claim.clone());
        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> SeedData {
        SeedData {
            users: vec![
                User { id: "u1".into(), user_name: "Jane".into() },
                User { id: "u2".into(), user_name: "jane".into() },
            ],
            policies: vec![InsurancePolicy {
                patient_id: "u1".into(),
                policy_number: "POL-1".into(),
                covered_treatments: vec!["MRI".into()],
                coverage_percentage: Some(50.0),
            }],
            treatments: vec![Treatment { test_name: "MRI".into(), cost: 800.0 }],
            ..SeedData::default()
        }
    }

    #[tokio::test]
    async fn user_lookup_is_case_insensitive_and_first_match_wins() {
        let store = InMemoryRecordStore::seeded(seed());
        let user = store.find_user_by_name("  JANE ").await.unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert!(store.find_user_by_name("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn policy_lookup_by_patient_and_by_number() {
        let store = InMemoryRecordStore::seeded(seed());
        let by_patient = store.find_policy_by_patient("u1").await.unwrap().unwrap();
        let by_number = store.find_policy_by_number("POL-1").await.unwrap().unwrap();
        assert_eq!(by_patient, by_number);
        assert!(store.find_policy_by_patient("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn treatment_lookup_ignores_case() {
        let store = InMemoryRecordStore::seeded(seed());
        assert!(store.find_treatment("mri").await.unwrap().is_some());
        assert_eq!(store.list_treatments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_with_known_id_is_stored_once() {
        let store = InMemoryRecordStore::seeded(seed());
        let claim = Claim {
            id: "CLAIM-1".into(),
            patient_id: "u1".into(),
            policy_number: "POL-1".into(),
            treatment: "MRI".into(),
            coverage_percentage: 50.0,
            total_cost: 800.0,
            reimbursed_amount: 400.0,
            submitted_at: chrono::Utc::now(),
        };
        let first = store.insert_claim(claim.clone()).await.unwrap();
        let again = store
            .insert_claim(Claim {
                submitted_at: chrono::Utc::now(),
                ..claim
            })
            .await
            .unwrap();
        assert_eq!(again, first);
        assert_eq!(store.claims().await, vec![first]);
    }
}
