use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{PgPool, types::Json};
use tracing::info;

use super::{Collections, RecordStore, StoreError, StoreResult};
use crate::models::{Booking, Claim, InsurancePolicy, MedicalReport, SeedData, Treatment, User};

const CREATE_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id TEXT NOT NULL,
    collection TEXT NOT NULL,
    body JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
    PRIMARY KEY (collection, id)
)"#;

const CREATE_RECORDS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS records_collection_created ON records (collection, created_at)";

/// Document-style store: every collection lives in one JSONB table keyed by collection name.
pub struct PostgresRecordStore {
    pool: PgPool,
    collections: Collections,
}

fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

impl PostgresRecordStore {
    pub async fn new(pool: PgPool, collections: Collections) -> StoreResult<Self> {
        sqlx::query(CREATE_RECORDS)
            .execute(&pool)
            .await
            .map_err(store_error)?;
        sqlx::query(CREATE_RECORDS_INDEX)
            .execute(&pool)
            .await
            .map_err(store_error)?;
        Ok(Self { pool, collections })
    }

    /// Insert seed records, skipping ids that already exist.
    pub async fn seed(&self, seed: &SeedData) -> StoreResult<()> {
        for user in &seed.users {
            let user = User {
                user_name: user.user_name.to_lowercase(),
                ..user.clone()
            };
            self.insert(&self.collections.users, &user.id, &user).await?;
        }
        for treatment in &seed.treatments {
            self.insert(&self.collections.treatments, &treatment.test_name, treatment)
                .await?;
        }
        for policy in &seed.policies {
            self.insert(&self.collections.policies, &policy.policy_number, policy)
                .await?;
        }
        for report in &seed.reports {
            self.insert(&self.collections.reports, &report.id, report).await?;
        }
        for booking in &seed.bookings {
            self.insert(&self.collections.bookings, &booking.id, booking).await?;
        }
        info!(
            users = seed.users.len(),
            treatments = seed.treatments.len(),
            policies = seed.policies.len(),
            reports = seed.reports.len(),
            "Seeded record store"
        );
        Ok(())
    }

    async fn insert<T: Serialize + Sync>(&self, collection: &str, id: &str, body: &T) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO records (id, collection, body) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(collection)
        .bind(Json(body))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    /// First record of `collection` whose `field` equals `value`.
    async fn find_one<T>(&self, collection: &str, field: &str, value: &str, ignore_case: bool) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned + Send + Unpin + 'static,
    {
        let sql = if ignore_case {
            "SELECT body FROM records WHERE collection = $1 AND lower(body->>$2) = lower($3) ORDER BY created_at LIMIT 1"
        } else {
            "SELECT body FROM records WHERE collection = $1 AND body->>$2 = $3 ORDER BY created_at LIMIT 1"
        };
        let row: Option<Json<T>> = sqlx::query_scalar(sql)
            .bind(collection)
            .bind(field)
            .bind(value.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(row.map(|Json(body)| body))
    }

    async fn find_many<T>(&self, collection: &str, filter: Option<(&str, &str)>) -> StoreResult<Vec<T>>
    where
        T: DeserializeOwned + Send + Unpin + 'static,
    {
        let rows: Vec<Json<T>> = match filter {
            Some((field, value)) => {
                sqlx::query_scalar(
                    "SELECT body FROM records WHERE collection = $1 AND body->>$2 = $3 ORDER BY created_at",
                )
                .bind(collection)
                .bind(field)
                .bind(value)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_scalar(
                    "SELECT body FROM records WHERE collection = $1 ORDER BY created_at",
                )
                .bind(collection)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(store_error)?;
        Ok(rows.into_iter().map(|Json(body)| body).collect())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn find_user_by_name(&self, user_name: &str) -> StoreResult<Option<User>> {
        self.find_one(&self.collections.users, "user_name", user_name, true)
            .await
    }

    async fn find_treatment(&self, name: &str) -> StoreResult<Option<Treatment>> {
        self.find_one(&self.collections.treatments, "test_name", name, true)
            .await
    }

    async fn list_treatments(&self) -> StoreResult<Vec<Treatment>> {
        self.find_many(&self.collections.treatments, None).await
    }

    async fn find_policy_by_patient(&self, patient_id: &str) -> StoreResult<Option<InsurancePolicy>> {
        self.find_one(&self.collections.policies, "patient_id", patient_id, false)
            .await
    }

    async fn find_policy_by_number(
        &self,
        policy_number: &str,
    ) -> StoreResult<Option<InsurancePolicy>> {
        self.find_one(&self.collections.policies, "policy_number", policy_number, false)
            .await
    }

    async fn find_reports_by_user(&self, user_id: &str) -> StoreResult<Vec<MedicalReport>> {
        self.find_many(&self.collections.reports, Some(("user_id", user_id)))
            .await
    }

    async fn find_bookings_by_patient(&self, patient_id: &str) -> StoreResult<Vec<Booking>> {
        self.find_many(&self.collections.bookings, Some(("patient_id", patient_id)))
            .await
    }

    async fn insert_booking(&self, booking: Booking) -> StoreResult<Booking> {
        self.insert(&self.collections.bookings, &booking.id, &booking)
            .await?;
        Ok(booking)
    }

    async fn insert_claim(&self, claim: Claim) -> StoreResult<Claim> {
        self.insert(&self.collections.claims, &claim.id, &claim).await?;
        self.find_one(&self.collections.claims, "id", &claim.id, false)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("claim {} missing after insert", claim.id)))
    }
}
