use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use swarm_flow::{Context, Tool, ToolError, parse_arguments};
use tracing::info;
use uuid::Uuid;

use super::resolve_user;
use crate::models::{Booking, BookingStatus};
use crate::store::RecordStore;

/// List the catalog of bookable tests with their costs
pub struct FetchTestsTool {
    store: Arc<dyn RecordStore>,
}

impl FetchTestsTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FetchTestsTool {
    fn name(&self) -> &str {
        "fetch_tests"
    }

    fn description(&self) -> &str {
        "Fetch the list of medical tests that can be booked, with their costs."
    }

    async fn call(&self, _arguments: Value, _context: &Context) -> Result<Value, ToolError> {
        let tests = self.store.list_treatments().await?;
        Ok(json!({ "tests": tests }))
    }
}

#[derive(Deserialize)]
struct BookTestsArgs {
    user_name: String,
    tests: Vec<String>,
}

/// Book a list of catalog tests for a user
pub struct BookTestsTool {
    store: Arc<dyn RecordStore>,
}

impl BookTestsTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for BookTestsTool {
    fn name(&self) -> &str {
        "book_tests"
    }

    fn description(&self) -> &str {
        "Book the given medical tests for the user. Test names must come from fetch_tests."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_name": { "type": "string", "description": "Name of the patient" },
                "tests": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Names of the tests to book"
                }
            },
            "required": ["user_name", "tests"]
        })
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn call(&self, arguments: Value, _context: &Context) -> Result<Value, ToolError> {
        let args: BookTestsArgs = parse_arguments(arguments)?;
        let requested: Vec<&str> = args
            .tests
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if requested.is_empty() {
            return Err(ToolError::InvalidArguments(
                "tests must name at least one test".to_string(),
            ));
        }

        let user = resolve_user(self.store.as_ref(), &args.user_name).await?;

        let mut booked = Vec::with_capacity(requested.len());
        let mut missing = Vec::new();
        for name in requested {
            match self.store.find_treatment(name).await? {
                Some(treatment) => booked.push(treatment),
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(ToolError::NotFound(format!(
                "Unknown tests: {}. Use fetch_tests to see what can be booked.",
                missing.join(", ")
            )));
        }

        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            patient_id: user.id.clone(),
            test_names: booked.iter().map(|t| t.test_name.clone()).collect(),
            total_cost: booked.iter().map(|t| t.cost).sum(),
            booked_at: Utc::now(),
            status: BookingStatus::Confirmed,
        };
        let booking = self.store.insert_booking(booking).await?;

        info!(
            booking_id = %booking.id,
            patient_id = %booking.patient_id,
            tests = booking.test_names.len(),
            "Booked tests"
        );
        Ok(json!({ "user_name": user.user_name, "booking": booking }))
    }
}

#[derive(Deserialize)]
struct FetchBookedTestsArgs {
    user_name: String,
}

/// List the bookings already made for a user
pub struct FetchBookedTestsTool {
    store: Arc<dyn RecordStore>,
}

impl FetchBookedTestsTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FetchBookedTestsTool {
    fn name(&self) -> &str {
        "fetch_booked_tests"
    }

    fn description(&self) -> &str {
        "Fetch the tests already booked for the given user."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_name": { "type": "string", "description": "Name of the patient" }
            },
            "required": ["user_name"]
        })
    }

    async fn call(&self, arguments: Value, _context: &Context) -> Result<Value, ToolError> {
        let args: FetchBookedTestsArgs = parse_arguments(arguments)?;
        let user = resolve_user(self.store.as_ref(), &args.user_name).await?;
        let bookings = self.store.find_bookings_by_patient(&user.id).await?;
        Ok(json!({ "user_name": user.user_name, "bookings": bookings }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::seeded_store;

    #[tokio::test]
    async fn booking_sums_catalog_costs_and_is_listed_afterwards() {
        let store = seeded_store();
        let context = Context::new();
        let book = BookTestsTool::new(store.clone());

        let result = book
            .call(
                json!({ "user_name": "Jane", "tests": ["ct scan", "Complete Blood Count"] }),
                &context,
            )
            .await
            .unwrap();
        let booking: Booking = serde_json::from_value(result["booking"].clone()).unwrap();
        assert_eq!(booking.test_names, vec!["CT Scan", "Complete Blood Count"]);
        assert_eq!(booking.total_cost, 340.0);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert!(context.snapshot().await.data.is_empty());

        let listed = FetchBookedTestsTool::new(store)
            .call(json!({ "user_name": "jane" }), &context)
            .await
            .unwrap();
        let bookings: Vec<Booking> = serde_json::from_value(listed["bookings"].clone()).unwrap();
        assert_eq!(bookings, vec![booking]);
    }

    #[tokio::test]
    async fn empty_test_list_is_rejected() {
        let book = BookTestsTool::new(seeded_store());
        let err = book
            .call(json!({ "user_name": "Jane", "tests": [] }), &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn unknown_tests_are_listed_and_nothing_is_booked() {
        let store = seeded_store();
        let book = BookTestsTool::new(store.clone());
        let err = book
            .call(
                json!({ "user_name": "Jane", "tests": ["MRI", "Telepathy Scan"] }),
                &Context::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(m) if m.contains("Telepathy Scan")));
        assert!(store.find_bookings_by_patient("u-1001").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn catalog_lists_every_treatment() {
        let result = FetchTestsTool::new(seeded_store())
            .call(Value::Null, &Context::new())
            .await
            .unwrap();
        assert_eq!(result["tests"].as_array().unwrap().len(), 6);
    }
}
