pub mod booking;
pub mod insurance;
pub mod report;

use swarm_flow::ToolError;

use crate::models::User;
use crate::store::RecordStore;

pub use booking::{BookTestsTool, FetchBookedTestsTool, FetchTestsTool};
pub use insurance::{
    CalculateEstimatedCoverageTool, CalculateReimbursedAmountTool, CheckClaimEligibilityTool,
    FetchInsurancePolicyTool, SubmitInsuranceClaimTool,
};
pub use report::FetchReportTool;

/// Look up a user by name, reporting a miss as `NotFound` for the agent.
pub(crate) async fn resolve_user(store: &dyn RecordStore, user_name: &str) -> Result<User, ToolError> {
    if user_name.trim().is_empty() {
        return Err(ToolError::InvalidArguments("user_name must not be empty".to_string()));
    }
    store
        .find_user_by_name(user_name)
        .await?
        .ok_or_else(|| ToolError::NotFound(format!("No user named '{}' was found.", user_name.trim())))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::models::SeedData;
    use crate::store::InMemoryRecordStore;

    pub fn seeded_store() -> Arc<InMemoryRecordStore> {
        let seed: SeedData = serde_json::from_str(include_str!("../../data/seed.json")).unwrap();
        Arc::new(InMemoryRecordStore::seeded(seed))
    }
}
