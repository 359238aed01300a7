use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use swarm_flow::{Context, Tool, ToolError, parse_arguments};
use tracing::info;

use super::resolve_user;
use crate::store::RecordStore;

#[derive(Deserialize)]
struct FetchReportArgs {
    user_name: String,
}

/// Fetch every medical report on file for a user
pub struct FetchReportTool {
    store: Arc<dyn RecordStore>,
}

impl FetchReportTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FetchReportTool {
    fn name(&self) -> &str {
        "fetch_report"
    }

    fn description(&self) -> &str {
        "Fetch the list of medical or health reports from the database for the given user."
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
        let args: FetchReportArgs = parse_arguments(arguments)?;
        let user = resolve_user(self.store.as_ref(), &args.user_name).await?;

        let reports = self.store.find_reports_by_user(&user.id).await?;
        if reports.is_empty() {
            return Err(ToolError::NotFound(format!(
                "No medical reports found for {}.",
                user.user_name
            )));
        }

        info!(user_id = %user.id, reports = reports.len(), "Fetched reports");
        Ok(json!({ "user_name": user.user_name, "reports": reports }))
    }
}
