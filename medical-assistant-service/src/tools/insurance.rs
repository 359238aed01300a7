//! Insurance claim tools.
//!
//! Claims follow a fixed order per conversation: the policy is fetched, eligibility is
//! checked for a treatment, coverage is computed, and only then can the claim be submitted.
//! Progress is kept in the context under [`CLAIM_PROGRESS_KEY`] so it survives across turns,
//! and a step taken out of order is reported back to the agent as a precondition failure.
//!
//! Computing coverage fixes the claim id. Submitting the same progress twice stores one claim.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use swarm_flow::{Context, Tool, ToolError, parse_arguments};
use tracing::info;
use uuid::Uuid;

use super::resolve_user;
use crate::models::{Claim, InsurancePolicy, Treatment};
use crate::store::RecordStore;

pub const CLAIM_PROGRESS_KEY: &str = "claim_progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStage {
    PolicyFetched,
    EligibilityChecked,
    CoverageComputed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimProgress {
    pub policy_number: String,
    pub treatment: Option<String>,
    pub stage: ClaimStage,
    /// Id the claim is stored under once submitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
}

impl ClaimProgress {
    fn matches(&self, policy_number: &str, treatment: Option<&str>) -> bool {
        if self.policy_number != policy_number.trim() {
            return false;
        }
        match (treatment, self.treatment.as_deref()) {
            (None, _) => true,
            (Some(wanted), Some(current)) => wanted.trim().eq_ignore_ascii_case(current),
            (Some(_), None) => false,
        }
    }
}

/// Percentage of the cost the policy pays for `treatment`: zero when it is not covered
/// or the policy has no percentage on file.
pub fn effective_coverage_percentage(policy: &InsurancePolicy, treatment: &str) -> f64 {
    if policy.covers(treatment.trim()) {
        policy.coverage_percentage.unwrap_or(0.0)
    } else {
        0.0
    }
}

pub fn reimbursed_amount(coverage_percentage: f64, cost: f64) -> f64 {
    coverage_percentage / 100.0 * cost
}

fn new_claim_id() -> String {
    format!("CLAIM-{}", Uuid::new_v4().simple())
}

async fn save_progress(context: &Context, progress: &ClaimProgress) -> Result<(), ToolError> {
    context
        .set(CLAIM_PROGRESS_KEY, progress)
        .await
        .map_err(|e| ToolError::Failed(e.to_string()))
}

/// Current progress, provided it is for this policy (and treatment) and at least at `stage`.
async fn require_progress(
    context: &Context,
    policy_number: &str,
    treatment: Option<&str>,
    stage: ClaimStage,
) -> Result<ClaimProgress, ToolError> {
    let progress = context
        .get::<ClaimProgress>(CLAIM_PROGRESS_KEY)
        .await
        .filter(|p| p.matches(policy_number, treatment));

    match progress {
        Some(p) if p.stage >= stage => Ok(p),
        _ => {
            let next = match stage {
                ClaimStage::PolicyFetched => "fetch_insurance_policy_details",
                ClaimStage::EligibilityChecked => "check_claim_eligibility",
                ClaimStage::CoverageComputed => "calculate_estimated_coverage",
            };
            Err(ToolError::PreconditionFailed(format!(
                "Call {next} for policy {} first.",
                policy_number.trim()
            )))
        }
    }
}

async fn policy_by_number(store: &dyn RecordStore, policy_number: &str) -> Result<InsurancePolicy, ToolError> {
    store
        .find_policy_by_number(policy_number)
        .await?
        .ok_or_else(|| ToolError::NotFound(format!("No insurance policy numbered '{}'.", policy_number.trim())))
}

async fn catalog_entry(store: &dyn RecordStore, treatment: &str) -> Result<Treatment, ToolError> {
    store
        .find_treatment(treatment)
        .await?
        .ok_or_else(|| ToolError::NotFound(format!("No treatment named '{}' in the catalog.", treatment.trim())))
}

fn policy_treatment_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "policy_number": { "type": "string", "description": "Policy number from fetch_insurance_policy_details" },
            "treatment": { "type": "string", "description": "Name of the treatment or test" }
        },
        "required": ["policy_number", "treatment"]
    })
}

#[derive(Deserialize)]
struct UserArgs {
    user_name: String,
}

#[derive(Deserialize)]
struct PolicyTreatmentArgs {
    policy_number: String,
    treatment: String,
}

#[derive(Deserialize)]
struct SubmitClaimArgs {
    user_name: String,
    treatment: String,
}

pub struct FetchInsurancePolicyTool {
    store: Arc<dyn RecordStore>,
}

impl FetchInsurancePolicyTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FetchInsurancePolicyTool {
    fn name(&self) -> &str {
        "fetch_insurance_policy_details"
    }

    fn description(&self) -> &str {
        "Fetch the insurance policy details of the given user. Must be called before any other claim tool."
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

    async fn call(&self, arguments: Value, context: &Context) -> Result<Value, ToolError> {
        let args: UserArgs = parse_arguments(arguments)?;
        let user = resolve_user(self.store.as_ref(), &args.user_name).await?;
        let policy = self
            .store
            .find_policy_by_patient(&user.id)
            .await?
            .ok_or_else(|| ToolError::NotFound("No insurance policy found for this patient.".to_string()))?;

        save_progress(
            context,
            &ClaimProgress {
                policy_number: policy.policy_number.clone(),
                treatment: None,
                stage: ClaimStage::PolicyFetched,
                claim_id: None,
            },
        )
        .await?;

        Ok(json!({ "user_name": user.user_name, "policy": policy }))
    }
}

pub struct CheckClaimEligibilityTool {
    store: Arc<dyn RecordStore>,
}

impl CheckClaimEligibilityTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CheckClaimEligibilityTool {
    fn name(&self) -> &str {
        "check_claim_eligibility"
    }

    fn description(&self) -> &str {
        "Check whether a treatment is covered by the given insurance policy."
    }

    fn parameters(&self) -> Value {
        policy_treatment_schema()
    }

    async fn call(&self, arguments: Value, context: &Context) -> Result<Value, ToolError> {
        let args: PolicyTreatmentArgs = parse_arguments(arguments)?;
        let progress =
            require_progress(context, &args.policy_number, None, ClaimStage::PolicyFetched).await?;

        let policy = policy_by_number(self.store.as_ref(), &args.policy_number).await?;
        let treatment = args.treatment.trim().to_string();
        let covered = policy.covers(&treatment);

        // Re-checking the same treatment keeps the claim id already assigned to it.
        let same_treatment = progress.matches(&policy.policy_number, Some(&treatment));
        let claim_id = progress.claim_id.filter(|_| same_treatment);
        save_progress(
            context,
            &ClaimProgress {
                policy_number: policy.policy_number.clone(),
                treatment: Some(treatment.clone()),
                stage: ClaimStage::EligibilityChecked,
                claim_id,
            },
        )
        .await?;

        Ok(json!({
            "policy_number": policy.policy_number,
            "treatment": treatment,
            "eligible": covered,
            "message": if covered {
                format!("{treatment} is covered under policy {}.", policy.policy_number)
            } else {
                format!("{treatment} is not covered under policy {}.", policy.policy_number)
            }
        }))
    }
}

/// Coverage for a treatment under a policy, once eligibility has been checked for it.
async fn compute_coverage(
    store: &dyn RecordStore,
    context: &Context,
    args: &PolicyTreatmentArgs,
) -> Result<(Treatment, f64, f64), ToolError> {
    let progress = require_progress(
        context,
        &args.policy_number,
        Some(&args.treatment),
        ClaimStage::EligibilityChecked,
    )
    .await?;

    let policy = policy_by_number(store, &args.policy_number).await?;
    let treatment = catalog_entry(store, &args.treatment).await?;
    let percentage = effective_coverage_percentage(&policy, &treatment.test_name);
    let amount = reimbursed_amount(percentage, treatment.cost);

    save_progress(
        context,
        &ClaimProgress {
            policy_number: policy.policy_number,
            treatment: Some(args.treatment.trim().to_string()),
            stage: ClaimStage::CoverageComputed,
            claim_id: Some(progress.claim_id.unwrap_or_else(new_claim_id)),
        },
    )
    .await?;

    Ok((treatment, percentage, amount))
}

pub struct CalculateEstimatedCoverageTool {
    store: Arc<dyn RecordStore>,
}

impl CalculateEstimatedCoverageTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CalculateEstimatedCoverageTool {
    fn name(&self) -> &str {
        "calculate_estimated_coverage"
    }

    fn description(&self) -> &str {
        "Estimate the coverage percentage and reimbursement for a treatment under the given policy."
    }

    fn parameters(&self) -> Value {
        policy_treatment_schema()
    }

    async fn call(&self, arguments: Value, context: &Context) -> Result<Value, ToolError> {
        let args: PolicyTreatmentArgs = parse_arguments(arguments)?;
        let (treatment, percentage, amount) = compute_coverage(self.store.as_ref(), context, &args).await?;
        Ok(json!({
            "coverage_percentage": percentage,
            "treatment": treatment.test_name,
            "total_cost": treatment.cost,
            "estimated_reimbursement": amount,
        }))
    }
}

pub struct CalculateReimbursedAmountTool {
    store: Arc<dyn RecordStore>,
}

impl CalculateReimbursedAmountTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CalculateReimbursedAmountTool {
    fn name(&self) -> &str {
        "calculate_reimbursed_amount"
    }

    fn description(&self) -> &str {
        "Calculate the amount that will be reimbursed for a treatment under the given policy."
    }

    fn parameters(&self) -> Value {
        policy_treatment_schema()
    }

    async fn call(&self, arguments: Value, context: &Context) -> Result<Value, ToolError> {
        let args: PolicyTreatmentArgs = parse_arguments(arguments)?;
        let (treatment, _, amount) = compute_coverage(self.store.as_ref(), context, &args).await?;
        Ok(json!({
            "treatment": treatment.test_name,
            "total_cost": treatment.cost,
            "reimbursed_amount": amount,
        }))
    }
}

pub struct SubmitInsuranceClaimTool {
    store: Arc<dyn RecordStore>,
}

impl SubmitInsuranceClaimTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SubmitInsuranceClaimTool {
    fn name(&self) -> &str {
        "submit_insurance_claim"
    }

    fn description(&self) -> &str {
        "Submit an insurance claim for a treatment. Only after eligibility and coverage have been calculated."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_name": { "type": "string", "description": "Name of the patient" },
                "treatment": { "type": "string", "description": "Name of the treatment or test" }
            },
            "required": ["user_name", "treatment"]
        })
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn call(&self, arguments: Value, context: &Context) -> Result<Value, ToolError> {
        let args: SubmitClaimArgs = parse_arguments(arguments)?;
        let user = resolve_user(self.store.as_ref(), &args.user_name).await?;
        let policy = self
            .store
            .find_policy_by_patient(&user.id)
            .await?
            .ok_or_else(|| ToolError::NotFound("No insurance policy found for this patient.".to_string()))?;

        let progress = require_progress(
            context,
            &policy.policy_number,
            Some(&args.treatment),
            ClaimStage::CoverageComputed,
        )
        .await?;

        // Amounts are recomputed from the current policy and catalog.
        let treatment = catalog_entry(self.store.as_ref(), &args.treatment).await?;
        let percentage = effective_coverage_percentage(&policy, &treatment.test_name);
        let claim = Claim {
            id: progress.claim_id.unwrap_or_else(new_claim_id),
            patient_id: user.id,
            policy_number: policy.policy_number,
            treatment: treatment.test_name,
            coverage_percentage: percentage,
            total_cost: treatment.cost,
            reimbursed_amount: reimbursed_amount(percentage, treatment.cost),
            submitted_at: Utc::now(),
        };
        let claim = self.store.insert_claim(claim).await?;
        context.remove(CLAIM_PROGRESS_KEY).await;

        info!(
            claim_id = %claim.id,
            policy_number = %claim.policy_number,
            reimbursed_amount = claim.reimbursed_amount,
            "Submitted insurance claim"
        );
        Ok(json!({ "claim": claim }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;
    use crate::tools::test_support::seeded_store;

    struct ClaimTools {
        store: Arc<InMemoryRecordStore>,
        fetch: FetchInsurancePolicyTool,
        eligibility: CheckClaimEligibilityTool,
        estimate: CalculateEstimatedCoverageTool,
        reimbursed: CalculateReimbursedAmountTool,
        submit: SubmitInsuranceClaimTool,
    }

    fn claim_tools() -> ClaimTools {
        let store = seeded_store();
        ClaimTools {
            fetch: FetchInsurancePolicyTool::new(store.clone()),
            eligibility: CheckClaimEligibilityTool::new(store.clone()),
            estimate: CalculateEstimatedCoverageTool::new(store.clone()),
            reimbursed: CalculateReimbursedAmountTool::new(store.clone()),
            submit: SubmitInsuranceClaimTool::new(store.clone()),
            store,
        }
    }

    fn policy(percentage: Option<f64>) -> InsurancePolicy {
        InsurancePolicy {
            patient_id: "u1".into(),
            policy_number: "POL-1".into(),
            covered_treatments: vec!["MRI".into()],
            coverage_percentage: percentage,
        }
    }

    #[test]
    fn coverage_is_linear_and_zero_when_uncovered_or_absent() {
        assert_eq!(effective_coverage_percentage(&policy(Some(80.0)), "mri"), 80.0);
        assert_eq!(effective_coverage_percentage(&policy(Some(80.0)), "CT Scan"), 0.0);
        assert_eq!(effective_coverage_percentage(&policy(None), "MRI"), 0.0);

        assert_eq!(reimbursed_amount(80.0, 800.0), 640.0);
        assert_eq!(reimbursed_amount(40.0, 800.0), 320.0);
        assert_eq!(reimbursed_amount(0.0, 800.0), 0.0);
    }

    #[tokio::test]
    async fn full_claim_flow_records_recomputed_amount() {
        let tools = claim_tools();
        let context = Context::new();

        let fetched = tools.fetch.call(json!({ "user_name": "Jane" }), &context).await.unwrap();
        assert_eq!(fetched["policy"]["policy_number"], "POL-1001");

        let args = json!({ "policy_number": "POL-1001", "treatment": "MRI" });
        let eligible = tools.eligibility.call(args.clone(), &context).await.unwrap();
        assert_eq!(eligible["eligible"], true);

        let estimate = tools.estimate.call(args.clone(), &context).await.unwrap();
        assert_eq!(estimate["coverage_percentage"], 80.0);
        assert_eq!(estimate["estimated_reimbursement"], 640.0);

        let reimbursed = tools.reimbursed.call(args, &context).await.unwrap();
        assert_eq!(reimbursed["reimbursed_amount"], 640.0);

        let submitted = tools
            .submit
            .call(json!({ "user_name": "jane", "treatment": "mri" }), &context)
            .await
            .unwrap();
        let claim: Claim = serde_json::from_value(submitted["claim"].clone()).unwrap();
        assert!(claim.id.starts_with("CLAIM-"));
        assert_eq!(claim.treatment, "MRI");
        assert_eq!(claim.reimbursed_amount, 640.0);
        assert_eq!(tools.store.claims().await, vec![claim]);
        assert!(context.get::<ClaimProgress>(CLAIM_PROGRESS_KEY).await.is_none());
    }

    #[tokio::test]
    async fn resubmitting_from_restored_progress_keeps_one_claim() {
        let tools = claim_tools();
        let context = Context::new();
        let args = json!({ "policy_number": "POL-1001", "treatment": "MRI" });

        tools.fetch.call(json!({ "user_name": "jane" }), &context).await.unwrap();
        tools.eligibility.call(args.clone(), &context).await.unwrap();
        tools.estimate.call(args.clone(), &context).await.unwrap();
        tools.reimbursed.call(args.clone(), &context).await.unwrap();
        // re-checking eligibility for the same treatment does not mint a new id
        tools.eligibility.call(args.clone(), &context).await.unwrap();
        tools.estimate.call(args, &context).await.unwrap();
        let before_submit = context.snapshot().await;
        let claim_id = context
            .get::<ClaimProgress>(CLAIM_PROGRESS_KEY)
            .await
            .and_then(|p| p.claim_id)
            .unwrap();

        let submit = json!({ "user_name": "jane", "treatment": "MRI" });
        let first = tools.submit.call(submit.clone(), &context).await.unwrap();
        assert_eq!(first["claim"]["id"], claim_id.as_str());

        // a conversation resumed from before the submission submits again
        let restored = Context::from_snapshot(before_submit);
        let second = tools.submit.call(submit, &restored).await.unwrap();
        assert_eq!(second["claim"]["id"], claim_id.as_str());
        assert_eq!(tools.store.claims().await.len(), 1);
    }

    #[tokio::test]
    async fn non_covered_treatment_claims_zero() {
        let tools = claim_tools();
        let context = Context::new();
        let args = json!({ "policy_number": "POL-1001", "treatment": "X-Ray" });

        tools.fetch.call(json!({ "user_name": "jane" }), &context).await.unwrap();
        let eligible = tools.eligibility.call(args.clone(), &context).await.unwrap();
        assert_eq!(eligible["eligible"], false);
        tools.estimate.call(args, &context).await.unwrap();

        let submitted = tools
            .submit
            .call(json!({ "user_name": "jane", "treatment": "X-Ray" }), &context)
            .await
            .unwrap();
        assert_eq!(submitted["claim"]["reimbursed_amount"], 0.0);
        assert_eq!(submitted["claim"]["coverage_percentage"], 0.0);
    }

    #[tokio::test]
    async fn policy_without_percentage_estimates_zero() {
        let tools = claim_tools();
        let context = Context::new();
        let args = json!({ "policy_number": "POL-2002", "treatment": "X-Ray" });

        tools.fetch.call(json!({ "user_name": "john" }), &context).await.unwrap();
        tools.eligibility.call(args.clone(), &context).await.unwrap();
        let estimate = tools.estimate.call(args, &context).await.unwrap();
        assert_eq!(estimate["coverage_percentage"], 0.0);
        assert_eq!(estimate["estimated_reimbursement"], 0.0);
    }

    #[tokio::test]
    async fn out_of_order_steps_are_precondition_failures() {
        let tools = claim_tools();
        let context = Context::new();
        let args = json!({ "policy_number": "POL-1001", "treatment": "MRI" });

        let err = tools.eligibility.call(args.clone(), &context).await.unwrap_err();
        assert!(matches!(err, ToolError::PreconditionFailed(m) if m.contains("fetch_insurance_policy_details")));

        tools.fetch.call(json!({ "user_name": "jane" }), &context).await.unwrap();
        let err = tools.estimate.call(args.clone(), &context).await.unwrap_err();
        assert!(matches!(err, ToolError::PreconditionFailed(_)));

        tools.eligibility.call(args, &context).await.unwrap();
        let err = tools
            .submit
            .call(json!({ "user_name": "jane", "treatment": "MRI" }), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PreconditionFailed(m) if m.contains("calculate_estimated_coverage")));

        // Coverage computed for a different treatment does not unlock this one.
        let ct = json!({ "policy_number": "POL-1001", "treatment": "CT Scan" });
        let err = tools.estimate.call(ct, &context).await.unwrap_err();
        assert!(matches!(err, ToolError::PreconditionFailed(_)));
        assert!(tools.store.claims().await.is_empty());
    }

    #[tokio::test]
    async fn missing_policy_is_not_found() {
        let tools = claim_tools();
        let err = tools
            .fetch
            .call(json!({ "user_name": "priya" }), &Context::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::NotFound("No insurance policy found for this patient.".to_string())
        );
    }
}
