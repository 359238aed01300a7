//! The three specialised agents and the swarm that routes between them.

use std::sync::Arc;
use swarm_flow::{Agent, ModelClient, Swarm, SwarmBuilder};

use crate::config::Config;
use crate::store::RecordStore;
use crate::tools::{
    BookTestsTool, CalculateEstimatedCoverageTool, CalculateReimbursedAmountTool,
    CheckClaimEligibilityTool, FetchBookedTestsTool, FetchInsurancePolicyTool, FetchReportTool,
    FetchTestsTool, SubmitInsuranceClaimTool,
};

pub const REPORT_ANALYST: &str = "report_analyst";
pub const BOOK_TEST: &str = "book_test";
pub const CHECK_INSURANCE: &str = "check_insurance";

const REPORT_ANALYST_INSTRUCTION: &str = "\
You fetch and analyse the user's medical reports. Always introduce yourself when greeted.

Responsibilities:
- Fetch the user's medical reports with fetch_report. Ask for the user's name if you do not know it.
- Summarise them in a structured way: key findings, abnormal values or concerns, and recommended follow-ups.
- Organise multiple reports clearly, one section per report.
- If no reports are found, say so and suggest next steps.

Handoffs:
- If the summary shows that further tests are needed, or the user asks to book tests, hand off to book_test.
- If the user asks about insurance coverage for tests or treatments, hand off to check_insurance.

Keep a professional and supportive tone.";

const BOOK_TEST_INSTRUCTION: &str = "\
You book medical tests from the catalog in the database.

Responsibilities:
- Always call fetch_tests before booking so you only book tests that exist.
- Book the tests the user asks for with book_tests, passing the exact catalog names.
- Use fetch_booked_tests when the user asks what has already been booked.
- Give pre-test instructions for each booked test, such as fasting or other preparation.

Booking guidelines:
- Always share the booking id after a successful booking.
- After booking, ask the user about insurance and hand off to check_insurance if they want coverage checked.
- If a medical report needs further analysis, hand off to report_analyst.
- If a requested test is not available, say so and suggest alternatives from the catalog.";

const CHECK_INSURANCE_INSTRUCTION: &str = "\
You help users with their medical insurance coverage and claims.

Always fetch the policy details first with fetch_insurance_policy_details when they are needed and missing.
- To check coverage: fetch the policy, check claim eligibility, then calculate the estimated coverage.
- To check the reimbursed amount: fetch the policy, check claim eligibility, then calculate the reimbursed amount.
- To submit a claim: fetch the policy, check claim eligibility, calculate the estimated coverage, then submit the claim.

Call the tools in exactly this order. If a tool reports a precondition failure, run the missing step first.
If the user wants tests booked, hand off to book_test. For questions about medical reports, hand off to report_analyst.";

pub fn report_analyst(store: Arc<dyn RecordStore>) -> Agent {
    Agent::new(REPORT_ANALYST, REPORT_ANALYST_INSTRUCTION)
        .with_tool(Arc::new(FetchReportTool::new(store)))
        .with_handoff(BOOK_TEST, "Books medical tests, including tests a report suggests")
        .with_handoff(CHECK_INSURANCE, "Answers insurance coverage questions and files claims")
}

pub fn book_test(store: Arc<dyn RecordStore>) -> Agent {
    Agent::new(BOOK_TEST, BOOK_TEST_INSTRUCTION)
        .with_tool(Arc::new(FetchTestsTool::new(store.clone())))
        .with_tool(Arc::new(BookTestsTool::new(store.clone())))
        .with_tool(Arc::new(FetchBookedTestsTool::new(store)))
        .with_handoff(REPORT_ANALYST, "Fetches and analyses medical reports")
        .with_handoff(CHECK_INSURANCE, "Answers insurance coverage questions and files claims")
}

pub fn check_insurance(store: Arc<dyn RecordStore>) -> Agent {
    Agent::new(CHECK_INSURANCE, CHECK_INSURANCE_INSTRUCTION)
        .with_tool(Arc::new(FetchInsurancePolicyTool::new(store.clone())))
        .with_tool(Arc::new(CheckClaimEligibilityTool::new(store.clone())))
        .with_tool(Arc::new(CalculateEstimatedCoverageTool::new(store.clone())))
        .with_tool(Arc::new(CalculateReimbursedAmountTool::new(store.clone())))
        .with_tool(Arc::new(SubmitInsuranceClaimTool::new(store)))
        .with_handoff(REPORT_ANALYST, "Fetches and analyses medical reports")
        .with_handoff(BOOK_TEST, "Books medical tests")
}

pub fn build_swarm(
    store: Arc<dyn RecordStore>,
    model: Arc<dyn ModelClient>,
    config: &Config,
) -> swarm_flow::Result<Swarm> {
    SwarmBuilder::new("medical_assistant")
        .add_agent(report_analyst(store.clone()))
        .add_agent(book_test(store.clone()))
        .add_agent(check_insurance(store))
        .set_default_agent(config.default_agent.clone())
        .with_model(model)
        .max_steps(config.max_steps)
        .retry_policy(config.retry.clone())
        .build()
}
