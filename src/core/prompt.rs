use super::store::types::JobType;

/// Fixed structured-output contract appended to every prompt. The response
/// parser depends on this exact shape being the last thing in the agent's
/// final message.
const OUTPUT_CONTRACT: &str = "\n\nWhen you are done, end your response with a fenced JSON block of exactly this shape, \
even if there are no findings:\n\
```json\n\
{\"summary\": \"<one-sentence summary of what you found>\", \"findings\": [{\"type\": \"info|warning|error|success\", \"title\": \"<short title>\", \"description\": \"<optional detail>\", \"metric\": \"<optional metric name>\", \"value\": \"<optional metric value>\"}]}\n\
```";

fn configured_services(config: &serde_json::Value) -> Option<String> {
    let services: Vec<&str> = config
        .get("services")?
        .as_array()?
        .iter()
        .filter_map(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .collect();
    if services.is_empty() {
        None
    } else {
        Some(services.join(", "))
    }
}

/// Render the job-type-specific instruction for the agent, always terminated
/// by the structured-output contract.
pub fn build_prompt(
    job_type: JobType,
    schedule_interval_minutes: i64,
    config: &serde_json::Value,
) -> String {
    let body = match job_type {
        JobType::DeploymentWatcher => {
            let lookback = 2 * schedule_interval_minutes;
            format!(
                "You are running a scheduled deployment watch.\n\
                 Look for deployments in the last {lookback} minutes.\n\
                 - If there were no deployments, report a single 'info' finding saying so.\n\
                 - For each deployment that finished at least 10 minutes ago, compare error rate \
                 and latency before and after the deploy. Do not judge a deployment younger than \
                 10 minutes; note it as 'info' and move on.\n\
                 - No regressions: report a 'success' finding per deployment.\n\
                 - Regressions: report 'warning' for moderate degradation and 'error' for severe \
                 degradation, with the metric and observed values."
            )
        }
        JobType::HealthCheck => {
            let targets = configured_services(config)
                .unwrap_or_else(|| "all monitored services".to_string());
            format!(
                "You are running a scheduled health check on: {targets}.\n\
                 For each service, over the last 15 minutes check:\n\
                 - error rate\n\
                 - P95 latency\n\
                 - any new error patterns in the logs\n\
                 Grade each service: 'success' when healthy, 'info' for minor observations, \
                 'warning' for degradation worth watching, 'error' for active problems."
            )
        }
        JobType::ErrorScanner => {
            format!(
                "You are running a scheduled error scan.\n\
                 Scan the logs from the last {schedule_interval_minutes} minutes. Group similar \
                 errors together and flag only error patterns that are genuinely new, or existing \
                 patterns with a significant increase in volume. Known, steady background errors \
                 are not findings.\n\
                 If nothing new turned up, report a single 'success' finding titled \
                 'No new error patterns'."
            )
        }
        JobType::BaselineBuilder => "You are collecting a performance baseline.\n\
             For each active service, record the current:\n\
             - error rate\n\
             - latency percentiles (P50, P95, P99)\n\
             - request rate\n\
             - CPU and memory usage\n\
             Report each measurement as an 'info' finding with the metric name and value."
            .to_string(),
        JobType::Custom => config
            .get("prompt")
            .and_then(|p| p.as_str())
            .filter(|p| !p.trim().is_empty())
            .map(|p| p.to_string())
            .unwrap_or_else(|| {
                "Run a general health check across the monitored infrastructure and report \
                 anything noteworthy."
                    .to_string()
            }),
    };

    format!("{}{}", body, OUTPUT_CONTRACT)
}
