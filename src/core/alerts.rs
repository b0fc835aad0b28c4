use super::store::types::{Finding, FindingType, NotifyOn};

/// Outcome of the alert policy for one run.
///
/// `alert_sent` records that the alert conditions were met and a Slack
/// channel existed; actual delivery is performed by the agent (it receives
/// the Slack credentials in its run input), so this is a prediction, not a
/// delivery receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDecision {
    pub should_alert: bool,
    pub alert_sent: bool,
    pub severity: Option<String>,
}

/// Pure mapping of findings + notification policy + channel availability to
/// an alert decision. No I/O.
pub fn decide(findings: &[Finding], notify_on: NotifyOn, has_slack: bool) -> AlertDecision {
    let has_error = findings.iter().any(|f| f.kind == FindingType::Error);
    let has_issues = has_error || findings.iter().any(|f| f.kind == FindingType::Warning);

    let should_alert = match notify_on {
        NotifyOn::Always => true,
        NotifyOn::Issues => has_issues,
        NotifyOn::Never => false,
    };

    let severity = if !should_alert {
        None
    } else if has_error {
        Some("error".to_string())
    } else if has_issues {
        Some("warning".to_string())
    } else {
        None
    };

    AlertDecision {
        should_alert,
        alert_sent: should_alert && has_slack,
        severity,
    }
}
