use therapaw_core::{ChatAgent, ChatError, ChatMessage, SessionManager};

/// Pick the report to ground the chat in: the one sent by the client, or the
/// analysis stored under `session_id`.
pub async fn resolve_report(
    report: Option<String>,
    session_id: Option<&str>,
    sessions: &SessionManager,
) -> Option<String> {
    if let Some(report) = report.filter(|r| !r.trim().is_empty()) {
        return Some(report);
    }
    let session_id = session_id.filter(|id| !id.is_empty())?;
    sessions
        .retrieve(session_id)
        .await
        .map(|record| record.analysis().to_string())
}

pub async fn consult(
    agent: &dyn ChatAgent,
    report: &str,
    messages: &[ChatMessage],
) -> Result<String, ChatError> {
    let reply = agent.reply(report, messages).await?;
    tracing::info!(backend = agent.name(), turns = messages.len(), "Chat reply received");
    Ok(reply)
}
