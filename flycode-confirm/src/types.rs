use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl ConfirmationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ConfirmationStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationEntry {
    pub id: String,
    pub site: String,
    pub tool: String,
    pub summary: String,
    pub status: ConfirmationStatus,
    pub trace_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub resolved_at: Option<i64>,
    #[serde(skip)]
    pub request: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CreatePendingInput {
    pub site: String,
    pub tool: String,
    pub summary: String,
    pub trace_id: String,
    pub request: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveInput {
    pub approved: bool,
    pub always_allow: bool,
}
