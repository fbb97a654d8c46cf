//! Run identity for correlating pipeline executions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifies one top-level pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID of this pipeline run.
    pub pipeline_run_id: Uuid,

    /// The request ID, for request-scoped tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl RunIdentity {
    /// Creates a run identity with a generated pipeline run ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pipeline_run_id(Uuid::new_v4())
    }

    /// Creates a run identity with a specific pipeline run ID.
    #[must_use]
    pub fn with_pipeline_run_id(pipeline_run_id: Uuid) -> Self {
        Self {
            pipeline_run_id,
            request_id: None,
        }
    }

    /// Sets the request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Converts to a dictionary with string values (or null).
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert(
            "pipeline_run_id".to_string(),
            serde_json::json!(self.pipeline_run_id.to_string()),
        );
        map.insert(
            "request_id".to_string(),
            self.request_id
                .map_or(serde_json::Value::Null, |id| serde_json::json!(id.to_string())),
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_distinct_ids() {
        assert_ne!(
            RunIdentity::new().pipeline_run_id,
            RunIdentity::new().pipeline_run_id
        );
    }

    #[test]
    fn test_to_dict() {
        let request_id = Uuid::new_v4();
        let identity = RunIdentity::new().with_request_id(request_id);
        let dict = identity.to_dict();

        assert_eq!(
            dict["pipeline_run_id"],
            serde_json::json!(identity.pipeline_run_id.to_string())
        );
        assert_eq!(dict["request_id"], serde_json::json!(request_id.to_string()));
        assert!(RunIdentity::new().to_dict()["request_id"].is_null());
    }

    #[test]
    fn test_serialization_skips_missing_request_id() {
        let identity = RunIdentity::new();
        let json = serde_json::to_value(identity).unwrap();
        assert!(json.get("request_id").is_none());

        let back: RunIdentity = serde_json::from_value(json).unwrap();
        assert_eq!(back, identity);
    }
}
