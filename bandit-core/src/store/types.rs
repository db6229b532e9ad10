//! Records kept in the metadata store

use serde::{Deserialize, Serialize};

/// Whether an experiment's current model is live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostingState {
    Pending,
    Deployed,
}

impl std::fmt::Display for HostingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Deployed => write!(f, "DEPLOYED"),
        }
    }
}

/// Hosting hints written by the deployment pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingWorkflowMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_model_to_host_id: Option<String>,
}

/// One experiment, keyed by `experiment_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub experiment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hostable_model_id: Option<String>,
    #[serde(default)]
    pub hosting_workflow_metadata: HostingWorkflowMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosting_state: Option<HostingState>,
}

impl ExperimentRecord {
    pub fn new(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            next_hostable_model_id: None,
            hosting_workflow_metadata: HostingWorkflowMetadata::default(),
            hosting_state: None,
        }
    }

    #[must_use]
    pub fn with_next_model_to_host(mut self, model_id: impl Into<String>) -> Self {
        self.hosting_workflow_metadata.next_model_to_host_id = Some(model_id.into());
        self
    }

    /// Model the deployment pipeline wants hosted next, if any
    pub fn next_model_to_host(&self) -> Option<&str> {
        self.hosting_workflow_metadata
            .next_model_to_host_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// One trained model, keyed by `(experiment_id, model_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub experiment_id: String,
    pub model_id: String,
    /// Artifact bundle location, `scheme://bucket/key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_model_output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosting_state: Option<HostingState>,
}

impl ModelRecord {
    pub fn new(experiment_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            model_id: model_id.into(),
            s3_model_output_path: None,
            hosting_state: None,
        }
    }

    #[must_use]
    pub fn with_artifact_uri(mut self, uri: impl Into<String>) -> Self {
        self.s3_model_output_path = Some(uri.into());
        self
    }

    /// Artifact location, ignoring empty values
    pub fn artifact_uri(&self) -> Option<&str> {
        self.s3_model_output_path
            .as_deref()
            .filter(|uri| !uri.is_empty())
    }
}
