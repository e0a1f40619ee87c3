//! Caller identity used as the admission key.
//!
//! Carried ambiently in a task-local so deep call paths (handlers, egress)
//! can be limited without threading it through every signature.

use std::future::Future;

use serde::{Deserialize, Serialize};

tokio::task_local! {
    static CURRENT: Identity;
}

/// Owner and optional workflow a request is accounted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Identity {
    /// Owner address (any case, `0x` optional).
    pub owner: String,
    /// Workflow id, when the request belongs to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
}

impl Identity {
    /// Identity of an owner.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            workflow: None,
        }
    }

    /// Attach a workflow id.
    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    /// Identity of the current task, if inside [`scope`].
    pub fn current() -> Option<Identity> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Owner key used for accounting.
    pub fn owner_key(&self) -> String {
        normalize_owner(&self.owner)
    }
}

/// Run `fut` with `identity` as the ambient identity.
pub async fn scope<F: Future>(identity: Identity, fut: F) -> F::Output {
    CURRENT.scope(identity, fut).await
}

/// Strip `0x`/`0X` and lower-case.
pub fn normalize_owner(owner: &str) -> String {
    owner
        .strip_prefix("0x")
        .or_else(|| owner.strip_prefix("0X"))
        .unwrap_or(owner)
        .to_ascii_lowercase()
}
