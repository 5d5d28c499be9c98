//! Workflow event dispatch for topology incidents.

pub mod dispatcher;
pub mod webhook;

pub use dispatcher::{BroadcastDispatcher, DispatchStats, FanoutDispatcher};
pub use webhook::WebhookDispatcher;

use crate::error::Result;
use crate::models::{Incident, IncidentAction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the processor knew when it raised the event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub application_id: Uuid,
    pub application_name: String,
    /// Member services with firing alerts in this pass
    pub impacted_services: Vec<String>,
    /// Associations written in this pass
    pub attached_alerts: usize,
}

/// Event delivered to workflow consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub action: IncidentAction,
    pub incident: Incident,
    pub context: WorkflowContext,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(
        tenant_id: &str,
        context: &WorkflowContext,
        incident: &Incident,
        action: IncidentAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            action,
            incident: incident.clone(),
            context: context.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Event type string, e.g. `incident.created`
    pub fn event_type(&self) -> String {
        format!("incident.{}", self.action)
    }
}

/// Receiver of incident workflow events
#[async_trait]
pub trait WorkflowDispatcher: Send + Sync {
    async fn send_workflow_event(
        &self,
        tenant_id: &str,
        context: &WorkflowContext,
        incident: &Incident,
        action: IncidentAction,
    ) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
