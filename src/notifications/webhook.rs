use crate::error::{AppError, Result};
use crate::models::{Incident, IncidentAction};
use crate::notifications::{WorkflowContext, WorkflowDispatcher, WorkflowEvent};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

/// Posts workflow events as JSON to a fixed URL
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: Client,
    url: String,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event_type: String,
    #[serde(flatten)]
    event: &'a WorkflowEvent,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout_secs,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send HTTP POST request to the webhook URL
    async fn post(&self, event: &WorkflowEvent) -> Result<String> {
        let payload = WebhookPayload {
            event_type: event.event_type(),
            event,
        };

        let response = self
            .client
            .post(&self.url)
            .header("User-Agent", concat!("topology-incident-manager/", env!("CARGO_PKG_VERSION")))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!(
                        "Webhook request timed out after {} seconds",
                        self.timeout_secs
                    ))
                } else if e.is_connect() {
                    AppError::Notification(format!("Failed to connect to webhook URL: {}", e))
                } else {
                    AppError::Notification(format!("Webhook request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(AppError::Notification(format!(
                "Webhook returned non-success status {}: {}",
                status,
                if body.is_empty() { "No response body" } else { &body }
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl WorkflowDispatcher for WebhookDispatcher {
    async fn send_workflow_event(
        &self,
        tenant_id: &str,
        context: &WorkflowContext,
        incident: &Incident,
        action: IncidentAction,
    ) -> Result<()> {
        let event = WorkflowEvent::new(tenant_id, context, incident, action);

        match self.post(&event).await {
            Ok(body) => {
                info!(
                    incident_id = %incident.id,
                    action = %action,
                    url = %self.url,
                    response_length = body.len(),
                    "Workflow webhook sent"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    incident_id = %incident.id,
                    action = %action,
                    url = %self.url,
                    error = %e,
                    "Failed to send workflow webhook"
                );
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewIncident;
    use uuid::Uuid;

    #[test]
    fn test_webhook_dispatcher_creation() {
        let dispatcher = WebhookDispatcher::new("https://example.com/hook", 5).unwrap();
        assert_eq!(dispatcher.url(), "https://example.com/hook");
        assert_eq!(dispatcher.name(), "webhook");
    }

    #[test]
    fn test_payload_shape() {
        let app_id = Uuid::new_v4();
        let incident = NewIncident::for_application("t", app_id, "App", Vec::new())
            .into_incident(Uuid::new_v4());
        let context = WorkflowContext {
            application_id: app_id,
            application_name: "App".to_string(),
            impacted_services: vec!["api".to_string()],
            attached_alerts: 1,
        };
        let event = WorkflowEvent::new("t", &context, &incident, IncidentAction::Updated);

        let payload = WebhookPayload {
            event_type: event.event_type(),
            event: &event,
        };
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["event_type"], "incident.updated");
        assert_eq!(json["action"], "updated");
        assert_eq!(json["tenant_id"], "t");
        assert!(json["timestamp"].is_string());
        assert_eq!(json["incident"]["incident_type"], "topology");
        assert_eq!(json["context"]["application_name"], "App");
    }
}
