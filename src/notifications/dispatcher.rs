use crate::error::{AppError, Result};
use crate::models::{Incident, IncidentAction};
use crate::notifications::{WorkflowContext, WorkflowDispatcher, WorkflowEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Delivery counters kept by a dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u64,
    pub failed: u64,
}

/// In-process dispatcher publishing events on a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastDispatcher {
    sender: broadcast::Sender<WorkflowEvent>,
    stats: Arc<RwLock<DispatchStats>>,
}

impl BroadcastDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            stats: Arc::new(RwLock::new(DispatchStats::default())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.read()
    }
}

#[async_trait]
impl WorkflowDispatcher for BroadcastDispatcher {
    async fn send_workflow_event(
        &self,
        tenant_id: &str,
        context: &WorkflowContext,
        incident: &Incident,
        action: IncidentAction,
    ) -> Result<()> {
        let event = WorkflowEvent::new(tenant_id, context, incident, action);

        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(
                    incident_id = %incident.id,
                    action = %action,
                    receivers = receivers,
                    "Workflow event published"
                );
            }
            Err(_) => {
                tracing::debug!(incident_id = %incident.id, "No workflow event subscribers");
            }
        }

        self.stats.write().sent += 1;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "broadcast"
    }
}

/// Sends each event to every inner dispatcher
///
/// All dispatchers are attempted; the first failure is returned afterwards.
#[derive(Clone, Default)]
pub struct FanoutDispatcher {
    dispatchers: Vec<Arc<dyn WorkflowDispatcher>>,
    stats: Arc<RwLock<DispatchStats>>,
}

impl FanoutDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dispatcher: Arc<dyn WorkflowDispatcher>) -> Self {
        self.dispatchers.push(dispatcher);
        self
    }

    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.read()
    }
}

#[async_trait]
impl WorkflowDispatcher for FanoutDispatcher {
    async fn send_workflow_event(
        &self,
        tenant_id: &str,
        context: &WorkflowContext,
        incident: &Incident,
        action: IncidentAction,
    ) -> Result<()> {
        let mut first_error: Option<AppError> = None;

        for dispatcher in &self.dispatchers {
            match dispatcher
                .send_workflow_event(tenant_id, context, incident, action)
                .await
            {
                Ok(()) => self.stats.write().sent += 1,
                Err(e) => {
                    self.stats.write().failed += 1;
                    tracing::warn!(
                        dispatcher = dispatcher.name(),
                        incident_id = %incident.id,
                        error = %e,
                        "Workflow dispatcher failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewIncident;
    use uuid::Uuid;

    fn sample() -> (WorkflowContext, Incident) {
        let app_id = Uuid::new_v4();
        let incident = NewIncident::for_application("t", app_id, "App", vec!["api".to_string()])
            .into_incident(Uuid::new_v4());
        let context = WorkflowContext {
            application_id: app_id,
            application_name: "App".to_string(),
            impacted_services: vec!["api".to_string(), "db".to_string()],
            attached_alerts: 2,
        };
        (context, incident)
    }

    struct FailingDispatcher;

    #[async_trait]
    impl WorkflowDispatcher for FailingDispatcher {
        async fn send_workflow_event(
            &self,
            _tenant_id: &str,
            _context: &WorkflowContext,
            _incident: &Incident,
            _action: IncidentAction,
        ) -> Result<()> {
            Err(AppError::Notification("down".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_event() {
        let dispatcher = BroadcastDispatcher::new(8);
        let mut rx = dispatcher.subscribe();
        let (context, incident) = sample();

        dispatcher
            .send_workflow_event("t", &context, &incident, IncidentAction::Created)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.tenant_id, "t");
        assert_eq!(event.action, IncidentAction::Created);
        assert_eq!(event.incident.id, incident.id);
        assert_eq!(event.event_type(), "incident.created");
        assert_eq!(dispatcher.stats().sent, 1);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let dispatcher = BroadcastDispatcher::new(8);
        let (context, incident) = sample();

        assert!(dispatcher
            .send_workflow_event("t", &context, &incident, IncidentAction::Updated)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_fanout_attempts_all_and_reports_failure() {
        let broadcast = BroadcastDispatcher::new(8);
        let mut rx = broadcast.subscribe();
        let fanout = FanoutDispatcher::new()
            .with(Arc::new(FailingDispatcher))
            .with(Arc::new(broadcast));
        let (context, incident) = sample();

        let result = fanout
            .send_workflow_event("t", &context, &incident, IncidentAction::Created)
            .await;

        assert!(matches!(result, Err(AppError::Notification(_))));
        assert!(rx.recv().await.is_ok());
        assert_eq!(fanout.stats(), DispatchStats { sent: 1, failed: 1 });
    }
}
