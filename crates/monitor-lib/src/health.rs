//! Collaborator health for the liveness and readiness endpoints
//!
//! The monitoring cycle reports on each collaborator after every cycle:
//! - `snapshot_source` is degraded after a failed pull and unhealthy after
//!   several consecutive failures
//! - `history_store` is degraded when some writes fail and unhealthy when every
//!   write of a cycle fails
//! - `alert_sink` is degraded while deliveries fail
//!
//! Any unhealthy component fails both `/healthz` and `/readyz`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    pub const SNAPSHOT_SOURCE: &str = "snapshot_source";
    pub const HISTORY_STORE: &str = "history_store";
    pub const ALERT_SINK: &str = "alert_sink";
}

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing intermittently; cycles keep running
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Last reported state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last report
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Overall status is the worst component status
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared registry of component health; clones share state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.report(name, ComponentHealth::healthy()).await;
    }

    /// Record the latest state of a component
    pub async fn report(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.report(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        let health = ComponentHealth::new(ComponentStatus::Degraded, Some(message.into()));
        self.report(name, health).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        let health = ComponentHealth::new(ComponentStatus::Unhealthy, Some(message.into()));
        self.report(name, health).await;
    }

    /// Flip once startup wiring is complete
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.state.read().await.components.get(name).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let components: HashMap<String, ComponentHealth> = state
            .components
            .iter()
            .map(|(name, health)| (name.clone(), health.clone()))
            .collect();

        HealthResponse {
            status: HealthResponse::compute_status(&components),
            components,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Monitor not yet initialized".to_string()),
            };
        }

        let failing: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, health)| !health.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();

        if failing.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy: {}", failing.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::SNAPSHOT_SOURCE).await;
        registry.register(components::HISTORY_STORE).await;
        registry.register(components::ALERT_SINK).await;

        registry
            .set_degraded(components::SNAPSHOT_SOURCE, "export unreadable")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
        assert_eq!(
            registry
                .component(components::SNAPSHOT_SOURCE)
                .await
                .unwrap()
                .message
                .as_deref(),
            Some("export unreadable")
        );

        registry
            .set_unhealthy(components::ALERT_SINK, "webhook unreachable")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_components() {
        let registry = HealthRegistry::new();
        registry.register(components::SNAPSHOT_SOURCE).await;
        registry.register(components::HISTORY_STORE).await;
        registry.set_ready(true).await;

        registry
            .set_degraded(components::SNAPSHOT_SOURCE, "one failed pull")
            .await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::HISTORY_STORE, "disk full")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Unhealthy: history_store"));

        registry.set_healthy(components::HISTORY_STORE).await;
        assert!(registry.readiness().await.ready);
    }
}
