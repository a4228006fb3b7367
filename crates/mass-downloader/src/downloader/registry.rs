//! Provider registry
//!
//! Turns an ordered list of provider identifiers into the providers usable
//! for a run. Every identifier is initialized concurrently through a
//! [`ProviderConnector`]; failures, timeouts and providers lacking a required
//! service are logged and dropped without affecting the others. The result
//! keeps the caller's order, which is the download priority.

use crate::downloader::core::{emit, AcquisitionEvent, ProgressCallback};
use crate::downloader::sources::{ProviderClient, ProviderConnector, REQUIRED_SERVICES, URL_MAPPINGS};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Always tried first when no explicit list is given
pub const PREFERRED_PROVIDER: &str = "IRIS";
/// Always tried last; it serves metadata for European stations whose data it does not hold
pub const LOW_PRIORITY_PROVIDER: &str = "ORFEUS";

/// Catalog providers in default priority order
pub fn default_provider_order() -> Vec<String> {
    let mut middle: Vec<String> = URL_MAPPINGS
        .keys()
        .filter(|name| **name != PREFERRED_PROVIDER && **name != LOW_PRIORITY_PROVIDER)
        .map(|name| name.to_string())
        .collect();
    middle.sort();

    let mut order = Vec::with_capacity(middle.len() + 2);
    order.push(PREFERRED_PROVIDER.to_string());
    order.extend(middle);
    order.push(LOW_PRIORITY_PROVIDER.to_string());
    order
}

/// A usable provider
#[derive(Clone)]
pub struct Provider {
    pub name: String,
    pub client: Arc<dyn ProviderClient>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("services", self.client.services())
            .finish()
    }
}

/// Ordered set of initialized providers
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an already initialized client
    ///
    /// Clients lacking a required service are skipped with a warning.
    pub fn register(mut self, client: Arc<dyn ProviderClient>) -> Self {
        match missing_services(client.as_ref()) {
            None => self.providers.push(Provider {
                name: client.name().to_string(),
                client,
            }),
            Some(reason) => warn!("Skipping client '{}': {}", client.name(), reason),
        }
        self
    }

    /// Initialize providers concurrently, keeping the order of `providers`
    ///
    /// `None` uses [`default_provider_order`]. Duplicate identifiers are
    /// initialized once, at their first position.
    pub async fn initialize(
        providers: Option<Vec<String>>,
        connector: &dyn ProviderConnector,
        init_timeout: Duration,
        progress: Option<&ProgressCallback>,
    ) -> Self {
        let mut seen = HashSet::new();
        let ids: Vec<String> = providers
            .unwrap_or_else(default_provider_order)
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            return Self::new();
        }

        // Worker results land in the slot of their input position
        let mut slots: Vec<Option<Arc<dyn ProviderClient>>> = vec![None; ids.len()];
        let outcomes: Vec<(usize, Result<Arc<dyn ProviderClient>, String>)> = stream::iter(ids.iter().enumerate())
            .map(|(index, id)| async move {
                let outcome = match tokio::time::timeout(init_timeout, connector.connect(id)).await {
                    Ok(Ok(client)) => match missing_services(client.as_ref()) {
                        None => Ok(client),
                        Some(reason) => Err(reason),
                    },
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("timeout".to_string()),
                };
                (index, outcome)
            })
            .buffer_unordered(ids.len())
            .collect()
            .await;

        for (index, outcome) in outcomes {
            match outcome {
                Ok(client) => slots[index] = Some(client),
                Err(reason) => {
                    warn!("Failed to initialize client '{}'. ({})", ids[index], reason);
                    emit(progress, AcquisitionEvent::ProviderRejected {
                        provider: ids[index].clone(),
                        reason,
                    });
                }
            }
        }

        let providers: Vec<Provider> = ids
            .into_iter()
            .zip(slots)
            .filter_map(|(name, slot)| slot.map(|client| Provider { name, client }))
            .collect();

        for provider in &providers {
            emit(progress, AcquisitionEvent::ProviderInitialized {
                provider: provider.name.clone(),
                services: provider.client.services().iter().cloned().collect(),
            });
        }
        info!(
            "Successfully initialized {} client(s): {}.",
            providers.len(),
            providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        Self { providers }
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Reason a client cannot serve a run, `None` if it can
fn missing_services(client: &dyn ProviderClient) -> Option<String> {
    let missing: Vec<&str> = REQUIRED_SERVICES
        .iter()
        .copied()
        .filter(|service| !client.supports(service))
        .collect();
    (!missing.is_empty()).then(|| format!("does not offer the '{}' service(s)", missing.join("', '")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order_policy() {
        let order = default_provider_order();
        assert_eq!(order.first().map(String::as_str), Some(PREFERRED_PROVIDER));
        assert_eq!(order.last().map(String::as_str), Some(LOW_PRIORITY_PROVIDER));

        let middle = &order[1..order.len() - 1];
        let mut sorted = middle.to_vec();
        sorted.sort();
        assert_eq!(middle, sorted.as_slice());
        assert_eq!(order.len(), URL_MAPPINGS.len());
    }
}
