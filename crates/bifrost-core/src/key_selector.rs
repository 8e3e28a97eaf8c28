//! Weighted, model-gated key selection (§4.C).
//!
//! A provider carries a list of [`Key`]s, each with a weight, an
//! optional model allow-list, and a batch-only marker. Selection excludes
//! disabled keys, keys that don't serve the requested model, batch-only
//! keys for non-batch requests, and keys currently cooling down after an
//! upstream failure (§4.D's `unavailable_cooldown`) — then picks among
//! what's left with probability proportional to weight.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::{Key, KeyId, ProviderConfig};
use crate::error::DispatchError;
use crate::events::{Event, EventHub, UnavailableEndEvent, UnavailableStartEvent};

/// Per-provider cooldown tracking. Shared across all selection calls for
/// that provider; cheap to hold one per [`crate::registry::ProviderRegistry`]
/// entry.
pub struct KeySelector {
    provider: String,
    cooldowns: RwLock<HashMap<KeyId, Instant>>,
    events: EventHub,
}

impl KeySelector {
    pub fn new(provider: impl Into<String>, events: EventHub) -> Self {
        Self {
            provider: provider.into(),
            cooldowns: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Marks `key_id` unavailable for `duration`, emitting the
    /// unavailable-start event (§4.C, §9).
    pub async fn mark_unavailable(&self, key_id: &KeyId, duration: Duration, reason: impl Into<String>) {
        let until = Instant::now() + duration;
        self.cooldowns.write().await.insert(key_id.clone(), until);
        self.events
            .emit(Event::Operational(
                crate::events::OperationalEvent::UnavailableStart(UnavailableStartEvent {
                    provider: self.provider.clone(),
                    key_id: key_id.clone(),
                    reason: reason.into(),
                }),
            ))
            .await;
    }

    async fn is_cooling_down(&self, key_id: &KeyId) -> bool {
        let mut expired = false;
        let cooling_down = {
            let mut cooldowns = self.cooldowns.write().await;
            match cooldowns.get(key_id) {
                Some(until) if *until > Instant::now() => true,
                Some(_) => {
                    cooldowns.remove(key_id);
                    expired = true;
                    false
                }
                None => false,
            }
        };
        if expired {
            self.emit_recovered(key_id).await;
        }
        cooling_down
    }

    async fn emit_recovered(&self, key_id: &KeyId) {
        self.events
            .emit(Event::Operational(
                crate::events::OperationalEvent::UnavailableEnd(UnavailableEndEvent {
                    provider: self.provider.clone(),
                    key_id: key_id.clone(),
                }),
            ))
            .await;
    }

    /// Selects a key for `model`. `is_batch` excludes keys marked
    /// batch-only from serving a non-batch request (and vice versa is not
    /// excluded: a batch-only key still serves a batch request, but a
    /// batch request may also use a general-purpose key).
    pub async fn select<'a>(
        &self,
        config: &'a ProviderConfig,
        model: &str,
        is_batch: bool,
    ) -> Result<&'a Key, DispatchError> {
        let mut candidates: Vec<&Key> = Vec::new();
        for key in &config.keys {
            if !key.enabled {
                continue;
            }
            if key.use_for_batch_api && !is_batch {
                continue;
            }
            if !key.allows_model(model) {
                continue;
            }
            if self.is_cooling_down(&key.id).await {
                continue;
            }
            candidates.push(key);
        }

        if candidates.is_empty() {
            return Err(DispatchError::no_key_available(format!(
                "no enabled, model-matching, available key for provider '{}' model '{}'",
                config.name, model
            )));
        }

        let total_weight: u64 = candidates.iter().map(|k| k.weight as u64).sum();
        let mut roll = rand::rng().random_range(0..total_weight.max(1));
        for key in &candidates {
            let weight = key.weight as u64;
            if roll < weight {
                return Ok(key);
            }
            roll -= weight;
        }
        Ok(candidates[candidates.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn config_with(keys: Vec<Key>) -> ProviderConfig {
        ProviderConfig::new("openai").with_keys(keys)
    }

    #[tokio::test]
    async fn excludes_disabled_and_model_mismatched_keys() {
        let keys = vec![
            Key::new("k1", "n1", "v1").disabled(),
            Key::new("k2", "n2", "v2").with_models(vec!["gpt-4o".into()]),
            Key::new("k3", "n3", "v3").with_models(vec!["gpt-3.5".into()]),
        ];
        let config = config_with(keys);
        let selector = KeySelector::new("openai", EventHub::default());
        let chosen = selector.select(&config, "gpt-3.5", false).await.unwrap();
        assert_eq!(chosen.id.0, "k3");
    }

    #[tokio::test]
    async fn no_key_available_when_everything_excluded() {
        let keys = vec![Key::new("k1", "n1", "v1").disabled()];
        let config = config_with(keys);
        let selector = KeySelector::new("openai", EventHub::default());
        let err = selector.select(&config, "gpt-4o", false).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NoKeyAvailable);
    }

    #[tokio::test]
    async fn batch_only_key_excluded_for_non_batch_request() {
        let keys = vec![Key::new("k1", "n1", "v1").for_batch_api()];
        let config = config_with(keys);
        let selector = KeySelector::new("openai", EventHub::default());
        assert!(selector.select(&config, "gpt-4o", false).await.is_err());
        assert!(selector.select(&config, "gpt-4o", true).await.is_ok());
    }

    #[tokio::test]
    async fn cooled_down_key_excluded_until_expiry() {
        let keys = vec![
            Key::new("k1", "n1", "v1"),
            Key::new("k2", "n2", "v2"),
        ];
        let config = config_with(keys);
        let selector = KeySelector::new("openai", EventHub::default());
        selector
            .mark_unavailable(&KeyId::from("k1"), Duration::from_secs(60), "rate_limited")
            .await;
        for _ in 0..10 {
            let chosen = selector.select(&config, "gpt-4o", false).await.unwrap();
            assert_eq!(chosen.id.0, "k2");
        }
    }

    #[tokio::test]
    async fn expired_cooldown_emits_unavailable_end() {
        let keys = vec![Key::new("k1", "n1", "v1"), Key::new("k2", "n2", "v2")];
        let config = config_with(keys);
        let events = EventHub::default();
        let mut subscriber = events.subscribe();
        let selector = KeySelector::new("openai", events);

        selector
            .mark_unavailable(&KeyId::from("k1"), Duration::from_millis(1), "rate_limited")
            .await;
        // Drain the unavailable-start event so only the recovery event remains.
        let _ = subscriber.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = selector.select(&config, "gpt-4o", false).await.unwrap();

        let event = subscriber.recv().await.unwrap();
        match event {
            Event::Operational(crate::events::OperationalEvent::UnavailableEnd(recovered)) => {
                assert_eq!(recovered.key_id.0, "k1");
            }
            other => panic!("expected an UnavailableEnd event, got {other:?}"),
        }
    }
}
