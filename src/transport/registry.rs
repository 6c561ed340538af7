//! Thread-safe name → transport cache with bulk, change-detecting updates.
//!
//! [`TransportRegistry::update`] takes the complete set of definitions. Each
//! name is evaluated on its own: unchanged definitions keep their transport
//! (and its warm connection pool), changed or new ones are rebuilt, and
//! names missing from the new set are evicted. A definition that fails to
//! build is served by the default transport and marked degraded. Its config
//! is not recorded as applied, so the next update retries it.
//!
//! Callers get an `Arc<Transport>` from [`TransportRegistry::get`]. An update
//! swaps entries for new requests while in-flight requests finish on the
//! transport they already hold.
//!
//! Building reads PEM files, so it runs on the blocking pool before the
//! entries are locked for writing. Lookups keep being served meanwhile.
//! Updates are serialized with each other.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::{Transport, TransportFactory};
use crate::config::model::{ServersTransport, TransportConfigs};
use crate::error::TransportError;

struct Entry {
    transport: Arc<Transport>,
    /// The definition `transport` was built from. `None` when the build
    /// failed and the default transport stands in.
    applied: Option<ServersTransport>,
}

impl Entry {
    fn is_current(&self, config: Option<&ServersTransport>) -> bool {
        matches!((&self.applied, config), (Some(applied), Some(config)) if applied == config)
    }
}

/// Counts from one [`TransportRegistry::update`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub added: usize,
    pub rebuilt: usize,
    pub reused: usize,
    pub evicted: usize,
    pub degraded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportStatus {
    pub name: String,
    pub degraded: bool,
}

type Built = (String, Option<ServersTransport>, Result<Transport, TransportError>);

pub struct TransportRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    updating: Mutex<()>,
    factory: TransportFactory,
    fallback: Arc<Transport>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new(TransportFactory::new())
    }
}

impl TransportRegistry {
    #[must_use]
    pub fn new(factory: TransportFactory) -> Self {
        let fallback = Arc::new(factory.default_transport());
        Self {
            entries: RwLock::new(HashMap::new()),
            updating: Mutex::new(()),
            factory,
            fallback,
        }
    }

    /// Replace the registered definitions with `configs`.
    pub async fn update(&self, configs: &TransportConfigs) -> UpdateSummary {
        let _updating = self.updating.lock().await;
        let mut summary = UpdateSummary::default();

        let stale: Vec<(String, Option<ServersTransport>)> = {
            let entries = self.entries.read().await;
            configs
                .iter()
                .filter(|(name, config)| {
                    !entries
                        .get(*name)
                        .is_some_and(|entry| entry.is_current(config.as_ref()))
                })
                .map(|(name, config)| (name.clone(), config.clone()))
                .collect()
        };
        summary.reused = configs.len() - stale.len();
        let built = self.build_all(stale).await;

        let mut entries = self.entries.write().await;
        entries.retain(|name, _| {
            let keep = configs.contains_key(name);
            if !keep {
                tracing::info!(name = %name, "servers transport removed");
                summary.evicted += 1;
            }
            keep
        });

        for (name, config, result) in built {
            let entry = match result {
                Ok(transport) => Entry {
                    transport: Arc::new(transport),
                    applied: config,
                },
                Err(e) => {
                    tracing::error!(
                        name = %name,
                        error = %e,
                        "create servers transport failed, using default transport"
                    );
                    summary.degraded += 1;
                    Entry {
                        transport: Arc::clone(&self.fallback),
                        applied: None,
                    }
                }
            };

            if entries.insert(name, entry).is_some() {
                summary.rebuilt += 1;
            } else {
                summary.added += 1;
            }
        }
        drop(entries);

        tracing::info!(
            added = summary.added,
            rebuilt = summary.rebuilt,
            reused = summary.reused,
            evicted = summary.evicted,
            degraded = summary.degraded,
            "servers transports updated"
        );
        summary
    }

    async fn build_all(&self, pending: Vec<(String, Option<ServersTransport>)>) -> Vec<Built> {
        if pending.is_empty() {
            return Vec::new();
        }

        let factory = self.factory.clone();
        let requested = pending.clone();
        let building = tokio::task::spawn_blocking(move || {
            pending
                .into_iter()
                .map(|(name, config)| {
                    let result = factory.build(config.as_ref());
                    (name, config, result)
                })
                .collect::<Vec<Built>>()
        });

        match building.await {
            Ok(built) => built,
            Err(e) => {
                let reason = e.to_string();
                requested
                    .into_iter()
                    .map(|(name, config)| {
                        (name, config, Err(TransportError::BuildAborted(reason.clone())))
                    })
                    .collect()
            }
        }
    }

    pub async fn get(&self, name: &str) -> Result<Arc<Transport>, TransportError> {
        if name.is_empty() {
            return Err(TransportError::EmptyName);
        }

        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|entry| Arc::clone(&entry.transport))
            .ok_or_else(|| TransportError::NotFound(name.to_string()))
    }

    /// Registered names with their degraded flag, sorted by name.
    pub async fn statuses(&self) -> Vec<TransportStatus> {
        let entries = self.entries.read().await;
        let mut statuses: Vec<TransportStatus> = entries
            .iter()
            .map(|(name, entry)| TransportStatus {
                name: name.clone(),
                degraded: entry.applied.is_none(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{Certificate, ForwardingTimeouts};
    use crate::tls::FileOrContent;

    fn plain(name: &str) -> ServersTransport {
        ServersTransport {
            server_name: name.into(),
            max_idle_conns_per_host: 10,
            ..ServersTransport::default()
        }
    }

    fn configs(entries: &[(&str, Option<ServersTransport>)]) -> TransportConfigs {
        entries
            .iter()
            .map(|(name, config)| ((*name).to_string(), config.clone()))
            .collect()
    }

    #[tokio::test]
    async fn empty_name_is_a_config_error() {
        let registry = TransportRegistry::default();
        let err = registry.get("").await.err().unwrap();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let registry = TransportRegistry::default();
        registry.update(&configs(&[("a", Some(plain("a")))])).await;
        let err = registry.get("b").await.err().unwrap();
        assert!(matches!(err, TransportError::NotFound(ref name) if name == "b"));
    }

    #[tokio::test]
    async fn identical_update_keeps_transports() {
        let registry = TransportRegistry::default();
        let set = configs(&[("a", Some(plain("a"))), ("b", Some(plain("b")))]);

        let first = registry.update(&set).await;
        assert_eq!(first.added, 2);
        let a = registry.get("a").await.unwrap();
        let b = registry.get("b").await.unwrap();

        let second = registry.update(&set).await;
        assert_eq!(second.reused, 2);
        assert_eq!(second.added + second.rebuilt, 0);
        assert!(Arc::ptr_eq(&a, &registry.get("a").await.unwrap()));
        assert!(Arc::ptr_eq(&b, &registry.get("b").await.unwrap()));
    }

    #[tokio::test]
    async fn every_changed_entry_is_rebuilt() {
        let registry = TransportRegistry::default();
        registry
            .update(&configs(&[
                ("a", Some(plain("a"))),
                ("b", Some(plain("b"))),
                ("c", Some(plain("c"))),
            ]))
            .await;
        let a = registry.get("a").await.unwrap();
        let b = registry.get("b").await.unwrap();
        let c = registry.get("c").await.unwrap();

        let mut changed = plain("c");
        changed.forwarding_timeouts = Some(ForwardingTimeouts {
            dial_timeout: Some(1000),
            ..ForwardingTimeouts::default()
        });
        let summary = registry
            .update(&configs(&[
                ("a", Some(plain("a2"))),
                ("b", Some(plain("b"))),
                ("c", Some(changed)),
            ]))
            .await;

        assert_eq!(summary.rebuilt, 2);
        assert_eq!(summary.reused, 1);
        assert!(!Arc::ptr_eq(&a, &registry.get("a").await.unwrap()));
        assert!(Arc::ptr_eq(&b, &registry.get("b").await.unwrap()));
        assert!(!Arc::ptr_eq(&c, &registry.get("c").await.unwrap()));
    }

    #[tokio::test]
    async fn removed_names_are_evicted() {
        let registry = TransportRegistry::default();
        registry
            .update(&configs(&[("a", Some(plain("a"))), ("b", Some(plain("b")))]))
            .await;
        let summary = registry.update(&configs(&[("b", Some(plain("b")))])).await;

        assert_eq!(summary.evicted, 1);
        assert!(matches!(
            registry.get("a").await,
            Err(TransportError::NotFound(_))
        ));
        assert!(registry.get("b").await.is_ok());
    }

    #[tokio::test]
    async fn failed_build_falls_back_and_is_retried() {
        let registry = TransportRegistry::default();
        let set = configs(&[("missing", None), ("ok", Some(plain("ok")))]);

        let first = registry.update(&set).await;
        assert_eq!(first.degraded, 1);
        let fallback = registry.get("missing").await.unwrap();
        assert!(Arc::ptr_eq(&fallback, &registry.fallback));

        let second = registry.update(&set).await;
        assert_eq!(second.degraded, 1);
        assert_eq!(second.rebuilt, 1);
        assert_eq!(second.reused, 1);

        let statuses = registry.statuses().await;
        assert_eq!(
            statuses,
            vec![
                TransportStatus {
                    name: "missing".into(),
                    degraded: true
                },
                TransportStatus {
                    name: "ok".into(),
                    degraded: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_interleave() {
        let registry = TransportRegistry::default();
        let left = configs(&[("a", Some(plain("a"))), ("b", Some(plain("b")))]);
        let right = configs(&[("c", Some(plain("c"))), ("d", Some(plain("d")))]);

        // The second update waits until the first has swapped its entries.
        let (first, second) = tokio::join!(registry.update(&left), registry.update(&right));

        assert_eq!(first.added + second.added, 4);
        assert_eq!(first.evicted + second.evicted, 2);
        let names: Vec<String> = registry
            .statuses()
            .await
            .into_iter()
            .map(|status| status.name)
            .collect();
        assert!(
            names == ["a", "b"] || names == ["c", "d"],
            "entries mixed two updates: {names:?}"
        );
    }

    #[tokio::test]
    async fn degraded_entry_recovers_when_fixed() {
        let registry = TransportRegistry::default();
        let mut broken = plain("backend");
        broken.server_name = "bad name!".into();
        broken.certificates = vec![Certificate {
            cert_file: FileOrContent::from("x"),
            key_file: FileOrContent::from("y"),
        }];

        registry.update(&configs(&[("api", Some(broken))])).await;
        assert!(registry.statuses().await[0].degraded);

        let summary = registry
            .update(&configs(&[("api", Some(plain("backend")))]))
            .await;
        assert_eq!(summary.rebuilt, 1);
        assert_eq!(summary.degraded, 0);
        assert!(!registry.statuses().await[0].degraded);
    }
}
