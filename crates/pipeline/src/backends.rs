//! The reachable-backend table and the probe cycle that maintains it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bowl_comfyui::backend::{ComfyUIBackend, GenerationBackend};
use tokio::sync::{broadcast, RwLock};

use crate::error::PipelineResult;
use crate::events::JobEvent;
use crate::store::AssetCatalog;

/// Builds backend handles for catalog servers.
pub trait BackendFactory: Send + Sync {
    fn connect(&self, code_name: &str, host: &str) -> Arc<dyn GenerationBackend>;
}

/// Connects to ComfyUI servers over one shared HTTP pool.
#[derive(Debug, Clone, Default)]
pub struct ComfyUIFactory {
    http: reqwest::Client,
}

impl ComfyUIFactory {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl BackendFactory for ComfyUIFactory {
    fn connect(&self, code_name: &str, host: &str) -> Arc<dyn GenerationBackend> {
        Arc::new(ComfyUIBackend::with_http_client(
            code_name,
            host,
            self.http.clone(),
        ))
    }
}

/// A backend that passed its last probe.
#[derive(Clone)]
pub struct BackendHandle {
    pub host: String,
    pub backend: Arc<dyn GenerationBackend>,
}

/// Reachable backends by server code name.
#[derive(Default)]
pub struct BackendTable {
    inner: RwLock<HashMap<String, BackendHandle>>,
}

impl BackendTable {
    pub async fn get(&self, code_name: &str) -> Option<BackendHandle> {
        self.inner.read().await.get(code_name).cloned()
    }

    /// Sorted code names.
    pub async fn code_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Probe every enabled server once and update `table`.
///
/// Probes run without holding the table lock. A handle is rebuilt when
/// the server's host changed, and dropped when the server is gone.
pub async fn probe_cycle(
    table: &BackendTable,
    catalog: &dyn AssetCatalog,
    factory: &dyn BackendFactory,
    probe_timeout: Duration,
    events: &broadcast::Sender<JobEvent>,
) -> PipelineResult<()> {
    let servers = catalog.list_servers().await?;

    let stale: Vec<String> = {
        let mut inner = table.inner.write().await;
        let stale: Vec<String> = inner
            .keys()
            .filter(|code| !servers.iter().any(|s| &s.code_name == *code))
            .cloned()
            .collect();
        for code in &stale {
            inner.remove(code);
        }
        stale
    };
    for backend in stale {
        tracing::info!(backend = %backend, "Backend removed from catalog");
        let _ = events.send(JobEvent::BackendOffline { backend });
    }

    for server in servers {
        let existing = table.get(&server.code_name).await;
        let was_online = existing.is_some();
        let handle = match existing {
            Some(handle) if handle.host == server.host => handle,
            _ => BackendHandle {
                host: server.host.clone(),
                backend: factory.connect(&server.code_name, &server.host),
            },
        };

        match handle.backend.probe(probe_timeout).await {
            Ok(()) => {
                table.inner.write().await.insert(server.code_name.clone(), handle);
                if !was_online {
                    tracing::info!(backend = %server.code_name, host = %server.host, "Backend online");
                    let _ = events.send(JobEvent::BackendOnline {
                        backend: server.code_name,
                    });
                }
            }
            Err(e) => {
                table.inner.write().await.remove(&server.code_name);
                if was_online {
                    tracing::warn!(backend = %server.code_name, error = %e, "Backend offline");
                    let _ = events.send(JobEvent::BackendOffline {
                        backend: server.code_name,
                    });
                } else {
                    tracing::debug!(backend = %server.code_name, error = %e, "Backend still unreachable");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bowl_db::models::server::CreateServer;

    use super::*;
    use crate::memory::InMemoryStore;
    use crate::testing::{FakeFactory, SERVER};

    async fn store_with_server() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .add_server(CreateServer {
                name: "Local".into(),
                code_name: SERVER.into(),
                host: "127.0.0.1:8188".into(),
            })
            .await;
        store
    }

    #[tokio::test]
    async fn probe_transitions_emit_events_once() {
        let store = store_with_server().await;
        let factory = FakeFactory::new();
        let table = BackendTable::default();
        let (tx, mut rx) = broadcast::channel(16);
        let timeout = Duration::from_millis(50);

        probe_cycle(&table, &store, &factory, timeout, &tx).await.unwrap();
        probe_cycle(&table, &store, &factory, timeout, &tx).await.unwrap();
        assert_eq!(table.code_names().await, [SERVER]);
        assert_eq!(factory.connects(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            JobEvent::BackendOnline { backend: SERVER.into() }
        );
        assert!(rx.try_recv().is_err());

        factory.backend(SERVER).set_reachable(false);
        probe_cycle(&table, &store, &factory, timeout, &tx).await.unwrap();
        assert!(table.is_empty().await);
        assert_eq!(
            rx.try_recv().unwrap(),
            JobEvent::BackendOffline { backend: SERVER.into() }
        );
    }

    #[tokio::test]
    async fn disabled_servers_are_dropped() {
        let store = store_with_server().await;
        let factory = FakeFactory::new();
        let table = BackendTable::default();
        let (tx, _rx) = broadcast::channel(16);
        let timeout = Duration::from_millis(50);

        probe_cycle(&table, &store, &factory, timeout, &tx).await.unwrap();
        assert_eq!(table.len().await, 1);

        store.set_server_enabled(SERVER, false).await;
        probe_cycle(&table, &store, &factory, timeout, &tx).await.unwrap();
        assert!(table.is_empty().await);
    }
}
