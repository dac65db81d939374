//! Process-wide agent metadata cache
//!
//! The cache is either empty, loading (one shared in-flight fetch) or loaded.
//! Concurrent callers that arrive while a fetch is running await that same
//! fetch. A failed fetch leaves the cache empty so the next caller retries;
//! a successful one is kept until the process exits.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tern_ai::{AgentBackend, AgentMetadata};

type LoadResult = std::result::Result<Arc<AgentMetadata>, Arc<tern_ai::Error>>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

enum CacheState {
    Empty,
    Loading { generation: u64, future: LoadFuture },
    Loaded(Arc<AgentMetadata>),
}

struct Inner {
    state: CacheState,
    generations: u64,
}

/// Lazily loaded agent definition
pub struct MetadataCache {
    backend: Arc<dyn AgentBackend>,
    inner: Mutex<Inner>,
}

impl MetadataCache {
    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(Inner {
                state: CacheState::Empty,
                generations: 0,
            }),
        }
    }

    /// Return the cached metadata, loading it if nobody has yet
    pub async fn get_or_load(&self) -> LoadResult {
        let (generation, future) = {
            let mut inner = self.inner.lock();
            let in_flight = match &inner.state {
                CacheState::Loaded(meta) => return Ok(Arc::clone(meta)),
                CacheState::Loading { generation, future } => Some((*generation, future.clone())),
                CacheState::Empty => None,
            };
            match in_flight {
                Some(pending) => pending,
                None => {
                    inner.generations += 1;
                    let generation = inner.generations;
                    let future = self.start_load();
                    inner.state = CacheState::Loading {
                        generation,
                        future: future.clone(),
                    };
                    (generation, future)
                }
            }
        };

        let result = future.await;

        let mut inner = self.inner.lock();
        match &result {
            Ok(meta) => {
                if !matches!(inner.state, CacheState::Loaded(_)) {
                    tracing::info!(agent = %meta.name, model = %meta.model, "agent metadata loaded");
                    inner.state = CacheState::Loaded(Arc::clone(meta));
                }
            }
            Err(e) => {
                let current = matches!(
                    inner.state,
                    CacheState::Loading { generation: g, .. } if g == generation
                );
                if current {
                    tracing::warn!("agent metadata load failed: {}", e);
                    inner.state = CacheState::Empty;
                }
            }
        }
        result
    }

    /// Cached metadata without triggering a load
    pub fn peek(&self) -> Option<Arc<AgentMetadata>> {
        match &self.inner.lock().state {
            CacheState::Loaded(meta) => Some(Arc::clone(meta)),
            _ => None,
        }
    }

    fn start_load(&self) -> LoadFuture {
        let backend = Arc::clone(&self.backend);
        async move {
            backend
                .agent_metadata()
                .await
                .map(Arc::new)
                .map_err(Arc::new)
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tern_ai::{ConversationId, UpstreamEventStream, UserMessage};

    /// Backend whose metadata call is slow and counted
    struct CountingBackend {
        calls: AtomicU32,
        fail_first: bool,
    }

    impl CountingBackend {
        fn new(fail_first: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl AgentBackend for CountingBackend {
        async fn agent_metadata(&self) -> tern_ai::Result<AgentMetadata> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && call == 0 {
                return Err(tern_ai::Error::api("server_error", "warming up"));
            }
            Ok(AgentMetadata {
                id: "asst_1".into(),
                name: "Helpdesk".into(),
                model: "gpt-4.1".into(),
                instructions: None,
                starter_prompts: vec!["Hi".into()],
            })
        }

        async fn create_conversation(&self, _title: Option<&str>) -> tern_ai::Result<ConversationId> {
            unreachable!("not used by the cache")
        }

        async fn send_message(
            &self,
            _conversation: &ConversationId,
            _message: &UserMessage,
        ) -> tern_ai::Result<UpstreamEventStream> {
            unreachable!("not used by the cache")
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let backend = CountingBackend::new(false);
        let cache = Arc::new(MetadataCache::new(backend.clone()));

        let calls = (0..10).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_load().await })
        });
        let results = futures::future::join_all(calls).await;

        for result in results {
            assert_eq!(result.unwrap().unwrap().name, "Helpdesk");
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        // Later callers hit the cache
        cache.get_or_load().await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(cache.peek().is_some());
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let backend = CountingBackend::new(true);
        let cache = MetadataCache::new(backend.clone());

        assert!(cache.get_or_load().await.is_err());
        assert!(cache.peek().is_none());

        let meta = cache.get_or_load().await.unwrap();
        assert_eq!(meta.model, "gpt-4.1");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
