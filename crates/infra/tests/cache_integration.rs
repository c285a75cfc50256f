//! Integration tests for the two-tier cache manager
//!
//! Drives the manager through its public API with the in-memory
//! distributed tier, the way the REST layer sits on top of it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use toolmesh_domain::CacheConfig;
use toolmesh_infra::cache::{CacheError, CacheManager, InMemoryDistributedCache};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Catalog {
    tenant: String,
    tools: Vec<String>,
}

fn catalog(tenant: &str) -> Catalog {
    Catalog { tenant: tenant.to_string(), tools: vec!["github".into(), "jira".into()] }
}

fn manager() -> (CacheManager, Arc<InMemoryDistributedCache>) {
    let l2 = Arc::new(InMemoryDistributedCache::new());
    let config = CacheConfig { warmup_enabled: false, ..Default::default() };
    (CacheManager::new(config, l2.clone()), l2)
}

/// Validates cache-aside loading on a cold cache.
///
/// Assertions:
/// - The loader runs once; later reads are L1 hits.
/// - The value reaches the distributed tier too.
#[tokio::test]
async fn cold_cache_runs_loader_once() {
    let (cache, l2) = manager();
    let loads = AtomicUsize::new(0);

    for _ in 0..3 {
        let value = cache
            .get_or_set(
                "tools:acme",
                || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(catalog("acme"))
                },
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(value, catalog("acme"));
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(l2.contains_key("tools:acme"));
    let metrics = cache.metrics();
    assert_eq!(metrics.l1_hits, 2);
    assert_eq!(metrics.sets, 1);

    cache.close().await;
}

/// Validates request coalescing under concurrent misses.
///
/// # Test Steps
/// 1. Twenty callers miss the same key at once
/// 2. One slow loader serves all of them
/// 3. A failing load is shared and not cached
#[tokio::test]
async fn concurrent_misses_share_one_load() {
    let (cache, _l2) = manager();
    let loads = AtomicUsize::new(0);

    let callers = (0..20).map(|_| {
        cache.get_or_set(
            "tools:globex",
            || async {
                loads.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, std::io::Error>(catalog("globex"))
            },
            Duration::from_secs(60),
        )
    });
    let results = join_all(callers).await;

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r.as_ref().ok() == Some(&catalog("globex"))));
    assert_eq!(cache.metrics().coalesced_requests, 19);
    assert_eq!(cache.in_flight(), 0);

    let failing = (0..5).map(|_| {
        cache.get_or_set(
            "tools:initech",
            || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<Catalog, _>("backend unavailable")
            },
            Duration::from_secs(60),
        )
    });
    for result in join_all(failing).await {
        match result {
            Err(CacheError::Loader { message, .. }) => assert!(message.contains("unavailable")),
            other => panic!("expected loader error, got {other:?}"),
        }
    }
    assert_eq!(cache.get::<Catalog>("tools:initech").await.unwrap(), None);

    cache.close().await;
}

/// Validates transitive invalidation through declared dependencies.
///
/// Assertions:
/// - Invalidating A removes B and C, reported as two cascaded keys.
/// - Unrelated keys survive, in both tiers.
#[tokio::test]
async fn invalidation_cascades_through_dependencies() -> anyhow::Result<()> {
    let (cache, l2) = manager();
    let ttl = Duration::from_secs(60);

    cache.set("tenant:acme", &catalog("acme"), ttl).await?;
    cache.set_with_dependencies("tools:acme", &catalog("acme"), ttl, &["tenant:acme"]).await?;
    cache
        .set_with_dependencies("tool:acme:github", &"github".to_string(), ttl, &["tools:acme"])
        .await?;
    cache.set("tenant:globex", &catalog("globex"), ttl).await?;

    let cascaded = cache.invalidate("tenant:acme").await?;
    assert_eq!(cascaded, 2);

    for key in ["tenant:acme", "tools:acme", "tool:acme:github"] {
        assert_eq!(cache.get::<serde_json::Value>(key).await?, None, "{key} survived");
        assert!(!l2.contains_key(key));
    }
    assert_eq!(cache.get::<Catalog>("tenant:globex").await?, Some(catalog("globex")));
    assert!(cache.dependents("tenant:acme").is_empty());

    cache.close().await;
    Ok(())
}

#[tokio::test]
async fn pattern_invalidation_spans_tenants() -> anyhow::Result<()> {
    let (cache, _l2) = manager();
    let ttl = Duration::from_secs(60);
    for tenant in ["acme", "globex", "initech"] {
        cache.set(&format!("tools:{tenant}"), &catalog(tenant), ttl).await?;
    }
    cache.set("health:acme", &true, ttl).await?;

    let removed = cache.invalidate_pattern("tools:*").await?;
    assert_eq!(removed, 3);
    assert_eq!(cache.get::<bool>("health:acme").await?, Some(true));

    cache.close().await;
    assert!(matches!(cache.get::<bool>("health:acme").await, Err(CacheError::Closed)));
    Ok(())
}
