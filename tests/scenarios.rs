//! End-to-end behaviour of the registry through its public API.

use asset_pool::{
    PoolError, PoolRegistry, Poolable, Pooled, ResourceKey, ResourceLoader, ReturnOutcome,
    TypeConfig,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Loads {
    count: AtomicUsize,
    gate: Option<Arc<Notify>>,
    destroyed: AtomicUsize,
    released: AtomicUsize,
}

struct CountingLoader(Arc<Loads>);

#[async_trait]
impl ResourceLoader for CountingLoader {
    type Resource = String;

    async fn load(&self, key: &ResourceKey) -> Option<String> {
        self.0.count.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.0.gate {
            gate.notified().await;
        }
        (!key.as_str().contains("Missing")).then(|| key.to_string())
    }

    fn release(&self, _key: &ResourceKey, _resource: Arc<String>) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct Bullet;

impl Poolable for Bullet {
    type Resource = String;

    fn instantiate(_resource: &Arc<String>, _key: &ResourceKey) -> Option<Self> {
        None
    }
}

struct Enemy {
    destroyed: Option<Arc<Loads>>,
}

impl Poolable for Enemy {
    type Resource = String;

    fn instantiate(_resource: &Arc<String>, _key: &ResourceKey) -> Option<Self> {
        Some(Enemy { destroyed: None })
    }

    fn on_destroy(&mut self) {
        if let Some(loads) = &self.destroyed {
            loads.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct Shell;

impl Poolable for Shell {
    type Resource = String;

    fn instantiate(_resource: &Arc<String>, _key: &ResourceKey) -> Option<Self> {
        Some(Shell)
    }
}

fn registry_with(loads: Arc<Loads>) -> PoolRegistry<String> {
    PoolRegistry::builder(CountingLoader(loads))
        .register::<Enemy>(TypeConfig::new("Prefabs/Enemy").with_max_pool_size(2))
        .register::<Shell>(TypeConfig::new("Prefabs/Shell").with_max_pool_size(5))
        .register::<Bullet>(TypeConfig::new("Prefabs/Bullet"))
        .build()
}

fn key(name: &str) -> ResourceKey {
    ResourceKey::from(name)
}

#[tokio::test]
async fn concurrent_gets_share_one_load() {
    let gate = Arc::new(Notify::new());
    let loads = Arc::new(Loads {
        gate: Some(Arc::clone(&gate)),
        ..Loads::default()
    });
    let registry = Arc::new(registry_with(Arc::clone(&loads)));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry
                .get::<Shell>(&key("Prefabs/Shell"), &CancellationToken::new())
                .await
        }));
    }

    while registry.cache_metrics().joined_loads < 4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(registry.pending_load_count(), 1);
    gate.notify_one();

    let mut ids = HashSet::new();
    for task in tasks {
        let shell = task.await.unwrap().unwrap();
        ids.insert(shell.id());
        registry.return_instance(shell);
    }

    assert_eq!(ids.len(), 5);
    assert_eq!(loads.count.load(Ordering::SeqCst), 1);
    assert_eq!(registry.ref_count(&key("Prefabs/Shell")), 5);
    assert_eq!(registry.pending_load_count(), 0);
}

#[tokio::test]
async fn tracked_iff_referenced() {
    let registry = registry_with(Arc::default());
    let never = CancellationToken::new();
    let k = key("Audio/Click");

    registry.acquire(&k, &never).await.unwrap();
    registry.acquire(&k, &never).await.unwrap();
    assert_eq!(registry.ref_count(&k), 2);
    assert_eq!(registry.loaded_count(), 1);

    registry.release(&k);
    registry.release(&k);
    assert_eq!(registry.ref_count(&k), 0);
    assert_eq!(registry.loaded_count(), 0);

    // A further release is absorbed.
    registry.release(&k);
    assert_eq!(registry.loaded_count(), 0);
}

#[tokio::test]
async fn return_then_get_reuses_without_loading() {
    let loads = Arc::new(Loads::default());
    let registry = registry_with(Arc::clone(&loads));
    let never = CancellationToken::new();

    let enemy = registry.get_configured::<Enemy>(&never).await.unwrap();
    let id = enemy.id();
    assert_eq!(registry.return_instance(enemy), ReturnOutcome::Pooled);

    let again = registry.get_configured::<Enemy>(&never).await.unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(loads.count.load(Ordering::SeqCst), 1);
    registry.return_instance(again);
}

#[tokio::test]
async fn idle_queue_never_exceeds_capacity() {
    let loads = Arc::new(Loads::default());
    let registry = registry_with(Arc::clone(&loads));
    let never = CancellationToken::new();
    let k = key("Prefabs/Enemy");

    let mut enemies = Vec::new();
    for _ in 0..3 {
        let mut enemy = registry.get::<Enemy>(&k, &never).await.unwrap();
        enemy.destroyed = Some(Arc::clone(&loads));
        enemies.push(enemy);
    }
    assert_eq!(registry.ref_count(&k), 3);

    let outcomes: Vec<_> = enemies
        .into_iter()
        .map(|enemy| registry.return_instance(enemy))
        .collect();

    assert_eq!(
        outcomes,
        vec![ReturnOutcome::Pooled, ReturnOutcome::Pooled, ReturnOutcome::Overflowed]
    );
    assert_eq!(registry.pool::<Enemy>().unwrap().idle_count(), 2);
    assert_eq!(registry.ref_count(&k), 2);
    assert_eq!(loads.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn clear_all_empties_everything() {
    let registry = registry_with(Arc::default());
    let never = CancellationToken::new();

    let held = registry.get_configured::<Enemy>(&never).await.unwrap();
    registry.preload_configured::<Shell>(3, &never).await.unwrap();
    registry.acquire(&key("Audio/Theme"), &never).await.unwrap();
    assert_eq!(registry.loaded_count(), 3);
    assert_eq!(registry.instance_count(), 4);

    registry.clear_all();
    assert_eq!(registry.loaded_count(), 0);
    assert_eq!(registry.instance_count(), 0);

    assert_eq!(registry.return_instance(held), ReturnOutcome::Rejected);
    assert_eq!(registry.loaded_count(), 0);
}

#[tokio::test]
async fn preload_then_get_needs_no_more_loads() {
    let loads = Arc::new(Loads::default());
    let registry = registry_with(Arc::clone(&loads));
    let never = CancellationToken::new();
    let k = key("Prefabs/Shell");

    registry.preload::<Shell>(&k, 5, &never).await.unwrap();
    assert_eq!(loads.count.load(Ordering::SeqCst), 1);

    let mut shells = Vec::new();
    for _ in 0..5 {
        shells.push(registry.get::<Shell>(&k, &never).await.unwrap());
    }

    let ids: HashSet<_> = shells.iter().map(Pooled::id).collect();
    assert_eq!(ids.len(), 5);
    assert_eq!(loads.count.load(Ordering::SeqCst), 1);
    assert_eq!(registry.pool::<Shell>().unwrap().idle_count(), 0);

    for shell in shells {
        registry.return_instance(shell);
    }
}

#[tokio::test]
async fn two_gets_hold_two_references() {
    let registry = registry_with(Arc::default());
    let never = CancellationToken::new();
    let k = key("Prefabs/Enemy");

    let a = registry.get::<Enemy>(&k, &never).await.unwrap();
    let b = registry.get::<Enemy>(&k, &never).await.unwrap();
    assert_eq!(registry.ref_count(&k), 2);

    registry.release(&k);
    assert_eq!(registry.ref_count(&k), 1);
    assert_eq!(registry.loaded_count(), 1);

    registry.return_instance(a);
    registry.return_instance(b);
}

#[tokio::test]
async fn foreign_instance_is_destroyed() {
    let loads = Arc::new(Loads::default());
    let registry = registry_with(Arc::clone(&loads));

    let stray = Pooled::unpooled(
        Enemy {
            destroyed: Some(Arc::clone(&loads)),
        },
        "Prefabs/Enemy",
    );

    assert_eq!(registry.return_instance(stray), ReturnOutcome::Rejected);
    assert_eq!(loads.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(registry.loaded_count(), 0);
    assert_eq!(registry.instance_count(), 0);
    assert_eq!(registry.pool::<Enemy>().unwrap().idle_count(), 0);
}

#[tokio::test]
async fn cancelled_get_leaks_no_reference() {
    let gate = Arc::new(Notify::new());
    let loads = Arc::new(Loads {
        gate: Some(Arc::clone(&gate)),
        ..Loads::default()
    });
    let registry = Arc::new(registry_with(Arc::clone(&loads)));
    let cancel = CancellationToken::new();

    let task = {
        let registry = Arc::clone(&registry);
        let cancel = cancel.clone();
        tokio::spawn(async move { registry.get_configured::<Enemy>(&cancel).await.map(|e| e.id()) })
    };
    while loads.count.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    cancel.cancel();
    assert_eq!(task.await.unwrap(), Err(PoolError::Cancelled));
    assert_eq!(registry.ref_count(&key("Prefabs/Enemy")), 0);

    // The abandoned load still runs to completion, then is handed back.
    gate.notify_one();
    while loads.released.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(loads.count.load(Ordering::SeqCst), 1);
    assert_eq!(loads.released.load(Ordering::SeqCst), 1);
    assert_eq!(registry.loaded_count(), 0);
    assert_eq!(registry.pending_load_count(), 0);
}

#[tokio::test]
async fn early_release_by_one_waiter_keeps_resource_for_the_rest() {
    let gate = Arc::new(Notify::new());
    let loads = Arc::new(Loads {
        gate: Some(Arc::clone(&gate)),
        ..Loads::default()
    });
    let registry = Arc::new(registry_with(Arc::clone(&loads)));
    let k = key("Prefabs/Enemy");

    let mut tasks = Vec::new();
    for releases_at_once in [true, false, false] {
        let registry = Arc::clone(&registry);
        let k = k.clone();
        tasks.push(tokio::spawn(async move {
            let resource = registry.acquire(&k, &CancellationToken::new()).await?;
            if releases_at_once {
                registry.release(&k);
            }
            Ok::<_, PoolError>(resource)
        }));
    }

    while registry.cache_metrics().joined_loads < 2 {
        tokio::task::yield_now().await;
    }
    gate.notify_one();
    for task in tasks {
        assert_eq!(*task.await.unwrap().unwrap(), "Prefabs/Enemy");
    }

    assert_eq!(registry.ref_count(&k), 2);
    assert_eq!(loads.released.load(Ordering::SeqCst), 0);

    registry.release(&k);
    registry.release(&k);
    assert_eq!(loads.count.load(Ordering::SeqCst), 1);
    assert_eq!(loads.released.load(Ordering::SeqCst), 1);
    assert_eq!(registry.loaded_count(), 0);
}

#[tokio::test]
async fn load_and_instantiation_failures_propagate() {
    let registry = registry_with(Arc::default());
    let never = CancellationToken::new();

    let err = registry
        .get::<Enemy>(&key("Prefabs/Missing"), &never)
        .await
        .unwrap_err();
    assert_eq!(err, PoolError::LoadFailed(key("Prefabs/Missing")));

    let err = registry.get_configured::<Bullet>(&never).await.unwrap_err();
    assert!(matches!(err, PoolError::InstantiationFailed { .. }));
    assert_eq!(registry.loaded_count(), 0);
    assert_eq!(registry.instance_count(), 0);
}
