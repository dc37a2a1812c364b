// asset_pool demo
// Spawns and recycles a few pooled instances against an in-memory loader.
//
// Run with: RUST_LOG=debug cargo run

use asset_pool::{Poolable, PoolRegistry, ResourceKey, ResourceLoader, TypeConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct PrefabLoader;

#[async_trait]
impl ResourceLoader for PrefabLoader {
    type Resource = String;

    async fn load(&self, key: &ResourceKey) -> Option<String> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some(format!("prefab<{key}>"))
    }

    fn release(&self, key: &ResourceKey, _resource: Arc<String>) {
        tracing::info!(%key, "unloaded");
    }
}

struct Bullet {
    prefab: Arc<String>,
}

impl Poolable for Bullet {
    type Resource = String;

    fn instantiate(resource: &Arc<String>, _key: &ResourceKey) -> Option<Self> {
        Some(Bullet {
            prefab: Arc::clone(resource),
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let registry = Arc::new(
        PoolRegistry::builder(PrefabLoader)
            .register::<Bullet>(
                TypeConfig::new("Prefabs/Bullet")
                    .with_max_pool_size(4)
                    .with_attach_point("World/Projectiles"),
            )
            .build(),
    );
    let never = CancellationToken::new();

    println!("Concurrent gets:");
    let mut handles = vec![];
    for i in 0..3 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let bullet = registry
                .get_configured::<Bullet>(&CancellationToken::new())
                .await;
            match bullet {
                Ok(bullet) => {
                    println!("  Task {} got {} from {}", i, bullet.id(), bullet.prefab);
                    registry.return_instance(bullet);
                }
                Err(e) => println!("  Task {} failed: {}", i, e),
            }
        }));
    }
    for handle in handles {
        if let Err(e) = handle.await {
            println!("  Task panicked: {}", e);
        }
    }

    println!("Preload and reuse:");
    if let Err(e) = registry.preload_configured::<Bullet>(2, &never).await {
        println!("  Preload failed: {}", e);
    }
    print!("{}", registry.dump_state());

    registry.clear_all();
    println!("After clear_all:");
    print!("{}", registry.dump_state());
}
