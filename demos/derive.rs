//! Example demonstrating the #[derive(Inject)] macro
//!
//! Run with:
//!   cargo run --example derive --features derive

use domain_injector::{Dep, Inject, Injector, ServiceRegistry, Slot};
use std::sync::Arc;

// Dependencies
struct Database {
    url: String,
}

struct Cache {
    size: usize,
}

struct Logger {
    level: String,
}

trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;
}

struct Metrics;
impl Plugin for Metrics {
    fn name(&self) -> &'static str {
        "metrics"
    }
}

struct Audit;
impl Plugin for Audit {
    fn name(&self) -> &'static str {
        "audit"
    }
}

// Service with injected slots
#[derive(Default, Inject)]
struct UserService {
    #[inject]
    db: Dep<Database>,
    #[inject]
    cache: Dep<Cache>,
    #[inject(optional)]
    logger: Dep<Logger>,
    #[inject(all)]
    plugins: Slot<Vec<Arc<dyn Plugin>>>,
    // Not injected, left at its default
    request_count: u64,
}

impl UserService {
    fn describe(&self) -> String {
        let logger_status = match self.logger.get() {
            Some(logger) => format!("logging at {}", logger.level),
            None => "without logging".into(),
        };
        let plugins = self
            .plugins
            .get()
            .map(|plugins| plugins.iter().map(|p| p.name()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        let url = self.db.get().map(|db| db.url.clone()).unwrap_or_default();
        let size = self.cache.get().map(|cache| cache.size).unwrap_or_default();

        format!(
            "UserService connected to {url} with cache size {size} ({logger_status}, plugins: [{plugins}], requests: {})",
            self.request_count
        )
    }
}

fn main() {
    println!("=== Domain Injector Derive Macro Demo ===\n");

    let registry = ServiceRegistry::new();
    registry.singleton(Database {
        url: "postgres://localhost:5432/myapp".into(),
    });
    registry.singleton(Cache { size: 1024 });
    registry.singleton(Metrics);
    registry.singleton(Audit);
    registry.expose::<Metrics, dyn Plugin>(|m| m as Arc<dyn Plugin>);
    registry.expose::<Audit, dyn Plugin>(|a| a as Arc<dyn Plugin>);
    // Note: Logger is NOT registered, so the optional slot stays empty

    let injector = Injector::new(registry.clone());

    println!("Injecting UserService...");
    let user_service = UserService::default();
    injector
        .inject(&user_service)
        .expect("Failed to inject UserService");
    println!("  {}", user_service.describe());
    println!();

    registry.singleton(Logger {
        level: "DEBUG".into(),
    });

    // Injection is repeatable; the optional slot is filled this time
    println!("Injecting again with a Logger registered...");
    injector
        .inject(&user_service)
        .expect("Failed to inject UserService");
    println!("  {}", user_service.describe());
    println!();

    println!("=== Demo Complete ===");
    println!("\nThe #[derive(Inject)] macro generated `Inject::declare` that:");
    println!("  - Requires every #[inject] slot to resolve");
    println!("  - Leaves #[inject(optional)] slots untouched when nothing is registered");
    println!("  - Collects every exposure of the element type for #[inject(all)]");
}
