//! Example demonstrating domains and late injection for pooled instances
//!
//! A global domain provides app-wide services, a local "arena" domain wires
//! the components that exist when it starts, and a spawner hands out
//! pooled enemies that are injected on request.
//!
//! Run with pretty logging:
//! ```bash
//! cargo run --example pooled_spawns --features logging-pretty
//! ```

use domain_injector::{
    ComponentSet, Dep, DomainConfig, DomainRuntime, Inject, InjectionPoints, LateInjection,
    ResolutionDiagnostics, service,
};
use domain_injector::{Component, DomainHost};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// Services
// =============================================================================

#[derive(Default)]
struct AudioMixer;

impl Inject for AudioMixer {}

impl AudioMixer {
    fn play(&self, clip: &str) {
        println!("    [Audio] {clip}");
    }
}

#[derive(Default)]
struct ScoreBoard {
    points: AtomicU32,
}

impl Inject for ScoreBoard {}

impl ScoreBoard {
    fn add(&self, points: u32) -> u32 {
        self.points.fetch_add(points, Ordering::SeqCst) + points
    }
}

/// Arena-only rules; the global domain knows nothing about them
#[derive(Default)]
struct ArenaRules {
    bounty: u32,
}

impl Inject for ArenaRules {}

// =============================================================================
// Components
// =============================================================================

#[derive(Default)]
struct Hud {
    score: Dep<ScoreBoard>,
}

impl Inject for Hud {
    fn declare(points: &mut InjectionPoints<Self>) {
        points.required("score", |hud| &hud.score);
    }
}

#[derive(Default)]
struct Enemy {
    audio: Dep<AudioMixer>,
    score: Dep<ScoreBoard>,
    rules: Dep<ArenaRules>,
}

impl Inject for Enemy {
    fn declare(points: &mut InjectionPoints<Self>) {
        points
            .required("audio", |enemy| &enemy.audio)
            .required("score", |enemy| &enemy.score)
            .optional("rules", |enemy| &enemy.rules);
    }
}

impl Enemy {
    fn defeat(&self) {
        if let Some(audio) = self.audio.get() {
            audio.play("enemy_down.wav");
        }
        let bounty = self.rules.get().map(|rules| rules.bounty).unwrap_or(1);
        if let Some(score) = self.score.get() {
            println!("    [Score] {}", score.add(bounty));
        }
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Hands out recycled enemies, requesting injection for each one
struct EnemyPool {
    free: Mutex<Vec<Arc<Enemy>>>,
    created: AtomicU32,
}

impl EnemyPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            created: AtomicU32::new(0),
        }
    }

    fn spawn(&self, runtime: &DomainRuntime, host: &ComponentSet) -> Arc<Enemy> {
        let enemy = self
            .free
            .lock()
            .expect("pool lock poisoned")
            .pop()
            .unwrap_or_else(|| {
                self.created.fetch_add(1, Ordering::SeqCst);
                Arc::new(Enemy::default())
            });

        let component: Arc<dyn Component> = enemy.clone();
        host.insert(component.clone());

        match runtime.request_injection(&component) {
            Ok(LateInjection::Injected(domain)) => println!("  Spawned enemy, injected by {domain}"),
            Ok(LateInjection::AlreadyInjected(domain)) => {
                println!("  Reused enemy, already injected by {domain}")
            }
            Err(err) => println!("  Spawned enemy without injection: {err}"),
        }

        enemy
    }

    fn release(&self, enemy: Arc<Enemy>) {
        self.free.lock().expect("pool lock poisoned").push(enemy);
    }
}

fn main() {
    #[cfg(feature = "logging")]
    {
        domain_injector::logging::init();
    }

    println!("=== Domain Injector Pooled Spawns Demo ===\n");

    let runtime = DomainRuntime::new();
    let pool = EnemyPool::new();
    let arena = Arc::new(ComponentSet::new());

    // Spawning before any domain exists is reported, not fatal
    println!("1. Spawning before any domain is active...");
    let early = pool.spawn(&runtime, &arena);
    println!("   audio injected: {}\n", early.audio.is_set());

    // Global domain with app-wide services
    println!("2. Activating the global domain...");
    let diagnostics = Arc::new(ResolutionDiagnostics::new());
    let global = runtime
        .activate(
            DomainConfig::global("app")
                .service(service!(eager AudioMixer))
                .service(service!(ScoreBoard))
                .diagnostics(diagnostics.clone()),
        )
        .expect("global domain failed to start");
    println!("   {} is {}\n", global.id(), global.state());

    // A local domain wires the HUD that already lives in the arena
    println!("3. Activating the arena domain...");
    let hud = arena.add(Hud::default());
    let local = runtime
        .activate(DomainConfig::local("arena").host(arena.clone()).configure(|registry| {
            registry.singleton(ArenaRules { bounty: 10 });
            Ok(())
        }))
        .expect("arena domain failed to start");
    println!(
        "   {} injected {} component(s), hud wired: {}\n",
        local.id(),
        local.injected_count(),
        hud.score.is_set()
    );

    // Pooled spawns are injected once and reused as-is
    println!("4. Spawning from the pool...");
    pool.release(early);
    let first = pool.spawn(&runtime, &arena);
    first.defeat();
    pool.release(first);
    let again = pool.spawn(&runtime, &arena);
    again.defeat();
    let fresh = pool.spawn(&runtime, &arena);
    fresh.defeat();
    println!("   enemies created: {}\n", pool.created.load(Ordering::SeqCst));

    // Retire the arena; new spawns fall back to the global domain
    println!("5. Retiring the arena...");
    runtime.retire(local.id()).expect("arena retire failed");
    let outside = pool.spawn(&runtime, &ComponentSet::new());
    outside.defeat();
    println!("   arena members: {}\n", arena.components().len());

    println!("Dependency graph:");
    for edge in diagnostics.edges() {
        println!("  {} -> {}", edge.consumer, edge.dependency);
    }

    println!("\n=== Demo Complete ===");
}
