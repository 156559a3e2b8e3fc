//! # Renderer Soak
//!
//! Drives a headless renderer with a seeded random workload and reports
//! the events it produced.
//!
//! Scene producers are simulated by a loopback: every subscription request
//! of a display is answered with the scene and a first flush.
//!
//! ```text
//! cargo run --features soak --bin renderer_soak -- --displays 3 --scenes 8 --frames 900 --threaded
//! ```

use anyhow::{ensure, Context};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, Sender};
use lumen_renderer::{Renderer, RendererConfig, SceneEventSender};
use lumen_shared::commands::{
    CreateDisplay, DestroyDisplay, LogStatistics, ReadPixels, ReceiveScene, ScenePublished,
    SetClearColor, SetSceneMapping, SetSceneState, UpdateScene,
};
use lumen_shared::{
    DisplayConfig, DisplayHandle, PublicationMode, Rect, RendererEvent, RendererEventType,
    RendererSceneState, SceneAction, SceneId, SceneInfo, SceneUpdate, Vec4,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "renderer_soak", about = "Soak test of the renderer command dispatch")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Number of displays
    #[arg(short, long, default_value = "2")]
    displays: u32,

    /// Number of published scenes
    #[arg(short, long, default_value = "4")]
    scenes: u64,

    /// Frames to run
    #[arg(short, long, default_value = "600")]
    frames: u32,

    /// RNG seed of the workload
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Run displays on their own threads
    #[arg(short, long)]
    threaded: bool,

    /// Renderer config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Subscription request of a display, `true` for subscribe.
type Subscription = (DisplayHandle, SceneId, bool);

/// Scene producer stand-in forwarding subscriptions to the main loop.
struct LoopbackSceneSender {
    requests: Sender<Subscription>,
}

impl SceneEventSender for LoopbackSceneSender {
    fn subscribe_scene(&self, display: DisplayHandle, scene: SceneId) {
        let _ = self.requests.send((display, scene, true));
    }

    fn unsubscribe_scene(&self, display: DisplayHandle, scene: SceneId) {
        let _ = self.requests.send((display, scene, false));
    }
}

/// Scene content producer.
struct Producer {
    requests: Receiver<Subscription>,
    subscribed: HashMap<SceneId, DisplayHandle>,
    flush_index: HashMap<SceneId, u64>,
}

impl Producer {
    fn answer_subscriptions(&mut self, renderer: &Renderer) {
        for (display, scene, subscribe) in self.requests.try_iter() {
            if subscribe {
                tracing::debug!("producer: sending scene {} to display {}", scene, display);
                self.subscribed.insert(scene, display);
                renderer.enqueue(ReceiveScene {
                    info: SceneInfo {
                        friendly_name: format!("soak-{scene}"),
                        ..SceneInfo::new(scene)
                    },
                });
                self.flush(renderer, scene, Vec::new());
            } else {
                self.subscribed.remove(&scene);
            }
        }
    }

    fn flush(&mut self, renderer: &Renderer, scene: SceneId, actions: Vec<SceneAction>) {
        let index = self.flush_index.entry(scene).or_insert(0);
        *index += 1;
        renderer.enqueue(UpdateScene {
            scene,
            update: SceneUpdate::new(*index, actions),
        });
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => RendererConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RendererConfig::default(),
    };

    let (tx, rx) = unbounded();
    let mut renderer = Renderer::headless(config, Arc::new(LoopbackSceneSender { requests: tx }))?;
    let mut producer = Producer {
        requests: rx,
        subscribed: HashMap::new(),
        flush_index: HashMap::new(),
    };
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);

    if cli.threaded {
        renderer.start_thread()?;
    }

    let displays: Vec<DisplayHandle> = (1..=cli.displays).map(DisplayHandle).collect();
    let scenes: Vec<SceneId> = (0..cli.scenes).map(|i| SceneId(100 + i)).collect();

    for scene in &scenes {
        renderer.enqueue(ScenePublished {
            scene: *scene,
            mode: PublicationMode::LocalOnly,
        });
    }
    for display in &displays {
        renderer.enqueue(SetClearColor {
            display: *display,
            buffer: None,
            color: Vec4::new(rng.gen(), rng.gen(), rng.gen(), 1.0),
        });
        renderer.enqueue(CreateDisplay {
            display: *display,
            config: DisplayConfig::with_size(64, 48),
        });
    }
    for scene in &scenes {
        let display = displays[rng.gen_range(0..displays.len())];
        renderer.enqueue(SetSceneMapping { scene: *scene, display });
        renderer.enqueue(SetSceneState {
            scene: *scene,
            state: RendererSceneState::Rendered,
        });
    }

    let mut tally: BTreeMap<String, usize> = BTreeMap::new();
    let started = Instant::now();

    for frame in 0..cli.frames {
        producer.answer_subscriptions(&renderer);

        let scene = scenes[rng.gen_range(0..scenes.len())];
        match rng.gen_range(0..100) {
            0..=59 => {
                if producer.subscribed.contains_key(&scene) {
                    let payload = vec![0u8; rng.gen_range(0..256)];
                    producer.flush(&renderer, scene, vec![SceneAction::Opaque(payload)]);
                }
            }
            60..=74 => {
                let state = if rng.gen_bool(0.5) {
                    RendererSceneState::Rendered
                } else {
                    RendererSceneState::Ready
                };
                renderer.enqueue(SetSceneState { scene, state });
            }
            75..=84 => {
                let display = displays[rng.gen_range(0..displays.len())];
                renderer.enqueue(ReadPixels {
                    display,
                    buffer: None,
                    region: Rect::new(0, 0, 8, 8),
                    full_screen: false,
                    file_name: None,
                });
            }
            85..=94 => {
                let display = displays[rng.gen_range(0..displays.len())];
                renderer.enqueue(SetClearColor {
                    display,
                    buffer: None,
                    color: Vec4::new(rng.gen(), rng.gen(), rng.gen(), 1.0),
                });
            }
            _ => renderer.enqueue(LogStatistics),
        }

        step(&mut renderer, cli.threaded)?;
        if frame % 30 == 0 {
            drain(&renderer, &mut tally);
        }
    }

    // release every scene so the displays can be destroyed
    for scene in &scenes {
        renderer.enqueue(SetSceneState {
            scene: *scene,
            state: RendererSceneState::Available,
        });
    }
    for _ in 0..10 {
        producer.answer_subscriptions(&renderer);
        step(&mut renderer, cli.threaded)?;
    }
    for display in &displays {
        renderer.enqueue(DestroyDisplay { display: *display });
    }
    for _ in 0..10 {
        step(&mut renderer, cli.threaded)?;
        drain(&renderer, &mut tally);
    }

    println!("soak finished in {:?} (seed {})", started.elapsed(), cli.seed);
    for (event_type, count) in &tally {
        println!("  {event_type:<40} {count}");
    }

    let created = tally.get("DisplayCreated").copied().unwrap_or(0);
    ensure!(
        created == displays.len(),
        "expected {} displays created, got {}",
        displays.len(),
        created
    );
    ensure!(
        renderer.dispatcher().displays().is_empty(),
        "displays left alive: {:?}",
        renderer.dispatcher().displays()
    );
    Ok(())
}

fn step(renderer: &mut Renderer, threaded: bool) -> anyhow::Result<()> {
    if threaded {
        thread::sleep(Duration::from_millis(16));
    } else {
        renderer.do_one_loop()?;
    }
    Ok(())
}

fn drain(renderer: &Renderer, tally: &mut BTreeMap<String, usize>) {
    let mut events: Vec<RendererEvent> = Vec::new();
    renderer.dispatch_renderer_events(&mut events);
    renderer.dispatch_scene_control_events(&mut events);
    for event in events {
        if matches!(
            event.event_type,
            RendererEventType::DisplayCreateFailed | RendererEventType::DisplayDestroyFailed
        ) {
            tracing::warn!("{:?} for display {:?}", event.event_type, event.display_handle);
        }
        *tally.entry(format!("{:?}", event.event_type)).or_insert(0) += 1;
    }
}
