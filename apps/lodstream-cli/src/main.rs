use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::DVec3;
use lodstream_common::{CoordLimits, MAX_LODS, TilePos, ViewerId, WorldBounds};
use lodstream_persist::{FileTileStore, TileStore};
use lodstream_provider::{
    FnGenerator, GenerateError, HEIGHTMAP_SIZE, HeightSample, HeightmapScaler, HeightmapTile, Tile,
};
use lodstream_stream::{
    AckSender, Heightmap, LodMode, LodServer, Session, SessionSink, StreamConfig, ViewerConfig, Voxel,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lodstream-cli", about = "Drive and inspect the LOD streaming engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Stream configuration file (YAML); defaults apply to missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the effective stream configuration
    Info,
    /// Print the per-level tile limits for a world
    Bounds {
        /// Half-extent of the world in blocks
        #[arg(long, default_value = "4096")]
        radius: i64,
        /// World height in blocks
        #[arg(long, default_value = "256")]
        height: i64,
        /// Use voxel tiles instead of heightmap columns
        #[arg(long)]
        voxel: bool,
    },
    /// Walk simulated viewers through a synthetic heightmap world
    Simulate {
        /// Number of viewers
        #[arg(short = 'n', long, default_value = "4")]
        viewers: usize,
        /// World updates to run
        #[arg(short, long, default_value = "200")]
        ticks: u64,
        /// Half-extent of the world in blocks
        #[arg(long, default_value = "4096")]
        radius: i64,
        /// Blocks each viewer moves per tick
        #[arg(long, default_value = "4.0")]
        speed: f64,
        /// Tile store directory, created if missing
        #[arg(long)]
        store: Option<PathBuf>,
        /// Drop and rebuild every tile at this tick
        #[arg(long)]
        drop_all_at: Option<u64>,
    },
    /// Check every tile in a store against its checksum
    VerifyStore {
        /// Tile store directory
        path: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StreamConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => StreamConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Rolling hills with a sea level at 62.
fn terrain(pos: TilePos) -> Result<(HeightmapTile, i64), GenerateError> {
    let mut tile = HeightmapTile::default();
    let size = HEIGHTMAP_SIZE as i64;
    for z in 0..HEIGHTMAP_SIZE {
        for x in 0..HEIGHTMAP_SIZE {
            let wx = (i64::from(pos.x) * size + x as i64) as f64;
            let wz = (i64::from(pos.z) * size + z as i64) as f64;
            let height = 64.0 + (wx / 40.0).sin() * 16.0 + (wz / 55.0).cos() * 12.0;
            let height = height as i32;
            tile.set(
                x,
                z,
                Some(HeightSample {
                    height,
                    block: if height < 62 { 9 } else { 2 },
                    light: 15,
                }),
            );
        }
    }
    Ok((tile, 0))
}

/// A client that acknowledges every tile as soon as it arrives.
struct SimClient {
    acks: Option<AckSender>,
    held: HashSet<TilePos>,
    tiles: u64,
    unload_events: u64,
}

impl SessionSink<HeightmapTile> for SimClient {
    fn send_tile(&mut self, tile: &Arc<Tile<HeightmapTile>>) {
        self.held.insert(tile.pos);
        self.tiles += 1;
        if let Some(acks) = &self.acks {
            acks.ack(tile.pos);
        }
    }

    fn send_tile_unload(&mut self, pos: TilePos) {
        self.held.remove(&pos);
        self.unload_events += 1;
    }

    fn send_multi_tile_unload(&mut self, positions: &[TilePos]) {
        for pos in positions {
            self.held.remove(pos);
        }
        self.unload_events += 1;
    }
}

/// Viewer `index` circles the origin on its own orbit.
fn viewer_position(index: usize, tick: u64, speed: f64) -> DVec3 {
    let orbit = 96.0 * (index + 1) as f64;
    let angle = tick as f64 * speed / orbit + index as f64;
    DVec3::new(orbit * angle.cos(), 80.0, orbit * angle.sin())
}

fn simulate(
    config: StreamConfig,
    viewers: usize,
    ticks: u64,
    radius: i64,
    speed: f64,
    store: Option<PathBuf>,
    drop_all_at: Option<u64>,
) -> anyhow::Result<()> {
    let store: Option<Arc<dyn TileStore>> = match store {
        Some(path) => Some(Arc::new(FileTileStore::open(&path)?)),
        None => None,
    };
    let mut server = LodServer::new(Heightmap::default(), config)?;
    let bounds = WorldBounds::centered(radius, 256)?;
    server.resolve_bounds(&bounds, FnGenerator::new(terrain), HeightmapScaler, store)?;

    let mut sessions: Vec<Session<Heightmap, HeightmapTile, SimClient>> = Vec::with_capacity(viewers);
    for index in 0..viewers {
        let client = SimClient {
            acks: None,
            held: HashSet::new(),
            tiles: 0,
            unload_events: 0,
        };
        let mut session = server.open_session(ViewerId::new(), client, ViewerConfig::default())?;
        let acks = session.ack_sender();
        session.sink_mut().acks = Some(acks);
        session.activate(viewer_position(index, 0, speed))?;
        sessions.push(session);
    }
    println!("Simulating {viewers} viewers for {ticks} ticks");

    let start = Instant::now();
    for tick in 1..=ticks {
        if drop_all_at == Some(tick) {
            let reset = server.manager()?.drop_all_tiles()?;
            println!("tick {tick}: dropped all tiles, {reset} rebuilding");
        }
        server.tick();
        for (index, session) in sessions.iter_mut().enumerate() {
            session.update(viewer_position(index, tick, speed))?;
            session.flush();
        }
        if tick % 50 == 0 {
            let manager = server.manager()?;
            let waiting: usize = sessions.iter().map(|s| s.tracker().stats().waiting).sum();
            println!(
                "tick {tick}: tracked={}, waiting={waiting}, graph={:?}",
                manager.tracked_count(),
                manager.provider().stats().graph
            );
        }
    }

    // let outstanding work finish
    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        server.tick();
        for session in &mut sessions {
            session.flush();
        }
        let waiting: usize = sessions.iter().map(|s| s.tracker().stats().waiting).sum();
        let queued: usize = sessions.iter().map(|s| s.stats().queued_tiles).sum();
        if waiting == 0 && queued == 0 {
            break;
        }
        if Instant::now() > deadline {
            tracing::warn!(waiting, queued, "gave up waiting for tiles");
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    let elapsed = start.elapsed();

    let stats = server.manager()?.provider().stats();
    println!("\nDone in {elapsed:?}");
    println!(
        "Provider: generated={}, scaled={}, store_hits={}, store_errors={}, failures={}",
        stats.generated, stats.scaled, stats.store_hits, stats.store_errors, stats.failures
    );
    for (index, session) in sessions.into_iter().enumerate() {
        let tracker = session.tracker().stats();
        let sent = session.stats();
        println!(
            "Viewer {index}: visible={}, updates={}, avg update={:?}, max update={:?}, tiles sent={}, unload events={}",
            tracker.visible,
            tracker.updates,
            tracker.average_update,
            tracker.max_update,
            sent.tiles_sent,
            sent.unloads_sent
        );
        let client = session.close()?;
        println!(
            "  client holds {} tiles after close, received {}, unload events {}",
            client.held.len(),
            client.tiles,
            client.unload_events
        );
    }
    Ok(())
}

fn print_limits<M: LodMode>(mode: M, bounds: &WorldBounds, levels: u8) {
    let limits = CoordLimits::new(bounds, mode.axes(), mode.shift(), levels);
    println!("{} tiles, {} blocks wide at level 0", mode.name(), f64::from(mode.shift()).exp2());
    for level in 0..limits.level_count() {
        if let Some(b) = limits.level(level) {
            println!(
                "  L{level}: min={} max={} tiles={}",
                b.min,
                b.max,
                b.volume()
            );
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("lodstream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("max levels: {MAX_LODS}");
            println!(
                "modes: {} (shift {}), {} (shift {})",
                Heightmap::default().name(),
                Heightmap::default().shift(),
                Voxel::default().name(),
                Voxel::default().shift()
            );
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Bounds {
            radius,
            height,
            voxel,
        } => {
            let bounds = WorldBounds::centered(radius, height)?;
            if voxel {
                print_limits(Voxel::default(), &bounds, config.max_levels);
            } else {
                print_limits(Heightmap::default(), &bounds, config.max_levels);
            }
        }
        Commands::Simulate {
            viewers,
            ticks,
            radius,
            speed,
            store,
            drop_all_at,
        } => simulate(config, viewers, ticks, radius, speed, store, drop_all_at)?,
        Commands::VerifyStore { path } => {
            let store = FileTileStore::open(&path)?;
            let count = store.verify_integrity()?;
            println!("{}: {count} tiles verified", path.display());
        }
    }

    Ok(())
}
