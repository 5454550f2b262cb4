use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::DVec3;
use lodstream_common::{TilePos, ViewerId, WorldBounds};
use lodstream_persist::{MemoryTileStore, TileStore};
use lodstream_provider::{
    FnGenerator, GenerateError, HEIGHTMAP_SIZE, HeightSample, HeightmapScaler, HeightmapTile, Tile,
};
use lodstream_stream::{Heightmap, LodMode, LodServer, Session, SessionSink, StreamConfig, ViewerConfig};
use proptest::prelude::*;

/// Client double that mirrors what a real client would hold.
#[derive(Default)]
struct Client {
    held: HashMap<TilePos, Arc<Tile<HeightmapTile>>>,
    unload_events: usize,
}

impl SessionSink<HeightmapTile> for Client {
    fn send_tile(&mut self, tile: &Arc<Tile<HeightmapTile>>) {
        self.held.insert(tile.pos, Arc::clone(tile));
    }

    fn send_tile_unload(&mut self, pos: TilePos) {
        assert!(self.held.remove(&pos).is_some(), "unload of unsent {pos}");
        self.unload_events += 1;
    }

    fn send_multi_tile_unload(&mut self, positions: &[TilePos]) {
        for pos in positions {
            assert!(self.held.remove(pos).is_some(), "unload of unsent {pos}");
        }
        self.unload_events += 1;
    }
}

type ClientSession = Session<Heightmap, HeightmapTile, Client>;

fn terrain(pos: TilePos) -> Result<(HeightmapTile, i64), GenerateError> {
    let mut tile = HeightmapTile::default();
    for z in 0..HEIGHTMAP_SIZE {
        for x in 0..HEIGHTMAP_SIZE {
            let sample = HeightSample {
                height: 60 + pos.x + pos.z,
                block: 2,
                light: 15,
            };
            tile.set(x, z, Some(sample));
        }
    }
    Ok((tile, 0))
}

fn server(store: Option<Arc<dyn TileStore>>) -> LodServer<Heightmap, HeightmapTile> {
    let config = StreamConfig {
        cutoff_distance: 48,
        max_levels: 2,
        generation_threads: 2,
        max_in_flight: 16,
        eviction_grace: 0,
    };
    let mut server = LodServer::new(Heightmap::default(), config).unwrap();
    let bounds = WorldBounds::centered(2048, 256).unwrap();
    server
        .resolve_bounds(&bounds, FnGenerator::new(terrain), HeightmapScaler, store)
        .unwrap();
    server
}

/// Ticks and flushes, acknowledging everything, until every session has
/// every visible tile.
fn settle(server: &LodServer<Heightmap, HeightmapTile>, sessions: &mut [ClientSession]) {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        server.tick();
        let mut done = true;
        for s in sessions.iter_mut() {
            s.flush();
            let acks = s.ack_sender();
            for pos in s.sink().held.keys() {
                acks.ack(*pos);
            }
            done &= s.tracker().stats().waiting == 0 && s.stats().queued_tiles == 0;
        }
        if done {
            return;
        }
        assert!(Instant::now() < deadline, "sessions never settled");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn visible(s: &ClientSession) -> HashSet<TilePos> {
    let mut out = HashSet::new();
    let state = s.tracker().state().copied().unwrap();
    let manager = s.tracker().manager();
    s.tracker()
        .mode()
        .all_positions(&state, manager.limits(), &mut |p| {
            out.insert(p);
        });
    out
}

fn assert_refcounts(server: &LodServer<Heightmap, HeightmapTile>, sessions: &[ClientSession]) {
    let manager = server.manager().unwrap();
    let mut expected: HashMap<TilePos, u32> = HashMap::new();
    for s in sessions {
        for pos in visible(s) {
            *expected.entry(pos).or_default() += 1;
        }
    }
    assert_eq!(manager.tracked_count(), expected.len());
    for (pos, count) in &expected {
        assert_eq!(manager.refcount(pos), *count, "refcount of {pos}");
    }
}

#[test]
fn two_viewers_share_tiles() {
    let server = server(None);
    let mut sessions: Vec<ClientSession> = (0..2)
        .map(|_| {
            server
                .open_session(ViewerId::new(), Client::default(), ViewerConfig::default())
                .unwrap()
        })
        .collect();
    sessions[0].activate(DVec3::new(0.0, 70.0, 0.0)).unwrap();
    sessions[1].activate(DVec3::new(40.0, 70.0, 0.0)).unwrap();
    settle(&server, &mut sessions);
    assert_refcounts(&server, &sessions);

    // both levels, 7x7 windows each
    for s in &sessions {
        assert_eq!(s.sink().held.len(), 98);
        assert_eq!(s.sink().held.keys().copied().collect::<HashSet<_>>(), visible(s));
    }
    let shared = TilePos::xz(0, 1, 0);
    assert!(Arc::ptr_eq(
        &sessions[0].sink().held[&shared],
        &sessions[1].sink().held[&shared]
    ));
    let provider = server.manager().unwrap().provider().stats();
    assert_eq!(provider.failures, 0);
    assert!(provider.generated > 0);
}

#[test]
fn walking_keeps_client_in_sync() {
    let server = server(None);
    let mut sessions = vec![
        server
            .open_session(ViewerId::new(), Client::default(), ViewerConfig::default())
            .unwrap(),
    ];
    sessions[0].activate(DVec3::ZERO).unwrap();
    settle(&server, &mut sessions);

    for step in 1..=6 {
        let pos = DVec3::new(f64::from(step) * 24.0, 0.0, f64::from(step) * -10.0);
        sessions[0].update(pos).unwrap();
        settle(&server, &mut sessions);
        assert_refcounts(&server, &sessions);
        let s = &sessions[0];
        assert_eq!(s.sink().held.keys().copied().collect::<HashSet<_>>(), visible(s));
    }

    let session = sessions.pop().unwrap();
    let client = session.close().unwrap();
    assert!(client.held.is_empty());
    server.tick();
    assert_eq!(server.manager().unwrap().tracked_count(), 0);
}

#[test]
fn drop_all_redelivers_tiles() {
    let server = server(None);
    let mut sessions = vec![
        server
            .open_session(ViewerId::new(), Client::default(), ViewerConfig::default())
            .unwrap(),
    ];
    sessions[0].activate(DVec3::ZERO).unwrap();
    settle(&server, &mut sessions);
    let before = Arc::clone(&sessions[0].sink().held[&TilePos::xz(0, 0, 0)]);

    server.manager().unwrap().drop_all_tiles().unwrap();
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        server.tick();
        sessions[0].flush();
        let acks = sessions[0].ack_sender();
        for pos in sessions[0].sink().held.keys() {
            acks.ack(*pos);
        }
        let now = &sessions[0].sink().held[&TilePos::xz(0, 0, 0)];
        if !Arc::ptr_eq(now, &before) {
            assert_eq!(now.data, before.data);
            break;
        }
        assert!(Instant::now() < deadline, "tile never redelivered");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_refcounts(&server, &sessions);
}

#[test]
fn stored_tiles_skip_generation() {
    let store = Arc::new(MemoryTileStore::new());
    {
        let server = server(Some(store.clone()));
        let mut sessions = vec![
            server
                .open_session(ViewerId::new(), Client::default(), ViewerConfig::default())
                .unwrap(),
        ];
        sessions[0].activate(DVec3::ZERO).unwrap();
        settle(&server, &mut sessions);
    }
    assert!(!store.is_empty());

    let server = server(Some(store));
    let mut sessions = vec![
        server
            .open_session(ViewerId::new(), Client::default(), ViewerConfig::default())
            .unwrap(),
    ];
    sessions[0].activate(DVec3::ZERO).unwrap();
    settle(&server, &mut sessions);
    let stats = server.manager().unwrap().provider().stats();
    assert_eq!(stats.generated, 0);
    assert_eq!(stats.store_hits, 98);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn refcounts_match_visible_sets(
        walks in prop::collection::vec(
            prop::collection::vec((-200.0f64..200.0, -200.0f64..200.0), 1..5),
            1..4,
        )
    ) {
        let server = server(None);
        let mut sessions: Vec<ClientSession> = walks
            .iter()
            .map(|_| {
                server
                    .open_session(ViewerId::new(), Client::default(), ViewerConfig::default())
                    .unwrap()
            })
            .collect();
        for (s, walk) in sessions.iter_mut().zip(&walks) {
            s.activate(DVec3::new(walk[0].0, 0.0, walk[0].1)).unwrap();
        }
        assert_refcounts(&server, &sessions);
        let steps = walks.iter().map(Vec::len).max().unwrap_or(0);
        for step in 1..steps {
            for (s, walk) in sessions.iter_mut().zip(&walks) {
                if let Some((x, z)) = walk.get(step) {
                    s.update(DVec3::new(*x, 0.0, *z)).unwrap();
                }
            }
            assert_refcounts(&server, &sessions);
        }
        sessions.clear();
        prop_assert_eq!(server.manager().unwrap().tracked_count(), 0);
    }
}
