//! End-to-end frames: fetch, tessellate on the worker, upload, compose.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use geozero::mvt::tile::{self, GeomType};
use geozero::mvt::Tile;
use geozero::mvt::Message;

use tilestream_core::{Extent, Point, TileCoord, TileGrid, TileState};
use tilestream_io::{FetchError, MemoryFetcher, SourceConfig, TileFetcher};
use tilestream_renderer::{
    CommandRecorder, FrameCompositor, FrameSummary, GeometryKind, GpuCommand, ScissorRect, Viewport,
};
use tilestream_worker::StyleDescriptor;

const STYLE: &str = r##"{
    "fill": { "attributes": [{ "name": "color", "value": { "type": "color", "value": "#ff0000" } }] },
    "point": { "attributes": [{ "name": "color", "value": { "type": "color", "value": "#777777" } }] }
}"##;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

fn geometry(points: &[(i32, i32)], close: bool) -> Vec<u32> {
    let mut out = vec![command(1, 1)];
    let (mut cx, mut cy) = (0, 0);
    for (i, &(x, y)) in points.iter().enumerate() {
        if i == 1 {
            out.push(command(2, points.len() as u32 - 1));
        }
        out.push(zigzag(x - cx));
        out.push(zigzag(y - cy));
        (cx, cy) = (x, y);
    }
    if close {
        out.push(command(7, 1));
    }
    out
}

fn feature(kind: GeomType, geometry: Vec<u32>) -> tile::Feature {
    tile::Feature {
        id: None,
        tags: vec![],
        r#type: Some(kind as i32),
        geometry,
    }
}

fn encode(features: Vec<tile::Feature>) -> Vec<u8> {
    Tile {
        layers: vec![tile::Layer {
            version: 2,
            name: "test".into(),
            features,
            keys: vec![],
            values: vec![],
            extent: Some(4096),
        }],
    }
    .encode_to_vec()
}

fn square_and_point() -> Vec<u8> {
    encode(vec![
        feature(GeomType::Polygon, geometry(&[(0, 0), (0, 2048), (2048, 2048), (2048, 0)], true)),
        feature(GeomType::Point, geometry(&[(3000, 3000)], false)),
    ])
}

fn config() -> SourceConfig {
    SourceConfig {
        urls: vec!["mem://{z}/{x}/{y}".into()],
        render_buffer: 0.0,
        preload: 0,
        fetch_threads: 1,
        transition: 0,
        ..SourceConfig::default()
    }
}

fn compositor(fetcher: Arc<dyn TileFetcher>) -> FrameCompositor {
    compositor_with(fetcher, config())
}

fn compositor_with(fetcher: Arc<dyn TileFetcher>, config: SourceConfig) -> FrameCompositor {
    FrameCompositor::new(config, "A", fetcher, StyleDescriptor::from_json(STYLE).unwrap())
        .unwrap()
        .with_grid(TileGrid::xyz(Extent::new(0.0, 0.0, 4096.0, 4096.0), 5, 256))
}

/// A view of exactly tile 3/2/1 on a 256 px canvas.
fn viewport() -> Viewport {
    Viewport::new(256.0, 256.0)
        .with_center(Point::new(1280.0, 3328.0))
        .with_resolution(2.0)
}

/// Render frames until `done` holds. The recorder keeps only the last frame.
fn render_until(
    compositor: &mut FrameCompositor,
    viewport: &Viewport,
    gpu: &mut CommandRecorder,
    done: impl Fn(&FrameSummary) -> bool,
) -> FrameSummary {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        gpu.take_commands();
        let summary = compositor.render_frame(viewport, gpu);
        if done(&summary) {
            return summary;
        }
        assert!(Instant::now() < deadline, "gave up waiting, last frame: {summary:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Holds every fetch until the test lets it through.
struct GatedFetcher {
    inner: MemoryFetcher,
    gate: flume::Receiver<()>,
}

impl TileFetcher for GatedFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.gate
            .recv()
            .map_err(|_| FetchError::Transport("gate closed".into()))?;
        self.inner.fetch(url)
    }
}

#[test]
fn test_square_and_point_tile_is_drawn() {
    init_logger();
    let fetcher = MemoryFetcher::new();
    fetcher.insert("mem://3/2/1", square_and_point());
    let mut compositor = compositor(Arc::new(fetcher));
    let mut gpu = CommandRecorder::new();
    let vp = viewport();

    let summary = render_until(&mut compositor, &vp, &mut gpu, |s| s.drawn == 1);
    assert!(summary.is_complete());
    assert_eq!(summary.draw_calls, 2);

    let draws: Vec<_> = gpu.draws().collect();
    let kinds: Vec<_> = draws.iter().map(|(call, _)| call.kind).collect();
    assert_eq!(kinds, vec![GeometryKind::Polygon, GeometryKind::Point]);
    for (call, scissor) in &draws {
        assert_eq!(*scissor, Some(ScissorRect { x: 0, y: 0, width: 256, height: 256 }));
        // The tile's bottom-left corner lands at the canvas' bottom-left.
        assert_eq!(call.transform, [0.5, 0.0, 0.0, -0.5, 0.0, 256.0]);
    }
    assert_eq!(draws[0].0.index_count, 6);
    assert_eq!(draws[1].0.index_count, 6);
    assert_eq!(gpu.live_buffers(), 4);
    assert_eq!(compositor.stats().uploaded, 1);

    compositor.dispose(&mut gpu);
    assert_eq!(gpu.live_buffers(), 0);
}

#[test]
fn test_panning_away_while_loading_drops_response() {
    init_logger();
    let (open, gate) = flume::unbounded();
    let inner = MemoryFetcher::new();
    inner.insert("mem://3/2/1", square_and_point());
    let mut compositor = compositor(Arc::new(GatedFetcher { inner, gate }));
    let mut gpu = CommandRecorder::new();

    let vp = viewport();
    compositor.render_frame(&vp, &mut gpu);
    let id = compositor.cache().peek(&TileCoord::new(3, 2, 1)).unwrap();
    assert_eq!(compositor.cache().get(id).unwrap().state(), TileState::Loading);

    let mut away = vp;
    away.pan(-1024.0, 0.0);
    compositor.render_frame(&away, &mut gpu);
    assert_eq!(compositor.cache().get(id).unwrap().state(), TileState::Abort);

    open.send(()).unwrap();
    open.send(()).unwrap();
    render_until(&mut compositor, &away, &mut gpu, |s| s.loader.dropped >= 1);

    assert_eq!(compositor.cache().get(id).unwrap().state(), TileState::Abort);
    assert!(compositor.cache().is_evictable(id));
    assert_eq!(compositor.stats().uploaded, 0);
    assert_eq!(gpu.live_buffers(), 0);
}

#[test]
fn test_failed_fetch_draws_nothing() {
    init_logger();
    let mut compositor = compositor(Arc::new(MemoryFetcher::new()));
    let mut gpu = CommandRecorder::new();
    let vp = viewport();

    let summary = render_until(&mut compositor, &vp, &mut gpu, |s| s.failed == 1);
    assert_eq!(summary.drawn, 0);
    assert_eq!(gpu.draws().count(), 0);

    let id = compositor.cache().peek(&TileCoord::new(3, 2, 1)).unwrap();
    assert_eq!(compositor.cache().get(id).unwrap().state(), TileState::Error);

    // Errors are final: later frames neither retry nor draw.
    let summary = compositor.render_frame(&vp, &mut gpu);
    assert_eq!(summary.failed, 1);
    assert_eq!(compositor.cache().peek(&TileCoord::new(3, 2, 1)), Some(id));
}

#[test]
fn test_stale_tile_draws_until_replacement_loads() {
    init_logger();
    let (open, gate) = flume::unbounded();
    let inner = MemoryFetcher::new();
    inner.insert("mem://3/2/1", square_and_point());
    inner.insert("alt://3/2/1", square_and_point());
    let mut compositor = compositor(Arc::new(GatedFetcher { inner, gate }));
    let mut gpu = CommandRecorder::new();
    let vp = viewport();

    open.send(()).unwrap();
    render_until(&mut compositor, &vp, &mut gpu, |s| s.is_complete());
    let old = compositor.cache().peek(&TileCoord::new(3, 2, 1)).unwrap();

    compositor.set_urls(vec!["alt://{z}/{x}/{y}".into()]);
    gpu.take_commands();
    let summary = compositor.render_frame(&vp, &mut gpu);
    assert_eq!((summary.drawn, summary.interim), (1, 1));
    assert_eq!(summary.draw_calls, 2);
    let new = compositor.cache().peek(&TileCoord::new(3, 2, 1)).unwrap();
    assert_ne!(old, new);
    assert_eq!(compositor.cache().get(new).unwrap().interim(), Some(old));
    assert_eq!(compositor.cache().get(new).unwrap().url(), Some("alt://3/2/1"));

    open.send(()).unwrap();
    let summary = render_until(&mut compositor, &vp, &mut gpu, |s| s.is_complete());
    assert_eq!(summary.draw_calls, 2);
    assert!(compositor.cache().is_evictable(old));
}

#[test]
fn test_empty_tile_leaves_no_scissor_behind() {
    init_logger();
    let fetcher = MemoryFetcher::new();
    fetcher.insert("mem://3/2/1", Tile { layers: vec![] }.encode_to_vec());
    let mut compositor = compositor(Arc::new(fetcher));
    let mut gpu = CommandRecorder::new();
    let vp = viewport();

    let summary = render_until(&mut compositor, &vp, &mut gpu, |s| s.drawn == 1);
    assert!(summary.is_complete());
    assert_eq!(summary.draw_calls, 0);
    let last_scissor = gpu.commands().iter().rev().find_map(|c| match c {
        GpuCommand::SetScissor { rect } => Some(*rect),
        _ => None,
    });
    assert!(matches!(last_scissor, None | Some(None)), "scissor left set: {last_scissor:?}");
}

#[test]
fn test_new_tile_fades_in_over_its_ancestor() {
    init_logger();
    let fetcher = MemoryFetcher::new();
    fetcher.insert("mem://3/2/1", square_and_point());
    fetcher.insert("mem://2/1/0", encode(vec![feature(GeomType::Point, geometry(&[(100, 100)], false))]));
    let config = SourceConfig {
        preload: 1,
        transition: 100,
        ..config()
    };
    let mut compositor = compositor_with(Arc::new(fetcher), config);
    let mut gpu = CommandRecorder::new();
    let vp = viewport();

    // Hold the clock so both tiles count as loaded at t0.
    let t0 = Instant::now();
    let deadline = t0 + Duration::from_secs(10);
    while compositor.stats().uploaded < 2 {
        compositor.render_frame_at(&vp, &mut gpu, t0);
        assert!(Instant::now() < deadline, "tiles never loaded: {:?}", compositor.stats());
        thread::sleep(Duration::from_millis(5));
    }

    gpu.take_commands();
    let summary = compositor.render_frame_at(&vp, &mut gpu, t0 + Duration::from_millis(50));
    assert_eq!((summary.drawn, summary.fading), (1, 1));
    assert!(!summary.is_complete());
    let draws: Vec<_> = gpu.draws().map(|(call, _)| call.clone()).collect();
    let kinds: Vec<_> = draws.iter().map(|call| call.kind).collect();
    assert_eq!(kinds, vec![GeometryKind::Point, GeometryKind::Polygon, GeometryKind::Point]);
    // 2/1/0 and 3/2/1 share their bottom-left corner.
    assert_eq!(draws[0].transform, draws[1].transform);
    for call in &draws {
        assert!((call.opacity - 0.5).abs() < 1e-3, "opacity {}", call.opacity);
    }

    gpu.take_commands();
    let summary = compositor.render_frame_at(&vp, &mut gpu, t0 + Duration::from_millis(100));
    assert_eq!(summary.fading, 0);
    assert!(summary.is_complete());
    assert_eq!(summary.draw_calls, 2);
    assert!(gpu.draws().all(|(call, _)| call.opacity == 1.0));
}
