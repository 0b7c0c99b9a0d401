//! # Section Pipeline Soak Run
//!
//! Drives the dispatcher against a headless backend for a few hundred
//! frames: terrain loads, blocks change every frame, the camera walks, and
//! translucent sections are re-sorted as it moves.
//!
//! Usage: `section_soak [pipeline.toml]`

use std::sync::Arc;
use std::time::{Duration, Instant};

use tessera_core::{SectionPos, SECTION_SIZE};
use tessera_render::{
    Dispatcher, GridBlock, GridWorld, HeadlessBackend, MeshResult, PipelineConfig, RenderTarget,
};

/// Sections per axis on the horizontal plane.
const WORLD_SECTIONS: i32 = 8;
/// Sections stacked vertically.
const WORLD_HEIGHT: i32 = 3;
/// Frames to simulate.
const FRAMES: u32 = 600;
/// Frame budget the loop sleeps towards.
const FRAME_TIME: Duration = Duration::from_millis(4);
/// Sections closer than this (in blocks) compile at high priority.
const HIGH_PRIORITY_RADIUS: f64 = 48.0;
/// Frames between re-sorts of translucent sections.
const RESORT_INTERVAL: u32 = 20;
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const SECTION_BLOCKS: i32 = SECTION_SIZE as i32;

fn terrain(x: i32, y: i32, z: i32) -> GridBlock {
    let height = 14 + ((x / 3 + z / 5) % 7);
    match y {
        y if y < height - 3 => GridBlock::Solid,
        y if y < height => {
            if (x * 31 + z * 17) % 23 == 0 {
                GridBlock::Cutout
            } else {
                GridBlock::Solid
            }
        }
        y if y < 18 => GridBlock::Water,
        y if y == height && (x * 7 + z * 13) % 97 == 0 => GridBlock::Translucent,
        _ => GridBlock::Air,
    }
}

fn build_world() -> GridWorld {
    let world = GridWorld::new();
    for sx in 0..WORLD_SECTIONS {
        for sy in 0..WORLD_HEIGHT {
            for sz in 0..WORLD_SECTIONS {
                let pos = SectionPos::new(sx, sy, sz);
                let (ox, oy, oz) = pos.origin();
                world.fill_section(pos, |local| {
                    terrain(
                        ox + i32::from(local.x),
                        oy + i32::from(local.y),
                        oz + i32::from(local.z),
                    )
                });
            }
        }
    }
    world
}

/// Linear congruential step; the soak must be reproducible.
fn next_random(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
    *state >> 33
}

fn run(config: PipelineConfig) -> MeshResult<()> {
    let world = Arc::new(build_world());
    let mut target = RenderTarget::new(HeadlessBackend::new());
    let mut dispatcher = Dispatcher::new(Arc::clone(&world), config)?;
    for pos in world.take_dirty_sections() {
        target.load_section(pos);
        dispatcher.schedule_compile(pos, pos.distance_squared_to([0.0; 3]), false)?;
    }

    let extent = f64::from(WORLD_SECTIONS * SECTION_BLOCKS);
    let mut rng = 0x5EED_u64;
    let start = Instant::now();
    let mut uploads = 0usize;

    for frame in 0..FRAMES {
        let frame_start = Instant::now();
        #[allow(clippy::cast_possible_truncation)]
        let camera = [
            (f64::from(frame) / f64::from(FRAMES) * extent) as f32,
            40.0,
            (extent / 2.0) as f32,
        ];
        dispatcher.set_camera(camera)?;

        // One block edit per frame.
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap,
            clippy::cast_sign_loss
        )]
        {
            let bound = (WORLD_SECTIONS * SECTION_BLOCKS) as u64;
            let x = (next_random(&mut rng) % bound) as i32;
            let z = (next_random(&mut rng) % bound) as i32;
            let y = 10 + (next_random(&mut rng) % 12) as i32;
            let block = if next_random(&mut rng) % 2 == 0 {
                GridBlock::Air
            } else {
                GridBlock::Translucent
            };
            world.set_block(x, y, z, block);
        }

        for pos in world.take_dirty_sections() {
            let distance = pos.distance_squared_to(camera);
            let high = distance.sqrt() < HIGH_PRIORITY_RADIUS;
            dispatcher.schedule_compile(pos, distance, high)?;
        }

        if frame % RESORT_INTERVAL == 0 {
            for sx in 0..WORLD_SECTIONS {
                for sy in 0..WORLD_HEIGHT {
                    for sz in 0..WORLD_SECTIONS {
                        let pos = SectionPos::new(sx, sy, sz);
                        if let Some(state) = target.sort_state(pos) {
                            dispatcher.schedule_resort(pos, state, camera)?;
                        }
                    }
                }
            }
        }

        uploads += dispatcher.drain_uploads(&mut target)?;

        if frame % 100 == 0 {
            let stats = dispatcher.poll_stats();
            println!(
                "frame {frame:4}: pending {:3}/{:3}  running {}  uploads waiting {:3}  done {:5}",
                stats.pending_high,
                stats.pending_low,
                stats.running,
                stats.pending_uploads,
                stats.completed,
            );
        }
        if let Some(rest) = FRAME_TIME.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    dispatcher.shutdown(&mut target)?;
    let stats = dispatcher.poll_stats();
    let upload_stats = target.stats();

    println!();
    println!("═══════════════════════════════════════════════════════════");
    println!("  SECTION SOAK RESULTS");
    println!("═══════════════════════════════════════════════════════════");
    println!("  Wall time:          {:?}", start.elapsed());
    println!("  Uploads drained:    {uploads}");
    println!("  Tasks completed:    {}", stats.completed);
    println!("  Tasks cancelled:    {}", stats.cancelled);
    println!("  Tasks failed:       {}", stats.failed);
    println!("  Uploads discarded:  {}", upload_stats.discarded);
    println!("  Bytes uploaded:     {}", upload_stats.bytes);
    println!("  Sections on GPU:    {}", target.section_count());
    println!("  Live buffers:       {}", target.backend().live_buffers());
    println!("═══════════════════════════════════════════════════════════");
    Ok(())
}

fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    };
    let result = config.and_then(run);
    if let Err(err) = result {
        eprintln!("section soak failed: {err}");
        std::process::exit(1);
    }
}
