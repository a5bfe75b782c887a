//! List capturable windows and drive the capture pipeline for a moment.
//!
//! Run with `RUST_LOG=wintex_engine=debug` for scheduling detail.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;

use wintex_engine::{CapturePriority, Engine, EngineConfig, MessageKind};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let engine = build_engine()?;
    let mut known = BTreeSet::new();

    // Two seconds of host frame loop at ~60 fps.
    for _ in 0..120 {
        engine.on_update_tick(1.0 / 60.0);

        for message in engine.drain_messages() {
            match message.kind {
                MessageKind::WindowAdded => {
                    known.insert(message.window_id);
                    engine.request_update_title(message.window_id);
                    engine.request_capture(message.window_id, CapturePriority::High);
                }
                MessageKind::WindowRemoved => {
                    known.remove(&message.window_id);
                }
                _ => {}
            }
        }

        engine.on_render_tick();
        std::thread::sleep(Duration::from_millis(16));
    }

    println!("{} window(s):", known.len());
    for id in known {
        println!(
            "  #{id:<4} {:>4}x{:<4} tex {:>4}x{:<4} z{:<3} [{}] {}",
            engine.window_width(id),
            engine.window_height(id),
            engine.window_texture_width(id),
            engine.window_texture_height(id),
            engine.window_z_order(id),
            engine.window_class_name(id),
            engine.window_title(id),
        );
    }

    engine.shutdown();
    Ok(())
}

#[cfg(windows)]
fn build_engine() -> Result<Engine> {
    Ok(Engine::native(EngineConfig::default())?)
}

#[cfg(not(windows))]
fn build_engine() -> Result<Engine> {
    use std::sync::Arc;
    use wintex_engine::{SoftwareGpu, StubDesktop};

    Ok(Engine::new(
        Arc::new(StubDesktop::new()),
        Arc::new(SoftwareGpu::new()),
        EngineConfig::default(),
    ))
}
