use std::fs;

use anyhow::{Context, Result};
use dgds_engine::{
    Clock, EngineConfig, ManualClock, RecordingRenderer, RecordingSound, RenderEvent, SavedEngine,
    SceneScript, ScriptEngine, SegmentState, Services, SoundEvent, StubLoader,
};
use dgds_formats::ScriptBundle;
use serde::Serialize;

use crate::cli::Args;

#[derive(Serialize)]
struct TickTrace {
    tick: u32,
    time_ms: u32,
    render: Vec<RenderEvent>,
    sound: Vec<SoundEvent>,
}

pub fn execute(args: Args) -> Result<()> {
    let mut config = match args.config.as_deref() {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(variant) = args.variant {
        config.variant = variant;
    }
    if let Some(seed) = args.seed {
        config.rng_seed = seed;
    }

    let bundle = ScriptBundle::from_json_file(&args.bundle)?;
    let renderer = RecordingRenderer::new();
    let sound = RecordingSound::new();
    let clock = ManualClock::default();
    let services = Services::headless(config.rng_seed)
        .with_renderer(renderer.clone())
        .with_sound(sound.clone())
        .with_loader(StubLoader::new())
        .with_clock(clock.clone());
    let mut engine = ScriptEngine::new(config, bundle, services);

    match args.restore_json.as_deref() {
        Some(path) => {
            let saved = SavedEngine::from_json_file(path)?;
            engine
                .restore_state(&saved)
                .with_context(|| format!("restoring {}", path.display()))?;
            match saved.active.as_deref() {
                Some(active) if !active.eq_ignore_ascii_case(&args.ads) => {
                    eprintln!(
                        "[dgds_engine] warning: {} restores {active} as active; ignoring --ads {}",
                        path.display(),
                        args.ads
                    );
                }
                Some(_) => {}
                None => engine
                    .load(&args.ads)
                    .with_context(|| format!("loading {}", args.ads))?,
            }
        }
        None => {
            engine
                .load(&args.ads)
                .with_context(|| format!("loading {}", args.ads))?;
            for segment in &args.start_segments {
                if engine.index_of_segment(*segment).is_none() {
                    eprintln!("[dgds_engine] warning: {} has no segment {segment}", args.ads);
                }
                engine.set_segment_activation(*segment, SegmentState::START.bits());
            }
        }
    }

    let mut traces = Vec::new();
    let mut sound_seen = 0;
    for tick in 0..args.ticks {
        clock.advance(args.tick_ms);
        let ran = engine
            .run()
            .with_context(|| format!("running tick {tick} of {}", args.ads))?;
        if !ran {
            println!("tick {tick:>4}: nothing to run");
            break;
        }

        let render = renderer.drain();
        let all_sound = sound.events();
        let new_sound = all_sound[sound_seen..].to_vec();
        sound_seen = all_sound.len();

        if let Some(scene) = engine.active() {
            print_tick(tick, scene, render.len(), args.verbose);
        }
        if args.trace_json.is_some() {
            traces.push(TickTrace {
                tick,
                time_ms: clock.this_frame_ms(),
                render,
                sound: new_sound,
            });
        }
    }

    if let Some(path) = args.trace_json.as_ref() {
        let json = serde_json::to_string_pretty(&traces).context("serializing tick trace")?;
        fs::write(path, json).with_context(|| format!("writing trace to {}", path.display()))?;
        println!("Saved trace JSON to {}", path.display());
    }
    if let Some(path) = args.save_json.as_ref() {
        engine.save_state()?.write_json_file(path)?;
        println!("Saved interpreter state to {}", path.display());
    }
    Ok(())
}

fn print_tick(tick: u32, scene: &SceneScript, draw_calls: usize, verbose: bool) {
    let segments: Vec<String> = scene
        .segments()
        .iter()
        .map(|segment| format!("{}={:?}", segment.number, segment.state))
        .collect();
    println!(
        "tick {tick:>4}: {draw_calls:>3} draw calls | segments {}",
        segments.join(" ")
    );
    for seq in scene.sequences().entries() {
        if !verbose && seq.last_frame.is_none() {
            continue;
        }
        println!(
            "    env {:>2} seq {:>2}: {:?} frame {} (drew {:?}) played {}",
            seq.enviro, seq.seq_num, seq.run_type, seq.current_frame, seq.last_frame, seq.run_played
        );
    }
}
