use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use dgds_formats::GameVariant;

#[derive(Parser, Debug)]
#[command(
    about = "Headless host that runs DGDS scene scripts and traces what they draw and play",
    version
)]
pub struct Args {
    /// Path to the JSON script bundle
    #[arg(long)]
    pub bundle: PathBuf,

    /// Scene script to load from the bundle
    #[arg(long)]
    pub ads: String,

    /// Optional JSON engine config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Script dialect (overrides the config file)
    #[arg(long, value_enum)]
    pub variant: Option<GameVariant>,

    /// Seed for the random source (overrides the config file)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Segment to start before the first tick (repeatable)
    #[arg(long = "start", value_name = "SEGMENT", allow_negative_numbers = true)]
    pub start_segments: Vec<i16>,

    /// Number of ticks to run
    #[arg(long, default_value_t = 10)]
    pub ticks: u32,

    /// Engine milliseconds between ticks
    #[arg(long, default_value_t = 60)]
    pub tick_ms: u32,

    /// Restore interpreter state from this file before running
    #[arg(long)]
    pub restore_json: Option<PathBuf>,

    /// Path to write the interpreter state after the last tick
    #[arg(long)]
    pub save_json: Option<PathBuf>,

    /// Path to write the recorded draw and sound events as JSON
    #[arg(long)]
    pub trace_json: Option<PathBuf>,

    /// Print every sequence each tick instead of only the ones that drew
    #[arg(long)]
    pub verbose: bool,
}

pub fn parse() -> Result<Args> {
    let args = Args::parse();
    args.validate()?;
    Ok(args)
}

impl Args {
    fn validate(&self) -> Result<()> {
        if self.ticks == 0 && self.trace_json.is_some() {
            bail!("--trace-json needs at least one tick");
        }
        if self.restore_json.is_some() && !self.start_segments.is_empty() {
            bail!("--start cannot be combined with --restore-json");
        }
        Ok(())
    }
}
