use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dgds_formats::SEGMENT_CAPACITY;
use log::info;
use serde::{Deserialize, Serialize};

use crate::ads::SceneScript;
use crate::engine::ScriptEngine;
use crate::error::EngineError;
use crate::segment::SegmentState;
use crate::sequence::{SeqHandle, TtmSeq};

/// Interpreter state of every loaded scene script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedEngine {
    pub active: Option<String>,
    pub scripts: Vec<SavedScript>,
}

/// Per-script state. The segment arrays always hold `SEGMENT_CAPACITY`
/// entries; slots past the script's last segment keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedScript {
    pub filename: String,
    pub states: Vec<SegmentState>,
    pub countdowns: Vec<i16>,
    pub while_resume: Vec<Option<usize>>,
    pub sequences: Vec<TtmSeq>,
    pub order: Vec<SeqHandle>,
}

impl SavedEngine {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading saved state {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing saved state {}", path.display()))
    }

    pub fn write_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing saved state")?;
        fs::write(path, json)
            .with_context(|| format!("writing saved state to {}", path.display()))?;
        info!("saved interpreter state to {}", path.display());
        Ok(())
    }
}

impl SavedScript {
    fn capture(scene: &SceneScript) -> Self {
        let mut states = vec![SegmentState::FIXED; SEGMENT_CAPACITY];
        let mut countdowns = vec![0; SEGMENT_CAPACITY];
        let mut while_resume = vec![None; SEGMENT_CAPACITY];
        for (index, segment) in scene.segments.iter().enumerate() {
            states[index] = segment.state;
            countdowns[index] = segment.countdown;
            while_resume[index] = segment.while_resume;
        }
        SavedScript {
            filename: scene.filename.clone(),
            states,
            countdowns,
            while_resume,
            sequences: scene.seqs.entries().to_vec(),
            order: scene.seqs.order().to_vec(),
        }
    }

    fn check_length(&self, field: &'static str, found: usize, expected: usize) -> Result<(), EngineError> {
        if found != expected {
            return Err(EngineError::SaveArrayLength {
                script: self.filename.clone(),
                field,
                found,
                expected,
            });
        }
        Ok(())
    }

    fn apply(&self, scene: &mut SceneScript) -> Result<(), EngineError> {
        self.check_length("states", self.states.len(), SEGMENT_CAPACITY)?;
        self.check_length("countdowns", self.countdowns.len(), SEGMENT_CAPACITY)?;
        self.check_length("while_resume", self.while_resume.len(), SEGMENT_CAPACITY)?;
        self.check_length("sequences", self.sequences.len(), scene.seqs.len())?;

        for (index, segment) in scene.segments.iter_mut().enumerate() {
            segment.state = self.states[index];
            segment.countdown = self.countdowns[index];
            segment.while_resume = self.while_resume[index];
        }
        for (live, saved) in scene.seqs.entries_mut().iter_mut().zip(&self.sequences) {
            *live = saved.clone();
        }
        if !scene.seqs.set_order(self.order.clone()) {
            return Err(EngineError::SaveArrayLength {
                script: self.filename.clone(),
                field: "order",
                found: self.order.len(),
                expected: scene.seqs.len(),
            });
        }
        Ok(())
    }
}

impl ScriptEngine {
    /// Snapshot every loaded script. Not allowed while a TTM GOSUB is
    /// running.
    pub fn save_state(&self) -> Result<SavedEngine, EngineError> {
        let depth = self.ttm.gosub_depth();
        if depth != 0 {
            return Err(EngineError::SaveDuringGosub { depth });
        }
        Ok(SavedEngine {
            active: self.active.clone(),
            scripts: self.scripts.values().map(SavedScript::capture).collect(),
        })
    }

    /// Reload every saved script by name, apply its state and reselect the
    /// saved active script.
    pub fn restore_state(&mut self, saved: &SavedEngine) -> Result<(), EngineError> {
        self.unload();
        for script in &saved.scripts {
            self.load(&script.filename)?;
            if let Some(scene) = self.scripts.get_mut(&script.filename) {
                script.apply(scene)?;
            }
        }

        self.active = match &saved.active {
            Some(name) if self.scripts.contains_key(name) => Some(name.clone()),
            Some(name) => return Err(EngineError::UnknownActiveScript(name.clone())),
            None => None,
        };
        Ok(())
    }
}
