use std::collections::BTreeMap;

use dgds_formats::OpcodeTable;
use log::{debug, info};

use crate::ads::{SceneRunner, SceneScript};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::host::{ScriptSource, Services};
use crate::ttm::TtmInterpreter;

/// Host-facing entry point: owns the loaded scene scripts, the TTM
/// interpreter and the collaborators, and runs one tick per `run` call.
pub struct ScriptEngine {
    pub(crate) config: EngineConfig,
    pub(crate) source: Box<dyn ScriptSource>,
    pub(crate) services: Services,
    pub(crate) ttm: TtmInterpreter,
    pub(crate) scripts: BTreeMap<String, SceneScript>,
    pub(crate) active: Option<String>,
}

impl ScriptEngine {
    pub fn new(config: EngineConfig, source: impl ScriptSource + 'static, services: Services) -> Self {
        let ttm = TtmInterpreter::new(OpcodeTable::ttm(config.variant), config.max_gosub_depth);
        ScriptEngine {
            config,
            source: Box::new(source),
            services,
            ttm,
            scripts: BTreeMap::new(),
            active: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.services
    }

    /// Make `filename` the active scene script, loading it and the TTM
    /// files it references on first use.
    pub fn load(&mut self, filename: &str) -> Result<(), EngineError> {
        if self.scripts.contains_key(filename) {
            debug!("{filename} already loaded, switching to it");
            self.active = Some(filename.to_string());
            return Ok(());
        }

        let scene = SceneScript::load(filename, self.source.as_ref(), self.config.variant)?;
        info!(
            "loaded {filename}: {} segments, {} sequences in {} TTM files",
            scene.segments().len(),
            scene.sequences().len(),
            scene.enviros().len()
        );
        self.scripts.insert(filename.to_string(), scene);
        self.active = Some(filename.to_string());
        Ok(())
    }

    /// Drop every loaded script.
    pub fn unload(&mut self) {
        self.scripts.clear();
        self.active = None;
    }

    /// Run one tick of the active script. Returns `false` when there was
    /// nothing to run.
    pub fn run(&mut self) -> Result<bool, EngineError> {
        let Some(scene) = self
            .active
            .as_ref()
            .and_then(|name| self.scripts.get_mut(name))
        else {
            return Ok(false);
        };
        SceneRunner::new(scene, &mut self.ttm, &mut self.services).run_tick()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&SceneScript> {
        self.active.as_ref().and_then(|name| self.scripts.get(name))
    }

    fn active_mut(&mut self) -> Option<&mut SceneScript> {
        self.active
            .as_ref()
            .and_then(|name| self.scripts.get_mut(name))
    }

    pub fn script(&self, filename: &str) -> Option<&SceneScript> {
        self.scripts.get(filename)
    }

    pub fn loaded_scripts(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }

    /// Send the next sequence whose frame renders to `frame` on its
    /// advance.
    pub fn set_goto_target(&mut self, frame: i16) {
        if let Some(scene) = self.active_mut() {
            scene.host_signals.goto_target = Some(frame);
        }
    }

    /// Purge the next sequence whose frame renders.
    pub fn set_hit_purge(&mut self) {
        if let Some(scene) = self.active_mut() {
            scene.host_signals.hit_purge = true;
        }
    }

    pub fn get_state_for_segment(&self, segment: i16) -> bool {
        self.active()
            .is_some_and(|scene| scene.state_for_segment(segment))
    }

    pub fn set_segment_activation(&mut self, segment: i16, value: u16) {
        if let Some(scene) = self.active_mut() {
            scene.set_segment_activation(segment, value);
        }
    }

    pub fn segment_or_state(&mut self, segment: i16, value: u16) {
        if let Some(scene) = self.active_mut() {
            scene.segment_or_state(segment, value);
        }
    }

    pub fn segment_set_state(&mut self, segment: i16, value: u16) {
        if let Some(scene) = self.active_mut() {
            scene.segment_set_state(segment, value);
        }
    }

    pub fn index_of_segment(&self, segment: i16) -> Option<usize> {
        self.active()
            .and_then(|scene| scene.index_of_segment(segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentState;
    use dgds_formats::{AdsResource, ScriptBundle, ScriptWriter, TtmReference, TtmResource};

    fn bundle() -> ScriptBundle {
        let mut bundle = ScriptBundle::default();
        for (name, segment) in [("A.ADS", 1), ("B.ADS", 2)] {
            bundle.ads.insert(
                name.to_string(),
                AdsResource {
                    scripts: vec![TtmReference {
                        id: 1,
                        name: "A.TTM".to_string(),
                    }],
                    words: ScriptWriter::new()
                        .word(segment)
                        .op(0x2000, &[1, 1, 0, 0])
                        .op(0xFFFF, &[])
                        .words(),
                },
            );
        }
        bundle.ttm.insert(
            "A.TTM".to_string(),
            TtmResource {
                frames: None,
                words: ScriptWriter::new()
                    .op(0x1111, &[1])
                    .op(0x0FF0, &[])
                    .words(),
            },
        );
        bundle
    }

    #[test]
    fn run_without_script_does_nothing() {
        let mut engine = ScriptEngine::new(EngineConfig::default(), bundle(), Services::headless(0));
        assert!(!engine.run().unwrap());
        assert!(!engine.get_state_for_segment(1));
    }

    #[test]
    fn loading_again_switches_without_reloading() {
        let mut engine = ScriptEngine::new(EngineConfig::default(), bundle(), Services::headless(0));
        engine.load("A.ADS").unwrap();
        engine.segment_or_state(1, SegmentState::START.bits());
        engine.load("B.ADS").unwrap();
        assert_eq!(engine.active_name(), Some("B.ADS"));
        assert_eq!(engine.index_of_segment(2), Some(0));

        engine.load("A.ADS").unwrap();
        assert_eq!(engine.loaded_scripts().count(), 2);
        let state = engine.active().and_then(|scene| scene.segment(1)).map(|s| s.state);
        assert_eq!(state, Some(SegmentState(12)));
    }

    #[test]
    fn missing_script_is_reported() {
        let mut engine = ScriptEngine::new(EngineConfig::default(), bundle(), Services::headless(0));
        let err = engine.load("NOPE.ADS").unwrap_err();
        assert!(matches!(err, EngineError::ScriptUnavailable { .. }));
        assert_eq!(engine.active_name(), None);
    }
}
