//! Scene VM: segment scheduling, control flow and the per-tick sequence
//! pass.

use dgds_formats::{ads_ops, AdsScript, ArgCount, GameVariant, OpcodeTable, ScriptCursor, TtmScript};
use log::{debug, trace, warn};

use crate::config::MS_PER_FRAME;
use crate::enviro::TtmEnviro;
use crate::error::EngineError;
use crate::host::{ScriptSource, Services};
use crate::segment::{Segment, SegmentState};
use crate::sequence::{RunType, SequenceTable, TtmSeq};
use crate::ttm::{FrameSignals, TtmInterpreter};

/// A loaded scene script with everything it drives.
#[derive(Debug, Clone)]
pub struct SceneScript {
    pub(crate) filename: String,
    pub(crate) script: AdsScript,
    pub(crate) cursor: ScriptCursor,
    pub(crate) envs: Vec<TtmEnviro>,
    pub(crate) seqs: SequenceTable,
    pub(crate) segments: Vec<Segment>,
    pub(crate) frame_signals: FrameSignals,
    /// Goto/purge requests from the host, applied to the next sequence
    /// whose frame renders.
    pub(crate) host_signals: FrameSignals,
}

impl SceneScript {
    /// Fetch `filename` and every TTM it references from `source`, then
    /// build the sequence arena and segment table.
    pub fn load(
        filename: &str,
        source: &dyn ScriptSource,
        variant: GameVariant,
    ) -> Result<Self, EngineError> {
        let resource = source
            .load_ads(filename)
            .map_err(|source| EngineError::ScriptUnavailable {
                name: filename.to_string(),
                source,
            })?;
        let script = AdsScript::parse(resource.bytes(), OpcodeTable::ads(variant)).map_err(
            |source| EngineError::Script {
                name: filename.to_string(),
                source,
            },
        )?;

        let mut envs = Vec::with_capacity(resource.scripts.len());
        let mut seqs = SequenceTable::default();
        for reference in &resource.scripts {
            let ttm = source
                .load_ttm(&reference.name)
                .map_err(|source| EngineError::ScriptUnavailable {
                    name: reference.name.clone(),
                    source,
                })?;
            let parsed = TtmScript::parse(ttm.bytes(), ttm.frames, OpcodeTable::ttm(variant))
                .and_then(|ttm| ttm.sequence_markers().map(|markers| (ttm, markers)));
            let (ttm_script, markers) = parsed.map_err(|source| EngineError::Script {
                name: reference.name.clone(),
                source,
            })?;
            for marker in markers {
                seqs.push(TtmSeq::new(
                    reference.id as i16,
                    marker.seq_num,
                    marker.start_frame as i16,
                ));
            }
            debug!(
                "{filename}: env {} = {} ({} frames)",
                reference.id,
                reference.name,
                ttm_script.total_frames()
            );
            envs.push(TtmEnviro::new(reference.id, reference.name.clone(), ttm_script));
        }

        let segments = script
            .segments()
            .iter()
            .map(|info| {
                let used = info
                    .sequence_refs
                    .iter()
                    .filter_map(|&(env, seq)| {
                        let handle = seqs.find(env, seq);
                        if handle.is_none() {
                            warn!(
                                "{filename}: segment {} references unknown env {env} seq {seq}",
                                info.number
                            );
                        }
                        handle
                    })
                    .collect();
                Segment::new(info.number, info.offset, used)
            })
            .collect();

        let cursor = script.cursor();
        Ok(SceneScript {
            filename: filename.to_string(),
            script,
            cursor,
            envs,
            seqs,
            segments,
            frame_signals: FrameSignals::default(),
            host_signals: FrameSignals::default(),
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn sequences(&self) -> &SequenceTable {
        &self.seqs
    }

    pub fn enviros(&self) -> &[TtmEnviro] {
        &self.envs
    }

    /// Position of segment `number` in the segment table.
    pub fn index_of_segment(&self, number: i16) -> Option<usize> {
        self.script.segment_index(number)
    }

    pub fn segment(&self, number: i16) -> Option<&Segment> {
        self.index_of_segment(number)
            .and_then(|index| self.segments.get(index))
    }

    pub fn sequence(&self, enviro: i16, seq_num: i16) -> Option<&TtmSeq> {
        self.seqs.find(enviro, seq_num).and_then(|h| self.seqs.get(h))
    }

    /// Whether segment `number` is starting, or still has a sequence
    /// playing that is not just looping on a single frame.
    pub fn state_for_segment(&self, number: i16) -> bool {
        let Some(segment) = self.segment(number) else {
            return false;
        };
        if segment.state.bits() & SegmentState::START.bits() != 0 {
            return true;
        }
        segment.used_seqs.iter().any(|&handle| {
            self.seqs
                .get(handle)
                .is_some_and(|seq| seq.run_type != RunType::Stopped && !seq.self_loop)
        })
    }

    /// OR `value` into the segment's state, keeping the fixed flag.
    pub fn segment_or_state(&mut self, number: i16, value: u16) {
        if let Some(index) = self.index_of_segment(number) {
            let segment = &mut self.segments[index];
            segment.while_resume = None;
            segment.state = segment.state.keep_fixed(SegmentState(value));
        }
    }

    /// Overwrite the segment's state unless it has never run.
    pub fn segment_set_state(&mut self, number: i16, value: u16) {
        if let Some(index) = self.index_of_segment(number) {
            let segment = &mut self.segments[index];
            segment.while_resume = None;
            if segment.state != SegmentState::FIXED {
                segment.state = SegmentState(value);
            }
        }
    }

    /// Host-driven activation: start and restart are OR-ed in, anything
    /// else overwrites.
    pub fn set_segment_activation(&mut self, number: i16, value: u16) {
        let state = SegmentState(value);
        if state == SegmentState::START || state == SegmentState::RESTART {
            self.segment_or_state(number, value);
        } else {
            self.segment_set_state(number, value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

enum SkipStop {
    Else,
    EndIf,
    End,
}

/// One tick's worth of scene execution over a borrowed script.
pub(crate) struct SceneRunner<'a> {
    scene: &'a mut SceneScript,
    ttm: &'a mut TtmInterpreter,
    services: &'a mut Services,
    table: OpcodeTable,
    hit_branch: bool,
    running_segment: usize,
}

impl<'a> SceneRunner<'a> {
    pub(crate) fn new(
        scene: &'a mut SceneScript,
        ttm: &'a mut TtmInterpreter,
        services: &'a mut Services,
    ) -> Self {
        let table = scene.script.table();
        SceneRunner {
            scene,
            ttm,
            services,
            table,
            hit_branch: false,
            running_segment: 0,
        }
    }

    /// Run every segment, then give each active sequence its frame.
    /// Returns `false` when the script has no sequences to drive.
    pub(crate) fn run_tick(&mut self) -> Result<bool, EngineError> {
        if self.scene.seqs.is_empty() {
            return Ok(false);
        }

        self.apply_pending_activations();
        for index in 0..self.scene.segments.len() {
            self.run_segment(index)?;
        }
        self.advance_sequences()?;
        Ok(true)
    }

    /// Segments about to (re)start reset or stop the sequences they use.
    fn apply_pending_activations(&mut self) {
        let SceneScript { segments, seqs, .. } = &mut *self.scene;
        for segment in segments.iter() {
            let pending = segment.state.without_fixed();
            if pending != SegmentState::RESTART && pending != SegmentState::START {
                continue;
            }
            for &handle in &segment.used_seqs {
                if let Some(seq) = seqs.get_mut(handle) {
                    if pending == SegmentState::RESTART {
                        seq.reset();
                    } else {
                        seq.run_type = RunType::Stopped;
                    }
                }
            }
        }
    }

    fn run_segment(&mut self, index: usize) -> Result<(), EngineError> {
        self.running_segment = index;
        self.hit_branch = false;

        let start = self.scene.segments[index].body_offset();
        self.scene.cursor.seek(start)?;
        let mut state = self.scene.segments[index].state;
        if state.is_fixed() {
            state = state.without_fixed();
            self.scene.segments[index].state = state;
        } else {
            self.find_end_or_init_op(start)?;
        }

        let segment = &mut self.scene.segments[index];
        let offset = segment.while_resume.unwrap_or(self.scene.cursor.position());
        if state == SegmentState::RESTART || state == SegmentState::START {
            state = SegmentState::RUNNING;
            segment.state = state;
        }
        if state != SegmentState::RUNNING {
            return Ok(());
        }

        trace!(
            "{}: segment {} runs from offset {offset}",
            self.scene.filename,
            segment.number
        );
        self.scene.cursor.seek(offset)?;
        self.run_until_branch_or_end()?;
        Ok(())
    }

    /// Move past the segment's INIT END, or back to `start` when the
    /// segment has none.
    fn find_end_or_init_op(&mut self, start: usize) -> Result<(), EngineError> {
        let cursor = &mut self.scene.cursor;
        while cursor.remaining() {
            let opcode = cursor.read_opcode()?;
            match opcode {
                ads_ops::INIT_END => return Ok(()),
                ads_ops::END_SEGMENT => break,
                _ => self.table.skip_operands(cursor, opcode)?,
            }
        }
        cursor.seek(start)?;
        Ok(())
    }

    fn run_until_branch_or_end(&mut self) -> Result<Flow, EngineError> {
        if !self.scene.cursor.remaining() {
            return Ok(Flow::Halt);
        }

        let flow = loop {
            let opcode = self.scene.cursor.read_opcode()?;
            if opcode == ads_ops::END_SEGMENT {
                return Ok(Flow::Halt);
            }
            let flow = self.handle_operation(opcode)?;
            if self.hit_branch || flow == Flow::Halt || !self.scene.cursor.remaining() {
                break flow;
            }
        };
        self.hit_branch = false;
        Ok(flow)
    }

    fn handle_operation(&mut self, opcode: u16) -> Result<Flow, EngineError> {
        trace!(
            "{}: 0x{opcode:04x} {} at {}",
            self.scene.filename,
            self.table.name(opcode),
            self.scene.cursor.position() - 2
        );
        match opcode {
            ads_ops::INIT | ads_ops::INIT_END => Ok(Flow::Continue),
            op if ads_ops::is_condition(op) && self.table.is_known(op) => self.handle_logic_op(op),
            ads_ops::ELSE => {
                self.skip_to_else_or_end_if(false)?;
                self.hit_branch = true;
                Ok(Flow::Continue)
            }
            ads_ops::END_IF => {
                self.hit_branch = true;
                Ok(Flow::Continue)
            }
            ads_ops::END_WHILE => {
                self.hit_branch = true;
                Ok(Flow::Halt)
            }
            ads_ops::AND | ads_ops::OR => {
                warn!(
                    "{}: stray AND/OR at {}",
                    self.scene.filename,
                    self.scene.cursor.position() - 2
                );
                Ok(Flow::Continue)
            }
            ads_ops::ADD_SEQ | ads_ops::ADD_SEQ_NO_REWIND => {
                let (env, seq_num) = self.read_pair()?;
                let run_count = self.scene.cursor.read_i16()?;
                let _proportion = self.scene.cursor.read_i16()?;
                let now = self.services.clock.this_frame_ms();
                if let Some(seq) = self.lookup_seq_mut(opcode, env, seq_num) {
                    if opcode == ads_ops::ADD_SEQ {
                        seq.current_frame = seq.start_frame;
                    }
                    if run_count == 0 {
                        seq.run_type = RunType::Running;
                    } else if run_count < 0 {
                        let ticks = run_count.unsigned_abs() as u32;
                        seq.time_cut = now.wrapping_add(ticks * MS_PER_FRAME);
                        seq.run_type = RunType::TimeLimited;
                    } else {
                        seq.run_count = run_count - 1;
                        seq.run_type = RunType::Multi;
                    }
                    seq.run_played = seq.run_played.wrapping_add(1);
                }
                Ok(Flow::Continue)
            }
            ads_ops::STOP_SEQ | ads_ops::PAUSE_SEQ | ads_ops::RESET_SEQ => {
                let (env, seq_num) = self.read_pair()?;
                let _unused = self.scene.cursor.read_i16()?;
                if let Some(seq) = self.lookup_seq_mut(opcode, env, seq_num) {
                    match opcode {
                        ads_ops::STOP_SEQ => seq.run_type = RunType::Stopped,
                        ads_ops::PAUSE_SEQ => seq.run_type = RunType::Paused,
                        _ => seq.reset(),
                    }
                }
                Ok(Flow::Continue)
            }
            ads_ops::RANDOM_START => self.handle_random_op(),
            ads_ops::RANDOM_NOOP => {
                self.scene.cursor.read_i16()?;
                Ok(Flow::Continue)
            }
            ads_ops::RANDOM_END => Err(EngineError::StrayRandomEnd {
                offset: self.scene.cursor.position() - 2,
            }),
            ads_ops::MOVE_SEQ_TO_BACK | ads_ops::MOVE_SEQ_TO_FRONT => {
                let (env, seq_num) = self.read_pair()?;
                let _unused = self.scene.cursor.read_i16()?;
                let Some(handle) = self.scene.seqs.find(env, seq_num) else {
                    warn!(
                        "{}: 0x{opcode:04x} on unknown env {env} seq {seq_num}",
                        self.scene.filename
                    );
                    return Ok(Flow::Continue);
                };
                let run_type = self.scene.seqs.get(handle).map(|seq| seq.run_type);
                // Only Stopped is excluded; the duplicated test is intentional.
                #[allow(clippy::eq_op)]
                let skip = run_type == Some(RunType::Stopped) || run_type == Some(RunType::Stopped);
                if !skip {
                    if opcode == ads_ops::MOVE_SEQ_TO_BACK {
                        self.scene.seqs.move_to_back(handle);
                    } else {
                        self.scene.seqs.move_to_front(handle);
                    }
                }
                Ok(Flow::Continue)
            }
            ads_ops::FINISH_CURRENT => {
                self.scene.segments[self.running_segment].state = SegmentState::FINISHED;
                Ok(Flow::Halt)
            }
            ads_ops::FINISH_SEGMENT => {
                let number = self.scene.cursor.read_i16()?;
                let index = if number >= 0 {
                    self.scene.index_of_segment(number)
                } else {
                    Some(self.running_segment)
                };
                let Some(index) = index else {
                    warn!("{}: finish of unknown segment {number}", self.scene.filename);
                    return Ok(Flow::Continue);
                };
                self.scene.segments[index].state = SegmentState::FINISHED;
                if index == self.running_segment {
                    Ok(Flow::Halt)
                } else {
                    Ok(Flow::Continue)
                }
            }
            ads_ops::START_SEGMENT | ads_ops::RESTART_SEGMENT => {
                let number = self.scene.cursor.read_i16()?;
                let value = if opcode == ads_ops::START_SEGMENT {
                    SegmentState::START
                } else {
                    SegmentState::RESTART
                };
                if self.scene.index_of_segment(number).is_some() {
                    self.scene.segment_or_state(number, value.bits());
                } else {
                    warn!("{}: activation of unknown segment {number}", self.scene.filename);
                }
                Ok(Flow::Continue)
            }
            _ => {
                warn!(
                    "{}: unimplemented ADS opcode 0x{opcode:04x} at {}",
                    self.scene.filename,
                    self.scene.cursor.position() - 2
                );
                self.table.skip_operands(&mut self.scene.cursor, opcode)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn read_pair(&mut self) -> Result<(i16, i16), EngineError> {
        let env = self.scene.cursor.read_i16()?;
        let seq = self.scene.cursor.read_i16()?;
        Ok((env, seq))
    }

    fn lookup_seq_mut(&mut self, opcode: u16, env: i16, seq_num: i16) -> Option<&mut TtmSeq> {
        let known_env = self.scene.envs.iter().any(|e| e.id as i16 == env);
        let handle = self.scene.seqs.find(env, seq_num).filter(|_| known_env);
        if handle.is_none() {
            warn!(
                "{}: 0x{opcode:04x} on unknown env {env} seq {seq_num}",
                self.scene.filename
            );
        }
        handle.and_then(|handle| self.scene.seqs.get_mut(handle))
    }

    /// Evaluate an IF/WHILE condition chain and run or skip its body.
    fn handle_logic_op(&mut self, first: u16) -> Result<Flow, EngineError> {
        let start = self.scene.cursor.position() - 2;
        let is_while = ads_ops::is_while(first);
        let mut result = true;
        let mut connective = ads_ops::AND;
        let mut opcode = first;

        loop {
            let value = self.condition_result(opcode)?;
            if connective == ads_ops::AND {
                result &= value;
            } else {
                result |= value;
            }

            match self.scene.cursor.peek_u16() {
                Some(next @ (ads_ops::AND | ads_ops::OR)) => {
                    self.scene.cursor.read_opcode()?;
                    connective = next;
                    opcode = self.scene.cursor.read_opcode()?;
                    if !ads_ops::is_condition(opcode) {
                        return Err(EngineError::ExpectedCondition {
                            opcode,
                            offset: self.scene.cursor.position() - 2,
                        });
                    }
                }
                _ => break,
            }
        }

        if result {
            if is_while {
                let segment = &mut self.scene.segments[self.running_segment];
                segment.countdown = segment.countdown.wrapping_add(1);
                segment.while_resume = Some(start);
                self.run_until_branch_or_end()?;
                return Ok(Flow::Halt);
            }
            return self.run_until_branch_or_end();
        }

        if is_while {
            let segment = &mut self.scene.segments[self.running_segment];
            segment.countdown = 0;
            segment.while_resume = None;
            self.skip_to_end_while()?;
            return Ok(Flow::Halt);
        }

        match self.skip_to_else_or_end_if(true)? {
            SkipStop::Else => self.run_until_branch_or_end(),
            SkipStop::EndIf => Ok(Flow::Continue),
            SkipStop::End => Ok(Flow::Halt),
        }
    }

    /// Read one condition's operands and evaluate it.
    fn condition_result(&mut self, opcode: u16) -> Result<bool, EngineError> {
        let offset = self.scene.cursor.position() - 2;
        match opcode {
            ads_ops::IF_DETAIL_LTE | ads_ops::IF_DETAIL_GTE => {
                let level = self.scene.cursor.read_i16()?;
                debug!("{}: detail level test {level}", self.scene.filename);
                return Ok(opcode == ads_ops::IF_DETAIL_GTE);
            }
            ads_ops::WHILE_UNKNOWN_1080 | ads_ops::WHILE_UNKNOWN_1090 => {
                self.scene.cursor.read_i16()?;
                warn!(
                    "{}: unknown condition 0x{opcode:04x} at {offset}, assuming true",
                    self.scene.filename
                );
                return Ok(true);
            }
            _ => {}
        }

        let (env, seq_num) = self.read_pair()?;
        let seq = self
            .scene
            .seqs
            .find(env, seq_num)
            .and_then(|handle| self.scene.seqs.get(handle))
            .ok_or(EngineError::MissingConditionSequence {
                opcode,
                offset,
                env,
                seq: seq_num,
            })?;

        let test = if ads_ops::is_while(opcode) {
            opcode + 0x0300
        } else {
            opcode
        };
        let value = match test {
            ads_ops::IF_PAUSED => seq.run_type == RunType::Paused,
            ads_ops::IF_NOT_PAUSED => seq.run_type != RunType::Paused,
            ads_ops::IF_NOT_PLAYED => seq.run_played == 0,
            ads_ops::IF_PLAYED => seq.run_played != 0,
            ads_ops::IF_FINISHED => seq.run_type == RunType::Finished,
            ads_ops::IF_NOT_RUNNING => seq.run_type == RunType::Stopped,
            _ => seq.run_type.is_running(),
        };
        trace!(
            "{}: 0x{opcode:04x} env {env} seq {seq_num} ({:?}) -> {value}",
            self.scene.filename,
            seq.run_type
        );
        Ok(value)
    }

    /// Skip the body of a false IF. Nested IFs are skipped whole,
    /// including their own ELSE branches.
    fn skip_to_else_or_end_if(&mut self, stop_at_else: bool) -> Result<SkipStop, EngineError> {
        while self.scene.cursor.remaining() {
            let opcode = self.scene.cursor.read_opcode()?;
            match opcode {
                ads_ops::ELSE if stop_at_else => return Ok(SkipStop::Else),
                ads_ops::ELSE => {}
                ads_ops::END_IF => return Ok(SkipStop::EndIf),
                ads_ops::END_SEGMENT => return Ok(SkipStop::End),
                op if ads_ops::is_if(op) => {
                    self.table.skip_operands(&mut self.scene.cursor, op)?;
                    self.skip_condition_chain()?;
                    if let SkipStop::End = self.skip_to_else_or_end_if(false)? {
                        return Ok(SkipStop::End);
                    }
                }
                op => self.table.skip_operands(&mut self.scene.cursor, op)?,
            }
        }
        Ok(SkipStop::End)
    }

    fn skip_condition_chain(&mut self) -> Result<(), EngineError> {
        while let Some(ads_ops::AND | ads_ops::OR) = self.scene.cursor.peek_u16() {
            self.scene.cursor.read_opcode()?;
            let opcode = self.scene.cursor.read_opcode()?;
            self.table.skip_operands(&mut self.scene.cursor, opcode)?;
        }
        Ok(())
    }

    fn skip_to_end_while(&mut self) -> Result<(), EngineError> {
        while self.scene.cursor.remaining() {
            let opcode = self.scene.cursor.read_opcode()?;
            match opcode {
                ads_ops::END_WHILE => return Ok(()),
                ads_ops::END_SEGMENT => {
                    self.scene.cursor.seek_relative(-2)?;
                    return Ok(());
                }
                op => self.table.skip_operands(&mut self.scene.cursor, op)?,
            }
        }
        Ok(())
    }

    /// Weight of a candidate in a RANDOM block: its last operand.
    fn proportion(&mut self, opcode: u16) -> Result<i32, EngineError> {
        let count = match self.table.arg_count(opcode) {
            ArgCount::Fixed(count) => count as usize,
            ArgCount::Variable => 0,
        };
        if count == 0 {
            warn!(
                "{}: RANDOM candidate 0x{opcode:04x} has no proportion operand",
                self.scene.filename
            );
            return Ok(0);
        }
        let value = self.scene.cursor.peek(|cursor| {
            cursor.skip_words(count - 1)?;
            cursor.read_i16()
        })?;
        Ok(value as i32)
    }

    /// Pick one opcode of a RANDOM block, weighted by proportion, run it
    /// and continue after RANDOM END.
    fn handle_random_op(&mut self) -> Result<Flow, EngineError> {
        let start = self.scene.cursor.position();
        let mut total = 0i32;
        while self.scene.cursor.remaining() {
            let opcode = self.scene.cursor.read_opcode()?;
            if opcode == ads_ops::RANDOM_END {
                break;
            }
            if opcode == ads_ops::END_SEGMENT {
                self.scene.cursor.seek_relative(-2)?;
                break;
            }
            total += self.proportion(opcode)?;
            self.table.skip_operands(&mut self.scene.cursor, opcode)?;
        }
        let end = self.scene.cursor.position();

        if total <= 0 {
            warn!("{}: RANDOM block at {start} has no weight", self.scene.filename);
            return Ok(Flow::Continue);
        }

        let mut remaining = self.services.random.random_number(total as u32 - 1) as i32 + 1;
        self.scene.cursor.seek(start)?;
        while self.scene.cursor.position() < end {
            let opcode = self.scene.cursor.read_opcode()?;
            if opcode == ads_ops::RANDOM_END || opcode == ads_ops::END_SEGMENT {
                break;
            }
            remaining -= self.proportion(opcode)?;
            if remaining < 1 {
                if opcode != ads_ops::RANDOM_NOOP {
                    self.handle_operation(opcode)?;
                }
                break;
            }
            self.table.skip_operands(&mut self.scene.cursor, opcode)?;
        }

        self.scene.cursor.seek(end)?;
        Ok(Flow::Continue)
    }

    /// Give every active sequence its frame for this tick, in draw order.
    fn advance_sequences(&mut self) -> Result<(), EngineError> {
        let now = self.services.clock.this_frame_ms();
        let order = self.scene.seqs.order().to_vec();
        for handle in order {
            let scene = &mut *self.scene;
            let Some(seq) = scene.seqs.get_mut(handle) else {
                continue;
            };
            seq.last_frame = None;
            let run_type = seq.run_type;
            if !run_type.is_active() {
                if run_type == RunType::Finished {
                    seq.run_type = RunType::Stopped;
                }
                continue;
            }

            scene.frame_signals = FrameSignals::default();
            let rendered = match scene.envs.iter_mut().find(|env| env.id as i16 == seq.enviro) {
                Some(env) => self
                    .ttm
                    .run_frame(env, seq, &mut scene.frame_signals, self.services)?,
                None => {
                    warn!("{}: sequence {} has no env {}", scene.filename, seq.seq_num, seq.enviro);
                    false
                }
            };
            let mut signals = scene.frame_signals;

            if rendered {
                let host = std::mem::take(&mut scene.host_signals);
                if host.goto_target.is_some() {
                    signals.goto_target = host.goto_target;
                }
                signals.hit_purge |= host.hit_purge;

                seq.executed = true;
                seq.last_frame = Some(seq.current_frame);
                if let Some(delay) = signals.script_delay {
                    if delay != seq.time_interval {
                        seq.time_next = now.wrapping_add(delay);
                        seq.time_interval = delay;
                    }
                }
            }

            if rendered && !signals.hit_purge {
                if let Some(target) = signals.goto_target {
                    seq.goto_frame = Some(target);
                    if seq.current_frame == target {
                        seq.self_loop = true;
                    }
                }
                if seq.run_type != RunType::Paused {
                    seq.update_time_and_frame(now);
                }
            } else {
                // purged, or ran past its last frame: replay or finish
                seq.goto_frame = Some(seq.start_frame);
                if seq.run_type == RunType::Multi && seq.run_count != 0 {
                    if seq.update_time_and_frame(now) {
                        seq.run_count -= 1;
                    }
                } else if seq.run_type == RunType::TimeLimited && seq.time_cut != 0 {
                    seq.update_time_and_frame(now);
                } else if seq.update_time_and_frame(now) {
                    seq.run_type = RunType::Finished;
                    seq.time_interval = 0;
                }
            }

            if run_type == RunType::TimeLimited && now > seq.time_cut {
                seq.run_type = RunType::Finished;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualClock;
    use crate::sequence::SeqHandle;
    use dgds_formats::{AdsResource, ScriptBundle, ScriptWriter, TtmReference, TtmResource};

    fn bundle(ads: Vec<u16>, ttm: Vec<u16>) -> ScriptBundle {
        let mut bundle = ScriptBundle::default();
        bundle.ads.insert(
            "TEST.ADS".to_string(),
            AdsResource {
                scripts: vec![TtmReference {
                    id: 1,
                    name: "TEST.TTM".to_string(),
                }],
                words: ads,
            },
        );
        bundle.ttm.insert(
            "TEST.TTM".to_string(),
            TtmResource {
                frames: None,
                words: ttm,
            },
        );
        bundle
    }

    /// Two one-frame sequences: seq 1 loops, seq 2 purges.
    fn two_sequences() -> Vec<u16> {
        ScriptWriter::new()
            .op(0x1111, &[1])
            .op(0x1201, &[1])
            .op(0x0FF0, &[])
            .op(0x1111, &[2])
            .op(0x0110, &[])
            .op(0x0FF0, &[])
            .words()
    }

    fn tick(scene: &mut SceneScript, services: &mut Services) -> bool {
        let mut ttm = TtmInterpreter::new(OpcodeTable::ttm(GameVariant::Dragon), 8);
        SceneRunner::new(scene, &mut ttm, services).run_tick().unwrap()
    }

    #[test]
    fn load_builds_sequences_and_segment_usage() {
        let ads = ScriptWriter::new()
            .word(1)
            .op(0x2000, &[1, 2, 0, 0])
            .op(0x2010, &[1, 9, 0])
            .op(0xFFFF, &[])
            .words();
        let bundle = bundle(ads, two_sequences());
        let scene = SceneScript::load("test.ads", &bundle, GameVariant::Dragon).unwrap();

        assert_eq!(scene.sequences().len(), 2);
        let seq = scene.sequence(1, 2).unwrap();
        assert_eq!(seq.start_frame, 1);
        assert_eq!(scene.segments().len(), 1);
        assert_eq!(scene.segments()[0].used_seqs, vec![SeqHandle(1)]);
        assert_eq!(scene.segments()[0].state, SegmentState::FIXED);
    }

    #[test]
    fn add_seq_sets_run_types() {
        let ads = ScriptWriter::new()
            .word(1)
            .op(0x2000, &[1, 1, 3, 0])
            .op(0x2000, &[1, 2, -2, 0])
            .op(0xF000, &[])
            .op(0xFFFF, &[])
            .words();
        let bundle = bundle(ads, two_sequences());
        let mut scene = SceneScript::load("TEST.ADS", &bundle, GameVariant::Dragon).unwrap();
        let clock = ManualClock::new(1000);
        let mut services = Services::headless(1).with_clock(clock.clone());
        scene.segment_or_state(1, SegmentState::START.bits());

        assert!(tick(&mut scene, &mut services));
        let multi = scene.sequence(1, 1).unwrap();
        assert_eq!(multi.run_type, RunType::Multi);
        assert_eq!(multi.run_count, 2);
        assert_eq!(multi.run_played, 1);
        assert!(multi.self_loop);

        // purge with a time limit keeps the sequence alive until the cut
        let limited = scene.sequence(1, 2).unwrap();
        assert_eq!(limited.run_type, RunType::TimeLimited);
        assert_eq!(limited.time_cut, 1000 + 2 * MS_PER_FRAME);
        assert_eq!(scene.segments()[0].state, SegmentState::FINISHED);

        clock.advance(200);
        tick(&mut scene, &mut services);
        assert_eq!(scene.sequence(1, 2).unwrap().run_type, RunType::Finished);
    }

    #[test]
    fn purge_finishes_running_sequence() {
        let ads = ScriptWriter::new()
            .word(1)
            .op(0x2000, &[1, 2, 0, 0])
            .op(0xF000, &[])
            .op(0xFFFF, &[])
            .words();
        let bundle = bundle(ads, two_sequences());
        let mut scene = SceneScript::load("TEST.ADS", &bundle, GameVariant::Dragon).unwrap();
        let mut services = Services::headless(1);
        scene.segment_or_state(1, SegmentState::START.bits());

        tick(&mut scene, &mut services);
        let seq = scene.sequence(1, 2).unwrap();
        assert_eq!(seq.run_type, RunType::Finished);
        assert_eq!(seq.last_frame, Some(1));
        assert_eq!(seq.current_frame, 1);

        tick(&mut scene, &mut services);
        assert_eq!(scene.sequence(1, 2).unwrap().run_type, RunType::Stopped);
    }

    #[test]
    fn segment_state_updates_respect_fixed_flag() {
        let ads = ScriptWriter::new()
            .word(4)
            .op(0xFFFF, &[])
            .words();
        let bundle = bundle(ads, two_sequences());
        let mut scene = SceneScript::load("TEST.ADS", &bundle, GameVariant::Dragon).unwrap();

        scene.segment_set_state(4, SegmentState::STOPPED.bits());
        assert_eq!(scene.segment(4).unwrap().state, SegmentState::FIXED);
        scene.set_segment_activation(4, SegmentState::START.bits());
        assert_eq!(scene.segment(4).unwrap().state.bits(), 12);
        assert!(scene.state_for_segment(4));
        scene.set_segment_activation(4, SegmentState::FINISHED.bits());
        assert_eq!(scene.segment(4).unwrap().state, SegmentState::FINISHED);
        assert!(!scene.state_for_segment(4));
        assert!(!scene.state_for_segment(99));
    }

    #[test]
    fn missing_condition_sequence_is_fatal() {
        let ads = ScriptWriter::new()
            .word(1)
            .op(0x1370, &[1, 7])
            .op(0x1510, &[])
            .op(0xFFFF, &[])
            .words();
        let bundle = bundle(ads, two_sequences());
        let mut scene = SceneScript::load("TEST.ADS", &bundle, GameVariant::Dragon).unwrap();
        let mut services = Services::headless(1);
        scene.segment_or_state(1, SegmentState::START.bits());
        let mut ttm = TtmInterpreter::new(OpcodeTable::ttm(GameVariant::Dragon), 8);
        let err = SceneRunner::new(&mut scene, &mut ttm, &mut services)
            .run_tick()
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingConditionSequence { env: 1, seq: 7, .. }
        ));
    }

    #[test]
    fn detail_conditions_split_true_and_false() {
        let ads = ScriptWriter::new()
            .word(1)
            .op(0x1380, &[3])
            .op(0x2000, &[1, 1, 0, 0])
            .op(0x1510, &[])
            .op(0x1390, &[3])
            .op(0x2000, &[1, 2, 0, 0])
            .op(0x1510, &[])
            .op(0xFFFF, &[])
            .words();
        let bundle = bundle(ads, two_sequences());
        let mut scene = SceneScript::load("TEST.ADS", &bundle, GameVariant::HeartOfChina).unwrap();
        let mut services = Services::headless(1);
        scene.segment_or_state(1, SegmentState::START.bits());
        let mut ttm = TtmInterpreter::new(OpcodeTable::ttm(GameVariant::HeartOfChina), 8);
        SceneRunner::new(&mut scene, &mut ttm, &mut services)
            .run_tick()
            .unwrap();

        assert_eq!(scene.sequence(1, 1).unwrap().run_played, 0);
        assert_eq!(scene.sequence(1, 2).unwrap().run_played, 1);
    }

    #[test]
    fn counters_wrap_at_word_limit() {
        let ads = ScriptWriter::new()
            .word(1)
            .op(0x2000, &[1, 1, 0, 0])
            .op(0x1070, &[1, 1])
            .op(0x1520, &[])
            .op(0xFFFF, &[])
            .words();
        let bundle = bundle(ads, two_sequences());
        let mut scene = SceneScript::load("TEST.ADS", &bundle, GameVariant::Dragon).unwrap();
        let mut services = Services::headless(1);
        scene.segment_or_state(1, SegmentState::START.bits());
        let handle = scene.seqs.find(1, 1).unwrap();
        scene.seqs.get_mut(handle).unwrap().run_played = i16::MAX;
        scene.segments[0].countdown = i16::MAX;

        tick(&mut scene, &mut services);
        assert_eq!(scene.sequence(1, 1).unwrap().run_played, i16::MIN);
        assert_eq!(scene.segments()[0].countdown, i16::MIN);
    }

    #[test]
    fn move_to_front_ignores_stopped_sequences() {
        let ads = ScriptWriter::new()
            .word(1)
            .op(0x4010, &[1, 2, 0])
            .op(0x2000, &[1, 2, 0, 0])
            .op(0x4010, &[1, 2, 0])
            .op(0xF000, &[])
            .op(0xFFFF, &[])
            .words();
        let bundle = bundle(ads, two_sequences());
        let mut scene = SceneScript::load("TEST.ADS", &bundle, GameVariant::Dragon).unwrap();
        let mut services = Services::headless(1);
        scene.segment_or_state(1, SegmentState::START.bits());
        tick(&mut scene, &mut services);
        assert_eq!(scene.sequences().order(), &[SeqHandle(1), SeqHandle(0)]);
    }
}
