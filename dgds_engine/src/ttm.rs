//! Animation VM: executes one frame of a TTM sequence per call.

use dgds_formats::{ttm_ops, OpcodeTable, Operands, Point};
use log::{debug, trace, warn};

use crate::config::MS_PER_FRAME;
use crate::enviro::{
    checked_slot, GetPutRegion, TtmEnviro, GETPUT_SLOTS, PALETTE_SLOTS, SHAPE_SLOTS, STRING_SLOTS,
};
use crate::error::EngineError;
use crate::host::{
    BlitRequest, DrawContext, Fade, FadeDirection, Flip, Rect, ResourceKind, Services, Wipe,
};
use crate::sequence::TtmSeq;

/// Signals one frame run leaves for the scene scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSignals {
    /// Frame the sequence jumps to on its next advance.
    pub goto_target: Option<i16>,
    /// The frame asked for its sequence to be purged.
    pub hit_purge: bool,
    /// Frame delay in milliseconds requested this frame.
    pub script_delay: Option<u32>,
}

#[derive(Debug)]
pub struct TtmInterpreter {
    table: OpcodeTable,
    max_gosub_depth: usize,
    gosub_depth: usize,
    draw_offset: Point,
}

impl TtmInterpreter {
    pub fn new(table: OpcodeTable, max_gosub_depth: usize) -> Self {
        TtmInterpreter {
            table,
            max_gosub_depth,
            gosub_depth: 0,
            draw_offset: Point::default(),
        }
    }

    pub fn gosub_depth(&self) -> usize {
        self.gosub_depth
    }

    /// Execute `seq`'s current frame. Returns `false` without running
    /// anything when the frame has no bytecode.
    pub fn run_frame(
        &mut self,
        env: &mut TtmEnviro,
        seq: &mut TtmSeq,
        signals: &mut FrameSignals,
        services: &mut Services,
    ) -> Result<bool, EngineError> {
        let Some(offset) = env.script.frame_offset(seq.current_frame) else {
            debug!(
                "{}: seq {} frame {} has no bytecode",
                env.filename, seq.seq_num, seq.current_frame
            );
            return Ok(false);
        };
        env.cursor.seek(offset)?;
        if !env.cursor.remaining() {
            return Ok(false);
        }

        self.draw_offset = Point::default();
        self.run_until_frame_end(env, seq, signals, services)?;
        Ok(true)
    }

    fn run_until_frame_end(
        &mut self,
        env: &mut TtmEnviro,
        seq: &mut TtmSeq,
        signals: &mut FrameSignals,
        services: &mut Services,
    ) -> Result<(), EngineError> {
        while env.cursor.remaining() {
            let opcode = env.cursor.read_opcode()?;
            let operands = self.table.read_operands(&mut env.cursor, opcode)?;
            if opcode & 0xFFF0 == ttm_ops::FRAME_END {
                break;
            }
            self.handle_operation(env, seq, opcode, &operands, signals, services)?;
        }
        Ok(())
    }

    fn handle_operation(
        &mut self,
        env: &mut TtmEnviro,
        seq: &mut TtmSeq,
        opcode: u16,
        operands: &Operands,
        signals: &mut FrameSignals,
        services: &mut Services,
    ) -> Result<(), EngineError> {
        let op = opcode & 0xFFF0;
        if !self.table.is_known(opcode) {
            warn!(
                "{}: unimplemented TTM opcode 0x{opcode:04x} ({} args), skipping",
                env.filename,
                opcode & 0xF
            );
            return Ok(());
        }
        trace!("{}: 0x{opcode:04x} {} {:?}", env.filename, self.table.name(opcode), operands);

        let args = operands.words();
        let arg = |index: usize| args.get(index).copied().unwrap_or(0);
        let ctx = DrawContext {
            clip: seq.draw_win,
            fg: seq.fg,
            bg: seq.bg,
            brush: seq.brush,
        };
        let origin = self.draw_offset.offset(env.scroll_x, env.scroll_y);
        let at = |x: i16, y: i16| Point::new(x, y).offset(origin.x, origin.y);

        match op {
            ttm_ops::FINISH | ttm_ops::NOP | ttm_ops::SET_SCENE | ttm_ops::FRAME_LABEL
            | ttm_ops::SEQUENCE_MARKER => {}
            ttm_ops::CLEAR_BACKGROUND => {
                if !seq.executed {
                    services.renderer.set_background(None);
                }
            }
            ttm_ops::FREE_PALETTE => {
                if !seq.executed {
                    if let Some(slot) = checked_slot(seq.palette_id, PALETTE_SLOTS, "palette") {
                        env.palettes[slot] = None;
                    }
                    seq.palette_id = 0;
                }
            }
            ttm_ops::FREE_SHAPE => {
                if !seq.executed {
                    if let Some(slot) = checked_slot(seq.bitmap_id, SHAPE_SLOTS, "shape") {
                        env.shapes[slot] = None;
                    }
                }
            }
            ttm_ops::FREE_FONT => {
                if !seq.executed {
                    match usize::try_from(seq.font_id) {
                        Ok(index) if index < env.fonts.len() => {
                            env.fonts.remove(index);
                            seq.font_id = 0;
                        }
                        _ => warn!("{}: free of unknown font {}", env.filename, seq.font_id),
                    }
                }
            }
            ttm_ops::FREE_GETPUT => {
                if !seq.executed {
                    if let Some(slot) = checked_slot(seq.getput_id, GETPUT_SLOTS, "getput") {
                        env.get_puts[slot] = None;
                    }
                }
            }
            ttm_ops::PURGE => signals.hit_purge = true,
            ttm_ops::STOP_MUSIC => {
                if !seq.executed {
                    services.sound.stop_music();
                }
            }
            ttm_ops::SET_DELAY => {
                signals.script_delay = Some(arg(0).max(0) as u32 * MS_PER_FRAME);
            }
            ttm_ops::RANDOM_DELAY => {
                let (low, high) = (arg(0).min(arg(1)).max(0), arg(0).max(arg(1)).max(0));
                let ticks = low as u32 + services.random.random_number((high - low) as u32);
                signals.script_delay = Some(ticks * MS_PER_FRAME);
            }
            ttm_ops::SET_BRUSH => seq.brush = arg(0),
            ttm_ops::SELECT_BITMAP => seq.bitmap_id = arg(0),
            ttm_ops::SELECT_PALETTE => {
                seq.palette_id = arg(0);
                if !seq.executed {
                    if let Some(palette) = env.palette(arg(0)) {
                        services.renderer.select_palette(palette);
                    }
                }
            }
            ttm_ops::SELECT_FONT => seq.font_id = arg(0),
            ttm_ops::SELECT_SONG => seq.song_id = arg(0),
            ttm_ops::SELECT_GETPUT => seq.getput_id = arg(0),
            ttm_ops::GOTO => {
                let label = arg(0);
                signals.goto_target = env.script.find_goto_target(label).map(|frame| frame as i16);
                if signals.goto_target.is_none() {
                    warn!("{}: GOTO label {label} not found", env.filename);
                }
            }
            ttm_ops::PLAY_SFX => {
                if !seq.executed {
                    services.sound.play_sfx(arg(0));
                }
            }
            ttm_ops::STOP_SFX => {
                if !seq.executed {
                    services.sound.stop_sfx(arg(0));
                }
            }
            ttm_ops::SET_COLORS => {
                seq.fg = arg(0) as u8;
                seq.bg = arg(1) as u8;
            }
            ttm_ops::GOSUB => self.gosub(env, seq, arg(0), arg(1), arg(2), signals, services)?,
            ttm_ops::SCROLL => {
                env.scroll_x = env.scroll_x.wrapping_add(arg(0));
                env.scroll_y = env.scroll_y.wrapping_add(arg(1));
            }
            ttm_ops::CLIP_WINDOW => {
                seq.draw_win = Rect::new(
                    arg(0),
                    arg(1),
                    arg(2).wrapping_add(1),
                    arg(3).wrapping_add(1),
                );
            }
            ttm_ops::FADE_OUT | ttm_ops::FADE_IN => {
                let direction = if op == ttm_ops::FADE_IN {
                    FadeDirection::In
                } else {
                    FadeDirection::Out
                };
                services.renderer.fade(&Fade {
                    direction,
                    first_color: arg(0),
                    count: arg(1),
                    target_color: arg(2),
                    speed: arg(3),
                });
            }
            ttm_ops::STORE_AREA => {
                if !seq.executed {
                    let area = Rect::from_size(arg(0), arg(1), arg(2), arg(3)).offset(origin);
                    services.renderer.store_area(area);
                }
            }
            ttm_ops::CAPTURE_GETPUT => {
                if !seq.executed {
                    let area = Rect::from_size(arg(0), arg(1), arg(2), arg(3)).offset(origin);
                    let slot = checked_slot(seq.getput_id, GETPUT_SLOTS, "getput");
                    match (slot, services.renderer.capture_region(area)) {
                        (Some(slot), Some(region)) => {
                            env.get_puts[slot] = Some(GetPutRegion { area, region });
                        }
                        (Some(_), None) => {
                            warn!("{}: renderer declined to capture {area:?}", env.filename)
                        }
                        (None, _) => {}
                    }
                }
            }
            ttm_ops::DRAW_PIXEL => services.renderer.draw_pixel(&ctx, at(arg(0), arg(1))),
            ttm_ops::WIPE_DISSOLVE
            | ttm_ops::WIPE_OUTSIDE_IN
            | ttm_ops::WIPE_INSIDE_OUT
            | ttm_ops::WIPE_INTERLACED
            | ttm_ops::WIPE_LEFT_RIGHT
            | ttm_ops::WIPE_RIGHT_LEFT
            | ttm_ops::WIPE_TOP_BOTTOM
            | ttm_ops::WIPE_BOTTOM_TOP => {
                let style = match op {
                    ttm_ops::WIPE_DISSOLVE => Wipe::Dissolve,
                    ttm_ops::WIPE_OUTSIDE_IN => Wipe::OutsideIn,
                    ttm_ops::WIPE_INSIDE_OUT => Wipe::InsideOut,
                    ttm_ops::WIPE_INTERLACED => Wipe::Interlaced,
                    ttm_ops::WIPE_LEFT_RIGHT => Wipe::LeftToRight,
                    ttm_ops::WIPE_RIGHT_LEFT => Wipe::RightToLeft,
                    ttm_ops::WIPE_TOP_BOTTOM => Wipe::TopToBottom,
                    _ => Wipe::BottomToTop,
                };
                let bounds = Rect::from_size(arg(0), arg(1), arg(2), arg(3)).offset(origin);
                services.renderer.wipe(style, bounds);
            }
            ttm_ops::DRAW_LINE => {
                services
                    .renderer
                    .draw_line(&ctx, at(arg(0), arg(1)), at(arg(2), arg(3)));
            }
            ttm_ops::FILL_RECT => {
                let rect = Rect::from_size(arg(0), arg(1), arg(2), arg(3)).offset(origin);
                services.renderer.fill_rect(&ctx, rect);
            }
            ttm_ops::DRAW_RECT => {
                let rect = Rect::from_size(arg(0), arg(1), arg(2), arg(3)).offset(origin);
                services.renderer.draw_rect(&ctx, rect);
            }
            ttm_ops::DRAW_STRING_FIRST..=ttm_ops::DRAW_STRING_LAST => {
                let index = ((op - ttm_ops::DRAW_STRING_FIRST) >> 4) as usize;
                let bounds = Rect::from_size(arg(0), arg(1), arg(2), arg(3)).offset(origin);
                let text = env.strings[index].clone();
                services
                    .renderer
                    .draw_string(&ctx, env.font(seq.font_id), bounds, &text);
            }
            ttm_ops::FILL_CIRCLE | ttm_ops::DRAW_CIRCLE => {
                let bounds = Rect::from_size(arg(0), arg(1), arg(2), arg(3)).offset(origin);
                services
                    .renderer
                    .draw_circle(&ctx, bounds, op == ttm_ops::FILL_CIRCLE);
            }
            ttm_ops::DRAW_SPRITE
            | ttm_ops::DRAW_SPRITE_FLIP_V
            | ttm_ops::DRAW_SPRITE_FLIP_H
            | ttm_ops::DRAW_SPRITE_FLIP_HV => {
                let flip = match op {
                    ttm_ops::DRAW_SPRITE_FLIP_V => Flip::Vertical,
                    ttm_ops::DRAW_SPRITE_FLIP_H => Flip::Horizontal,
                    ttm_ops::DRAW_SPRITE_FLIP_HV => Flip::Both,
                    _ => Flip::None,
                };
                let slot = if args.len() >= 4 { arg(3) } else { seq.bitmap_id };
                let Some(bitmap) = env.shape(slot) else {
                    warn!("{}: sprite from empty shape slot {slot}", env.filename);
                    return Ok(());
                };
                let size = (args.len() >= 6).then(|| (arg(4), arg(5)));
                services.renderer.blit(
                    &ctx,
                    &BlitRequest {
                        bitmap,
                        frame: arg(2),
                        at: at(arg(0), arg(1)),
                        flip,
                        size,
                    },
                );
            }
            ttm_ops::PUT_GETPUT => match env.get_put(arg(2)) {
                Some(saved) => {
                    services
                        .renderer
                        .put_region(&ctx, saved.region, at(arg(0), arg(1)));
                }
                None => warn!("{}: put of empty getput slot {}", env.filename, arg(2)),
            },
            ttm_ops::DRAW_POLYGON | ttm_ops::FILL_POLYGON => {
                if let Operands::Points(points) = operands {
                    let points: Vec<Point> = points.iter().map(|p| at(p.x, p.y)).collect();
                    services
                        .renderer
                        .draw_polygon(&ctx, &points, op == ttm_ops::FILL_POLYGON);
                }
            }
            ttm_ops::PLAY_SAMPLE => services.sound.play_sample(arg(0)),
            ttm_ops::STOP_SAMPLE => services.sound.stop_sample(arg(0)),
            ttm_ops::LOAD_SCREEN
            | ttm_ops::LOAD_BITMAP
            | ttm_ops::LOAD_FONT
            | ttm_ops::LOAD_PALETTE
            | ttm_ops::LOAD_SONG
            | ttm_ops::LOAD_SCROLL_IMAGE => self.load_resource(env, seq, op, operands, services),
            ttm_ops::SET_STRING_FIRST..=ttm_ops::SET_STRING_LAST => {
                let index = ((op - ttm_ops::SET_STRING_FIRST) >> 4) as usize;
                if index < STRING_SLOTS {
                    env.strings[index] = text_operand(operands);
                }
            }
            _ => warn!(
                "{}: unimplemented TTM opcode 0x{opcode:04x} {}",
                env.filename,
                self.table.name(opcode)
            ),
        }
        Ok(())
    }

    fn load_resource(
        &mut self,
        env: &mut TtmEnviro,
        seq: &mut TtmSeq,
        op: u16,
        operands: &Operands,
        services: &mut Services,
    ) {
        let name = text_operand(operands);
        let kind = match op {
            ttm_ops::LOAD_SCREEN => ResourceKind::Screen,
            ttm_ops::LOAD_BITMAP => ResourceKind::Bitmap,
            ttm_ops::LOAD_FONT => ResourceKind::Font,
            ttm_ops::LOAD_PALETTE => ResourceKind::Palette,
            ttm_ops::LOAD_SONG => ResourceKind::Music,
            _ => ResourceKind::ScrollImage,
        };
        let handle = match services.loader.load(kind, &name) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("{}: failed to load {kind:?} {name}: {err:#}", env.filename);
                return;
            }
        };

        match kind {
            ResourceKind::Screen => services.renderer.set_background(Some(handle)),
            ResourceKind::Bitmap => {
                if let Some(slot) = checked_slot(seq.bitmap_id, SHAPE_SLOTS, "shape") {
                    env.shapes[slot] = Some(handle);
                }
            }
            ResourceKind::Font => {
                env.fonts.push(handle);
                seq.font_id = (env.fonts.len() - 1) as i16;
            }
            ResourceKind::Palette => {
                if let Some(slot) = checked_slot(seq.palette_id, PALETTE_SLOTS, "palette") {
                    env.palettes[slot] = Some(handle);
                }
            }
            ResourceKind::Music => services.sound.play_music(handle, seq.song_id),
            ResourceKind::ScrollImage => {
                env.scroll_image = Some(handle);
                env.scroll_x = 0;
                env.scroll_y = 0;
            }
        }
    }

    /// Run the frame labelled `label` in place with the draw origin moved
    /// by (x, y), then continue after the GOSUB.
    #[allow(clippy::too_many_arguments)]
    fn gosub(
        &mut self,
        env: &mut TtmEnviro,
        seq: &mut TtmSeq,
        x: i16,
        y: i16,
        label: i16,
        signals: &mut FrameSignals,
        services: &mut Services,
    ) -> Result<(), EngineError> {
        if self.gosub_depth >= self.max_gosub_depth {
            warn!(
                "{}: GOSUB to {label} exceeds depth {}, ignored",
                env.filename, self.max_gosub_depth
            );
            return Ok(());
        }
        let Some(offset) = env
            .script
            .find_goto_target(label)
            .and_then(|frame| env.script.frame_offset(frame as i16))
        else {
            warn!("{}: GOSUB label {label} not found", env.filename);
            return Ok(());
        };

        let return_to = env.cursor.position();
        let saved_offset = self.draw_offset;
        let saved_purge = signals.hit_purge;
        signals.hit_purge = false;
        self.draw_offset = saved_offset.offset(x, y);
        self.gosub_depth += 1;

        let result = env
            .cursor
            .seek(offset)
            .map_err(EngineError::from)
            .and_then(|()| self.run_until_frame_end(env, seq, signals, services));

        self.gosub_depth -= 1;
        self.draw_offset = saved_offset;
        signals.hit_purge |= saved_purge;
        result?;
        env.cursor.seek(return_to)?;
        Ok(())
    }
}

fn text_operand(operands: &Operands) -> String {
    match operands {
        Operands::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => String::new(),
    }
}
