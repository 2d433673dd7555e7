use std::{cell::RefCell, rc::Rc};

use dgds_formats::Point;
use serde::{Deserialize, Serialize};

use crate::host::{
    BlitRequest, DrawContext, Fade, Rect, Renderer, ResourceHandle, SoundPlayer, Wipe,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderEvent {
    Pixel {
        at: Point,
        color: u8,
    },
    Line {
        from: Point,
        to: Point,
        color: u8,
    },
    FillRect {
        rect: Rect,
        color: u8,
        clip: Rect,
    },
    OutlineRect {
        rect: Rect,
        color: u8,
    },
    Circle {
        bounds: Rect,
        filled: bool,
    },
    Polygon {
        points: Vec<Point>,
        filled: bool,
    },
    Blit {
        request: BlitRequest,
        clip: Rect,
    },
    Text {
        text: String,
        bounds: Rect,
        font: Option<ResourceHandle>,
    },
    Wipe {
        style: Wipe,
        bounds: Rect,
    },
    Fade {
        fade: Fade,
    },
    Palette {
        palette: ResourceHandle,
    },
    Background {
        image: Option<ResourceHandle>,
    },
    StoreArea {
        area: Rect,
    },
    CaptureRegion {
        area: Rect,
        region: ResourceHandle,
    },
    PutRegion {
        region: ResourceHandle,
        at: Point,
    },
}

/// Renderer that keeps every call, for traces and tests.
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    events: Rc<RefCell<Vec<RenderEvent>>>,
    next_region: Rc<RefCell<u32>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.borrow().clone()
    }

    /// Hand back the events recorded so far and start a fresh log.
    pub fn drain(&self) -> Vec<RenderEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    fn push(&self, event: RenderEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl Renderer for RecordingRenderer {
    fn draw_pixel(&mut self, ctx: &DrawContext, at: Point) {
        self.push(RenderEvent::Pixel { at, color: ctx.fg });
    }

    fn draw_line(&mut self, ctx: &DrawContext, from: Point, to: Point) {
        self.push(RenderEvent::Line {
            from,
            to,
            color: ctx.fg,
        });
    }

    fn fill_rect(&mut self, ctx: &DrawContext, rect: Rect) {
        self.push(RenderEvent::FillRect {
            rect,
            color: ctx.fg,
            clip: ctx.clip,
        });
    }

    fn draw_rect(&mut self, ctx: &DrawContext, rect: Rect) {
        self.push(RenderEvent::OutlineRect {
            rect,
            color: ctx.fg,
        });
    }

    fn draw_circle(&mut self, _ctx: &DrawContext, bounds: Rect, filled: bool) {
        self.push(RenderEvent::Circle { bounds, filled });
    }

    fn draw_polygon(&mut self, _ctx: &DrawContext, points: &[Point], filled: bool) {
        self.push(RenderEvent::Polygon {
            points: points.to_vec(),
            filled,
        });
    }

    fn blit(&mut self, ctx: &DrawContext, request: &BlitRequest) {
        self.push(RenderEvent::Blit {
            request: *request,
            clip: ctx.clip,
        });
    }

    fn draw_string(
        &mut self,
        _ctx: &DrawContext,
        font: Option<ResourceHandle>,
        bounds: Rect,
        text: &str,
    ) {
        self.push(RenderEvent::Text {
            text: text.to_string(),
            bounds,
            font,
        });
    }

    fn wipe(&mut self, style: Wipe, bounds: Rect) {
        self.push(RenderEvent::Wipe { style, bounds });
    }

    fn fade(&mut self, fade: &Fade) {
        self.push(RenderEvent::Fade { fade: *fade });
    }

    fn select_palette(&mut self, palette: ResourceHandle) {
        self.push(RenderEvent::Palette { palette });
    }

    fn set_background(&mut self, image: Option<ResourceHandle>) {
        self.push(RenderEvent::Background { image });
    }

    fn store_area(&mut self, area: Rect) {
        self.push(RenderEvent::StoreArea { area });
    }

    fn capture_region(&mut self, area: Rect) -> Option<ResourceHandle> {
        let region = {
            let mut next = self.next_region.borrow_mut();
            *next += 1;
            ResourceHandle(0x8000_0000 | *next)
        };
        self.push(RenderEvent::CaptureRegion { area, region });
        Some(region)
    }

    fn put_region(&mut self, _ctx: &DrawContext, region: ResourceHandle, at: Point) {
        self.push(RenderEvent::PutRegion { region, at });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SoundEvent {
    SfxPlay { num: i16 },
    SfxStop { num: i16 },
    MusicPlay { music: ResourceHandle, song: i16 },
    MusicStop,
    SamplePlay { num: i16 },
    SampleStop { num: i16 },
}

#[derive(Clone, Default)]
pub struct RecordingSound {
    events: Rc<RefCell<Vec<SoundEvent>>>,
}

impl RecordingSound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SoundEvent> {
        self.events.borrow().clone()
    }
}

impl SoundPlayer for RecordingSound {
    fn play_sfx(&mut self, num: i16) {
        self.events.borrow_mut().push(SoundEvent::SfxPlay { num });
    }

    fn stop_sfx(&mut self, num: i16) {
        self.events.borrow_mut().push(SoundEvent::SfxStop { num });
    }

    fn play_music(&mut self, music: ResourceHandle, song: i16) {
        self.events
            .borrow_mut()
            .push(SoundEvent::MusicPlay { music, song });
    }

    fn stop_music(&mut self) {
        self.events.borrow_mut().push(SoundEvent::MusicStop);
    }

    fn play_sample(&mut self, num: i16) {
        self.events.borrow_mut().push(SoundEvent::SamplePlay { num });
    }

    fn stop_sample(&mut self, num: i16) {
        self.events.borrow_mut().push(SoundEvent::SampleStop { num });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sound_tracks_events() {
        let mut sound = RecordingSound::new();
        let observer = sound.clone();
        sound.play_sfx(3);
        sound.play_music(ResourceHandle(9), 2);
        sound.stop_music();
        sound.stop_sample(1);

        assert_eq!(
            observer.events(),
            vec![
                SoundEvent::SfxPlay { num: 3 },
                SoundEvent::MusicPlay {
                    music: ResourceHandle(9),
                    song: 2,
                },
                SoundEvent::MusicStop,
                SoundEvent::SampleStop { num: 1 },
            ]
        );
    }

    #[test]
    fn captured_regions_get_distinct_handles() {
        let mut renderer = RecordingRenderer::new();
        let first = renderer.capture_region(Rect::new(0, 0, 10, 10));
        let second = renderer.capture_region(Rect::new(10, 0, 20, 10));
        assert!(first.is_some());
        assert_ne!(first, second);
        assert_eq!(renderer.drain().len(), 2);
        assert!(renderer.events().is_empty());
    }

    #[test]
    fn render_events_serialize_with_kind_tag() {
        let event = RenderEvent::Pixel {
            at: Point::new(1, 2),
            color: 15,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "pixel");
        assert_eq!(json["at"]["x"], 1);
    }
}
