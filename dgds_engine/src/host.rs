//! Collaborator surface the interpreters talk to.
//!
//! Every trait method that only reports an effect has a no-op default so
//! hosts implement just the calls they care about, the same way the
//! audio and event observers are wired.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use dgds_formats::{AdsResource, Point, ScriptBundle, TtmResource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Opaque id for a resource owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHandle(pub u32);

/// Screen rectangle; `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

impl Rect {
    pub const SCREEN: Rect = Rect::new(0, 0, 640, 480);

    pub const fn new(left: i16, top: i16, right: i16, bottom: i16) -> Self {
        Rect {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_size(x: i16, y: i16, width: i16, height: i16) -> Self {
        Rect::new(x, y, x.wrapping_add(width), y.wrapping_add(height))
    }

    pub fn width(&self) -> i16 {
        self.right - self.left
    }

    pub fn height(&self) -> i16 {
        self.bottom - self.top
    }

    pub fn origin(&self) -> Point {
        Point::new(self.left, self.top)
    }

    pub fn offset(self, by: Point) -> Self {
        Rect::new(
            self.left.wrapping_add(by.x),
            self.top.wrapping_add(by.y),
            self.right.wrapping_add(by.x),
            self.bottom.wrapping_add(by.y),
        )
    }
}

impl Default for Rect {
    fn default() -> Self {
        Rect::SCREEN
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flip {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wipe {
    Dissolve,
    OutsideIn,
    InsideOut,
    Interlaced,
    LeftToRight,
    RightToLeft,
    TopToBottom,
    BottomToTop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeDirection {
    In,
    Out,
}

/// Palette fade request: `count` entries starting at `first_color`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fade {
    pub direction: FadeDirection,
    pub first_color: i16,
    pub count: i16,
    pub target_color: i16,
    pub speed: i16,
}

/// Drawing state of the sequence issuing a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawContext {
    pub clip: Rect,
    pub fg: u8,
    pub bg: u8,
    pub brush: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlitRequest {
    pub bitmap: ResourceHandle,
    pub frame: i16,
    pub at: Point,
    pub flip: Flip,
    /// Scaled destination size, when the operation carried one.
    pub size: Option<(i16, i16)>,
}

pub trait Renderer {
    fn draw_pixel(&mut self, _ctx: &DrawContext, _at: Point) {}
    fn draw_line(&mut self, _ctx: &DrawContext, _from: Point, _to: Point) {}
    fn fill_rect(&mut self, _ctx: &DrawContext, _rect: Rect) {}
    fn draw_rect(&mut self, _ctx: &DrawContext, _rect: Rect) {}
    fn draw_circle(&mut self, _ctx: &DrawContext, _bounds: Rect, _filled: bool) {}
    fn draw_polygon(&mut self, _ctx: &DrawContext, _points: &[Point], _filled: bool) {}
    fn blit(&mut self, _ctx: &DrawContext, _request: &BlitRequest) {}
    fn draw_string(
        &mut self,
        _ctx: &DrawContext,
        _font: Option<ResourceHandle>,
        _bounds: Rect,
        _text: &str,
    ) {
    }
    fn wipe(&mut self, _style: Wipe, _bounds: Rect) {}
    fn fade(&mut self, _fade: &Fade) {}
    fn select_palette(&mut self, _palette: ResourceHandle) {}
    /// `None` clears the background layer.
    fn set_background(&mut self, _image: Option<ResourceHandle>) {}
    /// Copy an area of the composed screen into the background layer.
    fn store_area(&mut self, _area: Rect) {}
    /// Copy an area of the screen aside; the handle is given back to
    /// `put_region` later.
    fn capture_region(&mut self, _area: Rect) -> Option<ResourceHandle> {
        None
    }
    fn put_region(&mut self, _ctx: &DrawContext, _region: ResourceHandle, _at: Point) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Screen,
    Bitmap,
    Font,
    Palette,
    Music,
    ScrollImage,
}

pub trait ResourceLoader {
    fn load(&mut self, kind: ResourceKind, name: &str) -> Result<ResourceHandle>;
}

pub trait SoundPlayer {
    fn play_sfx(&mut self, _num: i16) {}
    fn stop_sfx(&mut self, _num: i16) {}
    fn play_music(&mut self, _music: ResourceHandle, _song: i16) {}
    fn stop_music(&mut self) {}
    fn play_sample(&mut self, _num: i16) {}
    fn stop_sample(&mut self, _num: i16) {}
}

pub trait RandomSource {
    /// Uniform value in `0..=max`.
    fn random_number(&mut self, max: u32) -> u32;
}

pub trait Clock {
    /// Engine time, in milliseconds, of the frame being processed.
    fn this_frame_ms(&self) -> u32;
}

/// Supplies script bytecode by filename.
pub trait ScriptSource {
    fn load_ads(&self, name: &str) -> Result<AdsResource>;
    fn load_ttm(&self, name: &str) -> Result<TtmResource>;
}

impl ScriptSource for ScriptBundle {
    fn load_ads(&self, name: &str) -> Result<AdsResource> {
        self.find_ads(name)
            .cloned()
            .ok_or_else(|| anyhow!("no ADS script named {name} in bundle"))
    }

    fn load_ttm(&self, name: &str) -> Result<TtmResource> {
        self.find_ttm(name)
            .cloned()
            .ok_or_else(|| anyhow!("no TTM script named {name} in bundle"))
    }
}

#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {}

#[derive(Debug, Default)]
pub struct NullSound;

impl SoundPlayer for NullSound {}

/// Loader that hands out a stable handle per (kind, name) without
/// touching any data.
#[derive(Debug, Clone, Default)]
pub struct StubLoader {
    handles: Rc<RefCell<BTreeMap<(ResourceKind, String), ResourceHandle>>>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(&self) -> Vec<(ResourceKind, String)> {
        self.handles.borrow().keys().cloned().collect()
    }
}

impl ResourceLoader for StubLoader {
    fn load(&mut self, kind: ResourceKind, name: &str) -> Result<ResourceHandle> {
        let mut handles = self.handles.borrow_mut();
        let next = ResourceHandle(handles.len() as u32 + 1);
        Ok(*handles
            .entry((kind, name.to_ascii_lowercase()))
            .or_insert(next))
    }
}

pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        SeededRandom {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn random_number(&mut self, max: u32) -> u32 {
        self.rng.gen_range(0..=max)
    }
}

/// Clock advanced explicitly by the host; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u32>>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        ManualClock {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for ManualClock {
    fn this_frame_ms(&self) -> u32 {
        self.now.get()
    }
}

/// The collaborators one engine instance drives.
pub struct Services {
    pub renderer: Box<dyn Renderer>,
    pub loader: Box<dyn ResourceLoader>,
    pub sound: Box<dyn SoundPlayer>,
    pub random: Box<dyn RandomSource>,
    pub clock: Box<dyn Clock>,
}

impl Services {
    /// No output, stub resources, seeded randomness and a clock stuck at 0.
    pub fn headless(seed: u64) -> Self {
        Services {
            renderer: Box::new(NullRenderer),
            loader: Box::new(StubLoader::new()),
            sound: Box::new(NullSound),
            random: Box::new(SeededRandom::new(seed)),
            clock: Box::new(ManualClock::default()),
        }
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    pub fn with_loader(mut self, loader: impl ResourceLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_sound(mut self, sound: impl SoundPlayer + 'static) -> Self {
        self.sound = Box::new(sound);
        self
    }

    pub fn with_random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Box::new(random);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Services")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_loader_reuses_handles_per_name() {
        let mut loader = StubLoader::new();
        let first = loader.load(ResourceKind::Bitmap, "WALK.BMP").unwrap();
        let again = loader.load(ResourceKind::Bitmap, "walk.bmp").unwrap();
        let palette = loader.load(ResourceKind::Palette, "walk.bmp").unwrap();
        assert_eq!(first, again);
        assert_ne!(first, palette);
        assert_eq!(loader.loaded().len(), 2);
    }

    #[test]
    fn seeded_random_stays_in_range_and_repeats() {
        let mut a = SeededRandom::new(7);
        let mut b = SeededRandom::new(7);
        for _ in 0..32 {
            let value = a.random_number(3);
            assert!(value <= 3);
            assert_eq!(value, b.random_number(3));
        }
        assert_eq!(a.random_number(0), 0);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(100);
        let view = clock.clone();
        clock.advance(60);
        assert_eq!(view.this_frame_ms(), 160);
    }
}
