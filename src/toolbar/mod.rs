//! Toolbar icon rendering and submission

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::platform::{IconPath, IconPayload, IconSink};
use crate::settings::StaticIconPaths;

/// Logical edge length of the glyph; all geometry is expressed in this space.
pub const ICON_SIZE: u32 = 38;

const BRAND_BLUE: [u8; 3] = [0x0b, 0x57, 0xd0];
const AMBER: [u8; 3] = [0xff, 0xbb, 0x00];
const GREEN: [u8; 3] = [0x00, 0xcc, 0x00];
const TRACK_ALPHA: u8 = 0x40;

/// Overall toolbar state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "progress", rename_all = "snake_case")]
pub enum IconState {
    Default,
    InProgress(f64),
    Finished,
}

impl IconState {
    pub fn color(&self) -> [u8; 3] {
        match self {
            IconState::Default => BRAND_BLUE,
            IconState::InProgress(_) => AMBER,
            IconState::Finished => GREEN,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IconState::Default => "default",
            IconState::InProgress(_) => "in-progress",
            IconState::Finished => "finished",
        }
    }
}

/// Render resolution relative to the logical glyph size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconScale {
    Half,
    Full,
}

impl IconScale {
    /// Low-DPI displays get a half-size buffer; high-DPI ones the full glyph.
    pub fn for_device_pixel_ratio(ratio: f64) -> Self {
        if ratio < 2.0 {
            IconScale::Half
        } else {
            IconScale::Full
        }
    }

    pub fn factor(self) -> f64 {
        match self {
            IconScale::Half => 0.5,
            IconScale::Full => 1.0,
        }
    }

    pub fn pixel_size(self) -> u32 {
        (ICON_SIZE as f64 * self.factor()).round() as u32
    }
}

/// Square RGBA image, row-major, straight (non-premultiplied) alpha
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub size: u32,
    pub rgba: Vec<u8>,
}

impl PixelBuffer {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size || y >= self.size {
            return None;
        }
        let idx = ((y * self.size + x) * 4) as usize;
        let mut out = [0; 4];
        out.copy_from_slice(&self.rgba[idx..idx + 4]);
        Some(out)
    }
}

struct Canvas {
    size: u32,
    scale: f64,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(scale: IconScale) -> Self {
        let size = scale.pixel_size();
        Self {
            size,
            scale: scale.factor(),
            pixels: vec![0; (size * size * 4) as usize],
        }
    }

    /// Source-over compositing of one device pixel
    fn blend_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        if x >= self.size || y >= self.size {
            return;
        }
        let idx = ((y * self.size + x) * 4) as usize;
        let src_a = color[3] as f64 / 255.0;
        let dst_a = self.pixels[idx + 3] as f64 / 255.0;
        let out_a = src_a + dst_a * (1.0 - src_a);
        if out_a <= 0.0 {
            return;
        }
        for channel in 0..3 {
            let src = color[channel] as f64;
            let dst = self.pixels[idx + channel] as f64;
            let value = (src * src_a + dst * dst_a * (1.0 - src_a)) / out_a;
            self.pixels[idx + channel] = value.round().clamp(0.0, 255.0) as u8;
        }
        self.pixels[idx + 3] = (out_a * 255.0).round() as u8;
    }

    /// Paint every device pixel whose centre falls inside the predicate, which
    /// receives logical coordinates.
    fn fill_where<F>(&mut self, color: [u8; 4], inside: F)
    where
        F: Fn(f64, f64) -> bool,
    {
        for y in 0..self.size {
            for x in 0..self.size {
                let lx = (x as f64 + 0.5) / self.scale;
                let ly = (y as f64 + 0.5) / self.scale;
                if inside(lx, ly) {
                    self.blend_pixel(x, y, color);
                }
            }
        }
    }

    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64, color: [u8; 4]) {
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        self.fill_where(color, |lx, ly| {
            lx >= x && lx < x + width && ly >= y && ly < y + height
        });
    }

    fn fill_triangle(&mut self, a: (f64, f64), b: (f64, f64), c: (f64, f64), color: [u8; 4]) {
        fn edge(p: (f64, f64), q: (f64, f64), x: f64, y: f64) -> f64 {
            (q.0 - p.0) * (y - p.1) - (q.1 - p.1) * (x - p.0)
        }
        self.fill_where(color, |lx, ly| {
            let e0 = edge(a, b, lx, ly);
            let e1 = edge(b, c, lx, ly);
            let e2 = edge(c, a, lx, ly);
            (e0 >= 0.0 && e1 >= 0.0 && e2 >= 0.0) || (e0 <= 0.0 && e1 <= 0.0 && e2 <= 0.0)
        });
    }

    fn into_buffer(self) -> PixelBuffer {
        PixelBuffer {
            size: self.size,
            rgba: self.pixels,
        }
    }
}

fn opaque(rgb: [u8; 3]) -> [u8; 4] {
    [rgb[0], rgb[1], rgb[2], 255]
}

/// Draw the glyph for a state. Pure and deterministic.
pub fn render(state: IconState, scale: IconScale) -> PixelBuffer {
    let mut canvas = Canvas::new(scale);
    let color = opaque(state.color());
    let full = ICON_SIZE as f64;

    match state {
        IconState::InProgress(progress) => {
            let progress = if progress.is_finite() {
                progress.clamp(0.0, 1.0)
            } else {
                0.0
            };
            // Compact arrow: 10-wide stem, head ending above the bar.
            canvas.fill_rect(14.0, 0.0, 10.0, 14.0, color);
            canvas.fill_triangle((6.0, 10.0), (32.0, 10.0), (19.0, 25.0), color);

            let [r, g, b] = state.color();
            canvas.fill_rect(0.0, 28.0, full, 10.0, [r, g, b, TRACK_ALPHA]);
            canvas.fill_rect(0.0, 28.0, progress * full, 10.0, color);
        }
        IconState::Default | IconState::Finished => {
            canvas.fill_rect(12.0, 2.0, 14.0, 16.0, color);
            canvas.fill_triangle((0.0, 18.0), (full, 18.0), (19.0, full), color);
        }
    }

    canvas.into_buffer()
}

/// How a submission ended up being displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Pixels,
    Fallback,
    Failed,
}

/// Renders states and pushes them to the platform's toolbar button
pub struct Toolbar<S: IconSink + ?Sized> {
    sink: Arc<S>,
    scale: IconScale,
    static_icons: StaticIconPaths,
}

impl<S: IconSink + ?Sized> Toolbar<S> {
    pub fn new(sink: Arc<S>, scale: IconScale, static_icons: StaticIconPaths) -> Self {
        Self {
            sink,
            scale,
            static_icons,
        }
    }

    pub fn static_path(&self, state: IconState) -> IconPath {
        match state {
            IconState::Default => IconPath::Sized(self.static_icons.default.clone()),
            IconState::InProgress(_) => IconPath::Single(self.static_icons.in_progress.clone()),
            IconState::Finished => IconPath::Single(self.static_icons.finished.clone()),
        }
    }

    /// Best effort: pixels first, then the static asset, then give up quietly.
    pub async fn show(&self, state: IconState) -> SubmitOutcome {
        let buffer = render(state, self.scale);
        let pixels = IconPayload::Pixels {
            size: buffer.size,
            buffer,
        };

        let err = match self.sink.set_icon(pixels).await {
            Ok(()) => return SubmitOutcome::Pixels,
            Err(err) => err,
        };
        tracing::debug!(
            "Pixel icon rejected ({}), using static {} asset",
            err,
            state.label()
        );

        match self
            .sink
            .set_icon(IconPayload::Static(self.static_path(state)))
            .await
        {
            Ok(()) => SubmitOutcome::Fallback,
            Err(err) => {
                tracing::warn!("Failed to set {} toolbar icon: {}", state.label(), err);
                SubmitOutcome::Failed
            }
        }
    }
}

/// Text rendering of a buffer for terminals: `#` opaque, `+` translucent.
pub fn ascii_art(buffer: &PixelBuffer) -> String {
    let mut out = String::with_capacity(((buffer.size + 1) * buffer.size) as usize);
    for y in 0..buffer.size {
        for x in 0..buffer.size {
            let alpha = buffer.pixel(x, y).map_or(0, |p| p[3]);
            out.push(match alpha {
                0 => '.',
                255 => '#',
                _ => '+',
            });
        }
        out.push('\n');
    }
    out
}
