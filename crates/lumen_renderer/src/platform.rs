//! # Platform Capability Surface
//!
//! Everything a display needs from the windowing system and GPU, behind
//! three traits: [`Platform`], [`EmbeddedCompositor`] and
//! [`SystemCompositorController`]. The dispatch core never sees a GPU type.
//!
//! The headless implementations render into CPU framebuffers filled with
//! the clear color. They back the soak binary and the tests.

use crate::config::RendererConfig;
use crate::error::{RendererError, RendererResult};
use bytemuck::{Pod, Zeroable};
use lumen_shared::{
    DisplayConfig, OffscreenBufferHandle, Rect, SystemCompositorOp, Vec4, WaylandIviLayerId,
    WaylandIviSurfaceId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// =============================================================================
// TRAITS
// =============================================================================

/// Window, context and render backend of one display.
pub trait Platform: Send {
    /// Makes the display's context current on the calling thread.
    fn enable_context(&mut self) -> bool;

    /// Allocates an offscreen buffer. Returns `false` if the backend refuses.
    fn create_offscreen_buffer(
        &mut self,
        buffer: OffscreenBufferHandle,
        width: u32,
        height: u32,
        sample_count: u32,
    ) -> bool;

    /// Releases an offscreen buffer. Returns `false` for unknown buffers.
    fn destroy_offscreen_buffer(&mut self, buffer: OffscreenBufferHandle) -> bool;

    /// Sets the clear color of the framebuffer (`None`) or an offscreen buffer.
    fn set_clear_color(&mut self, buffer: Option<OffscreenBufferHandle>, color: Vec4) -> bool;

    /// Renders one frame into every buffer.
    fn render_frame(&mut self);

    /// Presents the framebuffer.
    fn swap_buffers(&mut self);

    /// Reads RGBA8 pixels of a region, bottom row first.
    fn read_pixels(&mut self, buffer: Option<OffscreenBufferHandle>, region: Rect) -> Option<Vec<u8>>;

    /// Adapts to a window resized by its owner.
    fn resize_window(&mut self, width: u32, height: u32);

    /// Current framebuffer size.
    fn window_size(&self) -> (u32, u32);

    /// Embedded compositor of this display.
    fn embedded_compositor(&mut self) -> &mut dyn EmbeddedCompositor;

    /// System compositor controller, if the platform runs under one.
    fn system_compositor_controller(&mut self) -> Option<&mut dyn SystemCompositorController>;

    /// Whether a system compositor controller exists.
    fn has_system_compositor_controller(&self) -> bool;
}

/// Compositor for client surfaces streamed into scenes.
pub trait EmbeddedCompositor: Send {
    /// Services pending client connection requests without blocking.
    fn handle_requests_from_clients(&mut self);

    /// Surfaces currently provided by connected clients.
    fn connected_surfaces(&self) -> BTreeSet<WaylandIviSurfaceId>;

    /// Registers a client surface.
    fn attach_surface(&mut self, surface: WaylandIviSurfaceId);

    /// Drops a client surface.
    fn detach_surface(&mut self, surface: WaylandIviSurfaceId);
}

/// Controller of the platform system compositor (IVI shell).
pub trait SystemCompositorController: Send {
    /// Applies one operation. Returns `false` if the compositor rejects it.
    fn apply(&mut self, op: &SystemCompositorOp) -> bool;
}

/// Creates platforms for new displays.
pub trait PlatformFactory: Send + Sync {
    /// Creates the platform of one display.
    ///
    /// Called on the thread that will drive the display.
    fn create_platform(
        &self,
        renderer_config: &RendererConfig,
        display_config: &DisplayConfig,
    ) -> RendererResult<Box<dyn Platform>>;
}

// =============================================================================
// HEADLESS IMPLEMENTATION
// =============================================================================

/// One RGBA8 pixel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
struct Rgba8 {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

impl From<Vec4> for Rgba8 {
    fn from(color: Vec4) -> Self {
        let [r, g, b, a] = color.to_rgba8();
        Self { r, g, b, a }
    }
}

/// CPU framebuffer.
#[derive(Debug)]
struct Framebuffer {
    width: u32,
    height: u32,
    clear_color: Vec4,
    pixels: Vec<Rgba8>,
}

impl Framebuffer {
    fn new(width: u32, height: u32, clear_color: Vec4) -> Self {
        Self {
            width,
            height,
            clear_color,
            pixels: vec![Rgba8::default(); width as usize * height as usize],
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels = vec![Rgba8::default(); width as usize * height as usize];
    }

    fn clear(&mut self) {
        let color = Rgba8::from(self.clear_color);
        self.pixels.fill(color);
    }

    fn read(&self, region: Rect) -> Option<Vec<u8>> {
        if !region.fits_within(self.width, self.height) {
            return None;
        }
        let x = usize::try_from(region.x).ok()?;
        let y = usize::try_from(region.y).ok()?;
        let row_width = self.width as usize;
        let mut out = Vec::with_capacity(region.area() as usize * 4);
        for row in y..y + region.height as usize {
            let start = row * row_width + x;
            let pixels = &self.pixels[start..start + region.width as usize];
            out.extend_from_slice(bytemuck::cast_slice(pixels));
        }
        Some(out)
    }
}

/// Headless embedded compositor; surfaces are attached programmatically.
#[derive(Debug, Default)]
pub struct HeadlessEmbeddedCompositor {
    surfaces: BTreeSet<WaylandIviSurfaceId>,
}

impl EmbeddedCompositor for HeadlessEmbeddedCompositor {
    fn handle_requests_from_clients(&mut self) {
        // no sockets; surfaces are attached directly
    }

    fn connected_surfaces(&self) -> BTreeSet<WaylandIviSurfaceId> {
        self.surfaces.clone()
    }

    fn attach_surface(&mut self, surface: WaylandIviSurfaceId) {
        self.surfaces.insert(surface);
    }

    fn detach_surface(&mut self, surface: WaylandIviSurfaceId) {
        self.surfaces.remove(&surface);
    }
}

/// State of one IVI surface as seen by the headless system compositor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IviSurfaceState {
    /// Visible
    pub visible: bool,
    /// Opacity
    pub opacity: f32,
    /// Destination rectangle
    pub rectangle: Rect,
    /// Layer the surface is placed on
    pub layer: Option<WaylandIviLayerId>,
}

/// Headless system compositor recording the applied state.
#[derive(Debug, Default)]
pub struct HeadlessSystemCompositor {
    surfaces: BTreeMap<WaylandIviSurfaceId, IviSurfaceState>,
    layers: BTreeMap<WaylandIviLayerId, bool>,
    screenshots: Vec<String>,
}

impl HeadlessSystemCompositor {
    /// Recorded state of a surface.
    #[must_use]
    pub fn surface(&self, surface: WaylandIviSurfaceId) -> Option<IviSurfaceState> {
        self.surfaces.get(&surface).copied()
    }

    /// Recorded visibility of a layer.
    #[must_use]
    pub fn layer_visible(&self, layer: WaylandIviLayerId) -> Option<bool> {
        self.layers.get(&layer).copied()
    }

    /// Screenshot files requested so far.
    #[must_use]
    pub fn screenshots(&self) -> &[String] {
        &self.screenshots
    }
}

impl SystemCompositorController for HeadlessSystemCompositor {
    fn apply(&mut self, op: &SystemCompositorOp) -> bool {
        match op {
            SystemCompositorOp::SetIviSurfaceVisibility { surface, visible } => {
                self.surfaces.entry(*surface).or_default().visible = *visible;
            }
            SystemCompositorOp::SetIviSurfaceOpacity { surface, opacity } => {
                if !(0.0..=1.0).contains(opacity) {
                    return false;
                }
                self.surfaces.entry(*surface).or_default().opacity = *opacity;
            }
            SystemCompositorOp::SetIviSurfaceDestRectangle { surface, rectangle } => {
                self.surfaces.entry(*surface).or_default().rectangle = *rectangle;
            }
            SystemCompositorOp::SetIviLayerVisibility { layer, visible } => {
                self.layers.insert(*layer, *visible);
            }
            SystemCompositorOp::AddIviSurfaceToIviLayer { surface, layer } => {
                if !self.layers.contains_key(layer) {
                    return false;
                }
                self.surfaces.entry(*surface).or_default().layer = Some(*layer);
            }
            SystemCompositorOp::Screenshot { file_name, .. } => {
                if file_name.is_empty() {
                    return false;
                }
                self.screenshots.push(file_name.clone());
            }
        }
        true
    }
}

/// Platform rendering into CPU framebuffers.
#[derive(Debug)]
pub struct HeadlessPlatform {
    framebuffer: Framebuffer,
    offscreen_buffers: HashMap<OffscreenBufferHandle, Framebuffer>,
    embedded_compositor: HeadlessEmbeddedCompositor,
    system_compositor: Option<HeadlessSystemCompositor>,
    frames_presented: u64,
}

impl HeadlessPlatform {
    /// Platform for a display config. A system compositor controller exists
    /// when the display is placed on an IVI layer.
    #[must_use]
    pub fn new(config: &DisplayConfig) -> Self {
        let mut system_compositor = config
            .wayland_ivi_layer
            .map(|_| HeadlessSystemCompositor::default());
        if let (Some(controller), Some(layer)) = (&mut system_compositor, config.wayland_ivi_layer) {
            controller.layers.insert(layer, true);
        }
        Self {
            framebuffer: Framebuffer::new(config.width, config.height, config.clear_color),
            offscreen_buffers: HashMap::new(),
            embedded_compositor: HeadlessEmbeddedCompositor::default(),
            system_compositor,
            frames_presented: 0,
        }
    }

    /// Number of presented frames.
    #[must_use]
    pub const fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

impl Platform for HeadlessPlatform {
    fn enable_context(&mut self) -> bool {
        true
    }

    fn create_offscreen_buffer(
        &mut self,
        buffer: OffscreenBufferHandle,
        width: u32,
        height: u32,
        _sample_count: u32,
    ) -> bool {
        if width == 0 || height == 0 || self.offscreen_buffers.contains_key(&buffer) {
            return false;
        }
        self.offscreen_buffers
            .insert(buffer, Framebuffer::new(width, height, Vec4::TRANSPARENT));
        true
    }

    fn destroy_offscreen_buffer(&mut self, buffer: OffscreenBufferHandle) -> bool {
        self.offscreen_buffers.remove(&buffer).is_some()
    }

    fn set_clear_color(&mut self, buffer: Option<OffscreenBufferHandle>, color: Vec4) -> bool {
        match buffer {
            None => {
                self.framebuffer.clear_color = color;
                true
            }
            Some(buffer) => match self.offscreen_buffers.get_mut(&buffer) {
                Some(target) => {
                    target.clear_color = color;
                    true
                }
                None => false,
            },
        }
    }

    fn render_frame(&mut self) {
        for buffer in self.offscreen_buffers.values_mut() {
            buffer.clear();
        }
        self.framebuffer.clear();
    }

    fn swap_buffers(&mut self) {
        self.frames_presented += 1;
    }

    fn read_pixels(&mut self, buffer: Option<OffscreenBufferHandle>, region: Rect) -> Option<Vec<u8>> {
        match buffer {
            None => self.framebuffer.read(region),
            Some(buffer) => self.offscreen_buffers.get(&buffer)?.read(region),
        }
    }

    fn resize_window(&mut self, width: u32, height: u32) {
        self.framebuffer.resize(width, height);
    }

    fn window_size(&self) -> (u32, u32) {
        (self.framebuffer.width, self.framebuffer.height)
    }

    fn embedded_compositor(&mut self) -> &mut dyn EmbeddedCompositor {
        &mut self.embedded_compositor
    }

    fn system_compositor_controller(&mut self) -> Option<&mut dyn SystemCompositorController> {
        self.system_compositor
            .as_mut()
            .map(|controller| controller as &mut dyn SystemCompositorController)
    }

    fn has_system_compositor_controller(&self) -> bool {
        self.system_compositor.is_some()
    }
}

/// Factory of [`HeadlessPlatform`]s.
#[derive(Debug, Default)]
pub struct HeadlessPlatformFactory;

impl PlatformFactory for HeadlessPlatformFactory {
    fn create_platform(
        &self,
        _renderer_config: &RendererConfig,
        display_config: &DisplayConfig,
    ) -> RendererResult<Box<dyn Platform>> {
        if display_config.width == 0 || display_config.height == 0 {
            return Err(RendererError::PlatformCreation(format!(
                "window size {}x{} is empty",
                display_config.width, display_config.height
            )));
        }
        Ok(Box::new(HeadlessPlatform::new(display_config)))
    }
}
