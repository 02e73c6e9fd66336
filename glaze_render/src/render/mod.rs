//! The renderer core: drawing adapters, state minimizer, flush loop,
//! render targets, and pixel readback.
//!
//! Draw calls append vertices and commands to the batch; no GPU work
//! happens until a flush, which is triggered by arena pressure, an
//! explicit present, a render-target change, or a mutation of a
//! batched texture. The flush loop resolves one program per command
//! through the shader/program caches and issues only the state that
//! actually changed since the previous command.

use std::mem;

use cgmath::Matrix4;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::core::error::{record, RenderError, RenderResult};
use crate::core::handle::HandleAllocator;
use crate::core::math::{FPoint, FRect, Rect};
use crate::gpu::{
    BlendFactor, BufferObject, Capability, FramebufferObject, GpuBackend, PlaneLayout,
    PrimitiveKind, ProgramObject, ScaleFilter, ShaderBinaryFormat, TextureObject,
};
use crate::shaders::ShaderKind;

pub(crate) mod batch;
pub(crate) mod pixels;
pub(crate) mod program;
pub(crate) mod shader;
pub mod texture;
pub mod vertex;

pub use batch::MAX_VERTICES;
pub use texture::{PixelFormat, TextureAccess, TextureId};

use batch::{Batch, BatchKey, DrawCommand};
use program::{ProgramCache, Uniform};
use shader::{copy_fragment_kind, ShaderCache};
use texture::{streaming_scratch_len, TextureData, TextureMarker};
use vertex::{
    Vertex, ATTRIBUTES, ATTR_ANGLE, ATTR_CENTER, ATTR_COLOR, ATTR_POSITION, ATTR_TEXCOORD,
    VERTEX_STRIDE,
};

const INV_255: f32 = 1.0 / 255.0;

/// The four supported blend modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    None,
    Blend,
    Add,
    Mod,
}

/// Mirror flags for `render_copy_ex`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flip {
    pub horizontal: bool,
    pub vertical: bool,
}

impl Flip {
    pub const NONE: Self = Self {
        horizontal: false,
        vertical: false,
    };
    pub const HORIZONTAL: Self = Self {
        horizontal: true,
        vertical: false,
    };
    pub const VERTICAL: Self = Self {
        horizontal: false,
        vertical: true,
    };
}

/// Window events the renderer reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowEvent {
    SizeChanged,
    Shown,
    Hidden,
    Minimized,
}

/// Renderer creation options.
#[derive(Clone, Debug)]
pub struct RendererOptions {
    /// Poll and report GPU errors after operations. Off by default:
    /// error polling forces GPU synchronization.
    pub debug: bool,
    /// Sampling filter applied to every created texture plane.
    pub scale_filter: ScaleFilter,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            debug: false,
            scale_filter: scale_filter_from_env(),
        }
    }
}

/// Scale-quality hint: "1"/"linear"/"best" select linear filtering,
/// anything else (or unset) nearest.
fn scale_filter_from_env() -> ScaleFilter {
    match std::env::var("RENDER_SCALE_QUALITY") {
        Ok(v) if v == "1" || v == "2" || v.eq_ignore_ascii_case("linear")
            || v.eq_ignore_ascii_case("best") =>
        {
            ScaleFilter::Linear
        }
        _ => ScaleFilter::Nearest,
    }
}

/// Column-major orthographic projection. Y points down for the
/// window (bottom-left GL origin flipped) and up for texture targets.
fn ortho_projection(w: f32, h: f32, to_target: bool) -> Matrix4<f32> {
    let sy = if to_target { 2.0 / h } else { -2.0 / h };
    let ty = if to_target { -1.0 } else { 1.0 };
    #[rustfmt::skip]
    let projection = Matrix4::new(
        2.0 / w, 0.0, 0.0, 0.0,
        0.0,     sy,  0.0, 0.0,
        0.0,     0.0, 0.0, 0.0,
        -1.0,    ty,  0.0, 1.0,
    );
    projection
}

/// Uploads one texture plane, repacking into tight rows when the
/// source pitch differs from the plane's natural pitch.
fn upload_plane<B: GpuBackend>(
    gpu: &mut B,
    layout: PlaneLayout,
    x: i32,
    y: i32,
    w: u32,
    h: u32,
    pixels: &[u8],
    pitch: usize,
) -> RenderResult<()> {
    if w == 0 || h == 0 {
        return Ok(());
    }
    let tight = w as usize * layout.bytes_per_texel();
    let needed = (h as usize - 1) * pitch + tight;
    if pixels.len() < needed {
        return Err(record(RenderError::InvalidState(
            "pixel buffer too small for texture update".into(),
        )));
    }
    if pitch == tight {
        gpu.tex_sub_image_2d(layout, x, y, w, h, &pixels[..tight * h as usize]);
    } else {
        let mut packed = Vec::with_capacity(tight * h as usize);
        for row in 0..h as usize {
            packed.extend_from_slice(&pixels[row * pitch..row * pitch + tight]);
        }
        gpu.tex_sub_image_2d(layout, x, y, w, h, &packed);
    }
    Ok(())
}

/// The batched 2D renderer over a GPU function table.
pub struct Renderer<B: GpuBackend> {
    gpu: B,
    debug: bool,
    scale_filter: ScaleFilter,

    batch: Batch,
    vbo: BufferObject,

    shader_cache: ShaderCache,
    program_cache: ProgramCache,
    current_program: Option<ProgramObject>,
    shader_formats: Vec<ShaderBinaryFormat>,

    texture_allocator: HandleAllocator<TextureMarker>,
    textures: Vec<Option<TextureData>>,

    framebuffers: FxHashMap<(u32, u32), FramebufferObject>,
    window_framebuffer: FramebufferObject,

    context_current: bool,
    /// Last applied blend mode; `None` means unknown (force apply).
    current_blend: Option<BlendMode>,
    tex_coords_enabled: bool,
    /// Last color handed to `clear_color`, pre-swap, packed RGBA8.
    clear_color: [u8; 4],
    draw_color: [u8; 4],
    draw_blend: BlendMode,
    viewport: Rect,
    clip_rect: Option<Rect>,
    target: Option<TextureId>,
}

impl<B: GpuBackend> Renderer<B> {
    /// Creates a renderer over `gpu`: binds the context, allocates
    /// the stream-draw vertex buffer, and seeds initial GPU state.
    pub fn new(mut gpu: B, options: RendererOptions) -> RenderResult<Self> {
        gpu.make_current()?;
        let shader_formats = gpu.shader_formats();
        let window_framebuffer = gpu.window_framebuffer();

        let vbo = gpu.gen_buffer();
        gpu.bind_array_buffer(vbo);
        gpu.buffer_data(MAX_VERTICES * VERTEX_STRIDE);
        gpu.unbind_array_buffer();

        let (w, h) = gpu.drawable_size();
        let mut renderer = Self {
            gpu,
            debug: options.debug,
            scale_filter: options.scale_filter,
            batch: Batch::new(),
            vbo,
            shader_cache: ShaderCache::new(),
            program_cache: ProgramCache::new(),
            current_program: None,
            shader_formats,
            texture_allocator: HandleAllocator::new(),
            textures: Vec::new(),
            framebuffers: FxHashMap::default(),
            window_framebuffer,
            context_current: true,
            current_blend: None,
            tex_coords_enabled: false,
            clear_color: [0, 0, 0, 0],
            draw_color: [255, 255, 255, 255],
            draw_blend: BlendMode::None,
            viewport: Rect::new(0, 0, w as i32, h as i32),
            clip_rect: None,
            target: None,
        };
        renderer.reset_state();
        renderer.check_error("create_renderer")?;
        log::debug!("renderer created, {w}x{h} drawable");
        Ok(renderer)
    }

    /// Access to the underlying backend (e.g. for event pumping or
    /// inspecting a recording backend in tests).
    pub fn backend(&self) -> &B {
        &self.gpu
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.gpu
    }

    // ------------------------------------------------------------------
    // State minimizer internals
    // ------------------------------------------------------------------

    fn activate(&mut self) -> RenderResult<()> {
        if !self.context_current {
            // Force program reselection after a context rebind.
            self.current_program = None;
            self.gpu.make_current()?;
            self.context_current = true;
            self.apply_viewport();
        }
        if self.debug {
            while self.gpu.poll_error().is_some() {}
        }
        Ok(())
    }

    /// Drains pending GPU errors when debug mode is on; the last one
    /// becomes the returned error. With debug off this never polls,
    /// since `get_error` forces a GPU sync.
    fn check_error(&mut self, prefix: &str) -> RenderResult<()> {
        if !self.debug {
            return Ok(());
        }
        let mut last = None;
        while let Some(code) = self.gpu.poll_error() {
            log::error!("{prefix}: {}", code.name());
            last = Some(code);
        }
        match last {
            Some(code) => Err(record(RenderError::GpuBackend {
                prefix: prefix.to_owned(),
                error: code.name(),
            })),
            None => Ok(()),
        }
    }

    fn reset_state(&mut self) {
        self.apply_viewport();
        self.current_blend = None;
        self.tex_coords_enabled = false;

        self.gpu.active_texture(0);
        self.gpu.set_pixel_alignment();

        let [r, g, b, a] = self.clear_color;
        self.gpu.clear_color(
            r as f32 * INV_255,
            g as f32 * INV_255,
            b as f32 * INV_255,
            a as f32 * INV_255,
        );

        self.gpu.enable_vertex_attrib(ATTR_POSITION);
        self.gpu.enable_vertex_attrib(ATTR_COLOR);
        self.gpu.enable_vertex_attrib(ATTR_ANGLE);
        self.gpu.enable_vertex_attrib(ATTR_CENTER);
        self.gpu.disable_vertex_attrib(ATTR_TEXCOORD);
    }

    fn apply_blend_mode(&mut self, blend: BlendMode) {
        if self.current_blend == Some(blend) {
            return;
        }
        match blend {
            BlendMode::None => {
                self.gpu.set_capability(Capability::Blend, false);
            }
            BlendMode::Blend => {
                self.gpu.set_capability(Capability::Blend, true);
                self.gpu.blend_func_separate(
                    BlendFactor::SrcAlpha,
                    BlendFactor::OneMinusSrcAlpha,
                    BlendFactor::One,
                    BlendFactor::OneMinusSrcAlpha,
                );
            }
            BlendMode::Add => {
                self.gpu.set_capability(Capability::Blend, true);
                self.gpu.blend_func_separate(
                    BlendFactor::SrcAlpha,
                    BlendFactor::One,
                    BlendFactor::Zero,
                    BlendFactor::One,
                );
            }
            BlendMode::Mod => {
                self.gpu.set_capability(Capability::Blend, true);
                self.gpu.blend_func_separate(
                    BlendFactor::Zero,
                    BlendFactor::SrcColor,
                    BlendFactor::Zero,
                    BlendFactor::One,
                );
            }
        }
        self.current_blend = Some(blend);
    }

    fn set_tex_coords(&mut self, enabled: bool) {
        if enabled != self.tex_coords_enabled {
            if enabled {
                self.gpu.enable_vertex_attrib(ATTR_TEXCOORD);
            } else {
                self.gpu.disable_vertex_attrib(ATTR_TEXCOORD);
            }
            self.tex_coords_enabled = enabled;
        }
    }

    fn select_program(&mut self, fragment: ShaderKind, blend: BlendMode) -> RenderResult<()> {
        let result = self.select_program_inner(fragment, blend);
        if result.is_err() {
            // Invalidate so the next draw reselects from scratch.
            self.current_program = None;
        }
        result
    }

    fn select_program_inner(&mut self, fragment: ShaderKind, blend: BlendMode) -> RenderResult<()> {
        let vertex_slot = self.shader_cache.cache(
            &mut self.gpu,
            ShaderKind::VertexDefault,
            blend,
            &self.shader_formats,
        )?;
        let fragment_slot = match self.shader_cache.cache(
            &mut self.gpu,
            fragment,
            blend,
            &self.shader_formats,
        ) {
            Ok(slot) => slot,
            Err(err) => {
                self.shader_cache
                    .evict_if_unreferenced(&mut self.gpu, vertex_slot);
                return Err(err);
            }
        };

        // Already using a program built from exactly these shaders?
        if let Some(current) = self.current_program {
            if let Some(entry) = self.program_cache.entry(current) {
                if entry.vertex_shader == vertex_slot && entry.fragment_shader == fragment_slot {
                    return Ok(());
                }
            }
        }

        let program = match self.program_cache.select(
            &mut self.gpu,
            &mut self.shader_cache,
            vertex_slot,
            fragment_slot,
            blend,
        ) {
            Ok(program) => program,
            Err(err) => {
                self.shader_cache
                    .evict_if_unreferenced(&mut self.gpu, fragment_slot);
                self.shader_cache
                    .evict_if_unreferenced(&mut self.gpu, vertex_slot);
                return Err(err);
            }
        };

        self.gpu.use_program(program);
        self.current_program = Some(program);
        self.apply_projection();
        Ok(())
    }

    /// Uploads the orthographic projection to the current program if
    /// it differs from the program's stored copy. Zero-area viewports
    /// are a no-op.
    fn apply_projection(&mut self) {
        if self.viewport.w == 0 || self.viewport.h == 0 {
            return;
        }
        let projection = ortho_projection(
            self.viewport.w as f32,
            self.viewport.h as f32,
            self.target.is_some(),
        );
        let Some(current) = self.current_program else {
            return;
        };
        let Some(entry) = self.program_cache.entry_mut(current) else {
            return;
        };
        if entry.projection != projection {
            if let Some(loc) = entry.uniforms[Uniform::Projection as usize] {
                self.gpu.uniform_matrix4(loc, &projection);
            }
            entry.projection = projection;
        }
    }

    fn apply_viewport(&mut self) {
        let vp = self.viewport;
        if self.target.is_some() {
            self.gpu.viewport(vp.x, vp.y, vp.w, vp.h);
        } else {
            let (_, h) = self.gpu.drawable_size();
            self.gpu
                .viewport(vp.x, h as i32 - vp.y - vp.h, vp.w, vp.h);
        }
    }

    // ------------------------------------------------------------------
    // Viewport, clip, draw state
    // ------------------------------------------------------------------

    /// Sets and applies the viewport rectangle.
    pub fn set_viewport(&mut self, rect: Rect) -> RenderResult<()> {
        self.viewport = rect;
        self.update_viewport()
    }

    /// Re-applies the stored viewport (deferred while the context is
    /// stale; reactivation applies it).
    pub fn update_viewport(&mut self) -> RenderResult<()> {
        if !self.context_current {
            return Ok(());
        }
        self.apply_viewport();
        if self.current_program.is_some() {
            self.apply_projection();
        }
        self.check_error("glViewport")
    }

    /// Sets and applies the clip rectangle; `None` disables clipping.
    pub fn set_clip_rect(&mut self, rect: Option<Rect>) -> RenderResult<()> {
        self.clip_rect = rect;
        self.update_clip_rect()
    }

    /// Re-applies the stored clip rectangle.
    pub fn update_clip_rect(&mut self) -> RenderResult<()> {
        if !self.context_current {
            return Ok(());
        }
        match self.clip_rect {
            Some(rect) => {
                self.gpu.set_capability(Capability::ScissorTest, true);
                if self.target.is_some() {
                    self.gpu.scissor(
                        self.viewport.x + rect.x,
                        self.viewport.y + rect.y,
                        rect.w,
                        rect.h,
                    );
                } else {
                    let (_, h) = self.gpu.drawable_size();
                    self.gpu.scissor(
                        self.viewport.x + rect.x,
                        h as i32 - self.viewport.y - rect.y - rect.h,
                        rect.w,
                        rect.h,
                    );
                }
            }
            None => self.gpu.set_capability(Capability::ScissorTest, false),
        }
        Ok(())
    }

    pub fn set_draw_color(&mut self, r: u8, g: u8, b: u8, a: u8) {
        self.draw_color = [r, g, b, a];
    }

    pub fn set_draw_blend_mode(&mut self, blend: BlendMode) {
        self.draw_blend = blend;
    }

    /// Current drawable size of the output (window or target).
    pub fn get_output_size(&self) -> (u32, u32) {
        self.gpu.drawable_size()
    }

    // ------------------------------------------------------------------
    // Textures
    // ------------------------------------------------------------------

    fn texture_data(&self, id: TextureId) -> Option<&TextureData> {
        if !self.texture_allocator.is_alive(id) {
            return None;
        }
        self.textures.get(id.index() as usize).and_then(|e| e.as_ref())
    }

    fn texture_data_mut(&mut self, id: TextureId) -> Option<&mut TextureData> {
        if !self.texture_allocator.is_alive(id) {
            return None;
        }
        self.textures
            .get_mut(id.index() as usize)
            .and_then(|e| e.as_mut())
    }

    fn require_texture(&self, id: TextureId) -> RenderResult<&TextureData> {
        self.texture_data(id).ok_or_else(|| {
            record(RenderError::InvalidState(
                "texture is destroyed or invalid".into(),
            ))
        })
    }

    fn target_format(&self) -> Option<PixelFormat> {
        self.target.and_then(|id| self.texture_data(id)).map(|d| d.format)
    }

    /// True when the bound target stores channels swapped relative to
    /// the shader output, requiring an R/B swap of CPU-side colors.
    fn target_swaps_channels(&self) -> bool {
        matches!(
            self.target_format(),
            Some(PixelFormat::Argb8888 | PixelFormat::Rgb888)
        )
    }

    fn draw_color_normalized(&self, swap: bool) -> [f32; 4] {
        let [mut r, g, mut b, a] = self.draw_color;
        if swap {
            mem::swap(&mut r, &mut b);
        }
        [
            r as f32 * INV_255,
            g as f32 * INV_255,
            b as f32 * INV_255,
            a as f32 * INV_255,
        ]
    }

    fn fbo_for(&mut self, w: u32, h: u32) -> FramebufferObject {
        if let Some(&fbo) = self.framebuffers.get(&(w, h)) {
            fbo
        } else {
            let fbo = self.gpu.gen_framebuffer();
            self.framebuffers.insert((w, h), fbo);
            fbo
        }
    }

    /// Creates a texture. Planar YUV formats allocate three planes
    /// (V and U at quarter resolution), semi-planar formats two, and
    /// RGBA-family formats one.
    pub fn create_texture(
        &mut self,
        format: PixelFormat,
        access: TextureAccess,
        w: u32,
        h: u32,
    ) -> RenderResult<TextureId> {
        self.activate()?;
        if w == 0 || h == 0 {
            return Err(record(RenderError::InvalidState(
                "texture dimensions must be positive".into(),
            )));
        }

        let pitch = w as usize * format.bytes_per_pixel();
        let pixel_data = if access == TextureAccess::Streaming {
            vec![0u8; streaming_scratch_len(format, h, pitch)]
        } else {
            Vec::new()
        };

        let filter = self.scale_filter;
        let mut planes: SmallVec<[TextureObject; 3]> = SmallVec::new();

        let mut chroma_u = None;
        let mut chroma_v = None;
        if format.is_planar_yuv() {
            let v = self.gpu.gen_texture();
            self.gpu.active_texture(2);
            self.gpu.bind_texture(v);
            self.gpu.tex_filtering(filter);
            self.gpu.tex_image_2d(PlaneLayout::Luminance, w / 2, h / 2);
            chroma_v = Some(v);

            let u = self.gpu.gen_texture();
            self.gpu.active_texture(1);
            self.gpu.bind_texture(u);
            self.gpu.tex_filtering(filter);
            self.gpu.tex_image_2d(PlaneLayout::Luminance, w / 2, h / 2);
            chroma_u = Some(u);
        } else if format.is_semi_planar() {
            let uv = self.gpu.gen_texture();
            self.gpu.active_texture(1);
            self.gpu.bind_texture(uv);
            self.gpu.tex_filtering(filter);
            self.gpu
                .tex_image_2d(PlaneLayout::LuminanceAlpha, w / 2, h / 2);
            chroma_u = Some(uv);
        }

        let y = self.gpu.gen_texture();
        self.gpu.active_texture(0);
        self.gpu.bind_texture(y);
        self.gpu.tex_filtering(filter);
        self.gpu.tex_image_2d(format.primary_layout(), w, h);

        planes.push(y);
        if let Some(u) = chroma_u {
            planes.push(u);
        }
        if let Some(v) = chroma_v {
            planes.push(v);
        }

        if let Err(err) = self.check_error("create_texture") {
            for plane in planes {
                self.gpu.delete_texture(plane);
            }
            return Err(err);
        }

        let fbo = if access == TextureAccess::Target {
            Some(self.fbo_for(w, h))
        } else {
            None
        };

        let id = self.texture_allocator.allocate();
        let index = id.index() as usize;
        if index >= self.textures.len() {
            self.textures.resize_with(index + 1, || None);
        }
        self.textures[index] = Some(TextureData {
            format,
            access,
            w,
            h,
            planes,
            pixel_data,
            pitch,
            fbo,
            in_batch: false,
            color_mod: [255, 255, 255, 255],
            blend: BlendMode::None,
        });
        Ok(id)
    }

    /// Destroys a texture, flushing first if the batch references it.
    pub fn destroy_texture(&mut self, texture: TextureId) -> RenderResult<()> {
        if self.require_texture(texture)?.in_batch {
            self.flush()?;
        }
        self.activate()?;

        let index = texture.index() as usize;
        if let Some(data) = self.textures[index].take() {
            for plane in data.planes {
                self.gpu.delete_texture(plane);
            }
        }
        self.texture_allocator.deallocate(texture);
        if self.target == Some(texture) {
            self.target = None;
        }
        Ok(())
    }

    /// Size of a texture in pixels.
    pub fn texture_size(&self, texture: TextureId) -> RenderResult<(u32, u32)> {
        let data = self.require_texture(texture)?;
        Ok((data.w, data.h))
    }

    /// Per-texture color modulation applied at copy time.
    pub fn set_texture_color_mod(
        &mut self,
        texture: TextureId,
        r: u8,
        g: u8,
        b: u8,
    ) -> RenderResult<()> {
        self.require_texture(texture)?;
        if let Some(data) = self.texture_data_mut(texture) {
            data.color_mod[0] = r;
            data.color_mod[1] = g;
            data.color_mod[2] = b;
        }
        Ok(())
    }

    pub fn set_texture_alpha_mod(&mut self, texture: TextureId, a: u8) -> RenderResult<()> {
        self.require_texture(texture)?;
        if let Some(data) = self.texture_data_mut(texture) {
            data.color_mod[3] = a;
        }
        Ok(())
    }

    /// Blend mode used when this texture is copied.
    pub fn set_texture_blend_mode(
        &mut self,
        texture: TextureId,
        blend: BlendMode,
    ) -> RenderResult<()> {
        self.require_texture(texture)?;
        if let Some(data) = self.texture_data_mut(texture) {
            data.blend = blend;
        }
        Ok(())
    }

    /// Uploads pixels into `rect`. For planar/semi-planar formats the
    /// chroma planes follow the luma plane in `pixels` at the usual
    /// 4:2:0 offsets. Empty rects are a no-op.
    pub fn update_texture(
        &mut self,
        texture: TextureId,
        rect: Rect,
        pixels: &[u8],
        pitch: usize,
    ) -> RenderResult<()> {
        let (format, planes, in_batch) = {
            let data = self.require_texture(texture)?;
            (data.format, data.planes.clone(), data.in_batch)
        };
        if in_batch {
            self.flush()?;
        }
        self.activate()?;
        if rect.is_empty() {
            return Ok(());
        }

        self.gpu.bind_texture(planes[0]);
        upload_plane(
            &mut self.gpu,
            format.primary_layout(),
            rect.x,
            rect.y,
            rect.w as u32,
            rect.h as u32,
            pixels,
            pitch,
        )?;

        if format.is_planar_yuv() {
            // YV12 stores V before U; IYUV the reverse.
            let (first, second) = if format == PixelFormat::Yv12 {
                (planes[2], planes[1])
            } else {
                (planes[1], planes[2])
            };

            let mut offset = rect.h as usize * pitch;
            if pixels.len() < offset {
                return Err(record(RenderError::InvalidState(
                    "pixel buffer too small for chroma planes".into(),
                )));
            }
            self.gpu.bind_texture(first);
            upload_plane(
                &mut self.gpu,
                PlaneLayout::Luminance,
                rect.x / 2,
                rect.y / 2,
                (rect.w / 2) as u32,
                (rect.h / 2) as u32,
                &pixels[offset..],
                pitch / 2,
            )?;

            offset += (rect.h as usize * pitch) / 4;
            if pixels.len() < offset {
                return Err(record(RenderError::InvalidState(
                    "pixel buffer too small for second chroma plane".into(),
                )));
            }
            self.gpu.bind_texture(second);
            upload_plane(
                &mut self.gpu,
                PlaneLayout::Luminance,
                rect.x / 2,
                rect.y / 2,
                (rect.w / 2) as u32,
                (rect.h / 2) as u32,
                &pixels[offset..],
                pitch / 2,
            )?;
        } else if format.is_semi_planar() {
            let offset = rect.h as usize * pitch;
            if pixels.len() < offset {
                return Err(record(RenderError::InvalidState(
                    "pixel buffer too small for interleaved chroma".into(),
                )));
            }
            self.gpu.bind_texture(planes[1]);
            upload_plane(
                &mut self.gpu,
                PlaneLayout::LuminanceAlpha,
                rect.x / 2,
                rect.y / 2,
                (rect.w / 2) as u32,
                (rect.h / 2) as u32,
                &pixels[offset..],
                pitch,
            )?;
        }

        self.check_error("glTexSubImage2D")
    }

    /// Uploads separate Y/U/V planes into a planar texture. Plane
    /// upload order is V, U, Y.
    #[allow(clippy::too_many_arguments)]
    pub fn update_texture_yuv(
        &mut self,
        texture: TextureId,
        rect: Rect,
        y_plane: &[u8],
        y_pitch: usize,
        u_plane: &[u8],
        u_pitch: usize,
        v_plane: &[u8],
        v_pitch: usize,
    ) -> RenderResult<()> {
        let (format, planes, in_batch) = {
            let data = self.require_texture(texture)?;
            (data.format, data.planes.clone(), data.in_batch)
        };
        if !format.is_planar_yuv() {
            return Err(record(RenderError::UnsupportedFormat(
                "per-plane update requires a planar YUV texture".into(),
            )));
        }
        if in_batch {
            self.flush()?;
        }
        self.activate()?;
        if rect.is_empty() {
            return Ok(());
        }

        let (half_x, half_y) = (rect.x / 2, rect.y / 2);
        let (half_w, half_h) = ((rect.w / 2) as u32, (rect.h / 2) as u32);

        self.gpu.bind_texture(planes[2]);
        upload_plane(
            &mut self.gpu,
            PlaneLayout::Luminance,
            half_x,
            half_y,
            half_w,
            half_h,
            v_plane,
            v_pitch,
        )?;

        self.gpu.bind_texture(planes[1]);
        upload_plane(
            &mut self.gpu,
            PlaneLayout::Luminance,
            half_x,
            half_y,
            half_w,
            half_h,
            u_plane,
            u_pitch,
        )?;

        self.gpu.bind_texture(planes[0]);
        upload_plane(
            &mut self.gpu,
            PlaneLayout::Luminance,
            rect.x,
            rect.y,
            rect.w as u32,
            rect.h as u32,
            y_plane,
            y_pitch,
        )?;

        self.check_error("glTexSubImage2D")
    }

    /// Returns a mutable window into a streaming texture's CPU
    /// scratch, starting at `rect`'s origin, plus the scratch pitch.
    pub fn lock_texture(
        &mut self,
        texture: TextureId,
        rect: Rect,
    ) -> RenderResult<(&mut [u8], usize)> {
        let data = self.require_texture(texture)?;
        if data.access != TextureAccess::Streaming {
            return Err(record(RenderError::InvalidState(
                "only streaming textures can be locked".into(),
            )));
        }
        let pitch = data.pitch;
        let bpp = data.format.bytes_per_pixel();
        let offset = pitch * rect.y.max(0) as usize + rect.x.max(0) as usize * bpp;
        let data = self.texture_data_mut(texture).ok_or_else(|| {
            record(RenderError::InvalidState(
                "texture is destroyed or invalid".into(),
            ))
        })?;
        if offset > data.pixel_data.len() {
            return Err(record(RenderError::InvalidState(
                "lock rect outside texture bounds".into(),
            )));
        }
        Ok((&mut data.pixel_data[offset..], pitch))
    }

    /// Pushes the whole CPU scratch back to the GPU. Deliberately
    /// conservative: the full texture is uploaded regardless of which
    /// rect was locked.
    pub fn unlock_texture(&mut self, texture: TextureId) -> RenderResult<()> {
        let (w, h, pitch) = {
            let data = self.require_texture(texture)?;
            (data.w, data.h, data.pitch)
        };
        let pixels = match self.texture_data_mut(texture) {
            Some(data) => mem::take(&mut data.pixel_data),
            None => return Ok(()),
        };
        let result = self.update_texture(
            texture,
            Rect::new(0, 0, w as i32, h as i32),
            &pixels,
            pitch,
        );
        if let Some(data) = self.texture_data_mut(texture) {
            data.pixel_data = pixels;
        }
        result
    }

    /// Binds `texture` for external GL use; reports normalized
    /// texture coordinate extents.
    pub fn bind_texture(&mut self, texture: TextureId) -> RenderResult<(f32, f32)> {
        let plane = self.require_texture(texture)?.plane_y();
        self.activate()?;
        self.gpu.bind_texture(plane);
        Ok((1.0, 1.0))
    }

    pub fn unbind_texture(&mut self, texture: TextureId) -> RenderResult<()> {
        self.require_texture(texture)?;
        self.activate()?;
        self.gpu.unbind_texture();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Render target
    // ------------------------------------------------------------------

    /// Redirects drawing into `texture` (must have target access) or
    /// back to the window for `None`. Forces a flush; resets the
    /// viewport to cover the new target.
    pub fn set_render_target(&mut self, texture: Option<TextureId>) -> RenderResult<()> {
        self.flush()?;
        self.activate()?;

        match texture {
            None => {
                self.gpu.bind_framebuffer(self.window_framebuffer);
                self.target = None;
                let (w, h) = self.gpu.drawable_size();
                self.viewport = Rect::new(0, 0, w as i32, h as i32);
            }
            Some(id) => {
                let (fbo, plane, w, h) = {
                    let data = self.require_texture(id)?;
                    let fbo = data.fbo.ok_or_else(|| {
                        record(RenderError::InvalidState(
                            "texture was not created with target access".into(),
                        ))
                    })?;
                    (fbo, data.plane_y(), data.w, data.h)
                };
                self.gpu.bind_framebuffer(fbo);
                self.gpu.framebuffer_texture_2d(plane);
                if !self.gpu.framebuffer_complete() {
                    return Err(record(RenderError::InvalidState(
                        "framebuffer incomplete after attachment".into(),
                    )));
                }
                self.target = Some(id);
                self.viewport = Rect::new(0, 0, w as i32, h as i32);
            }
        }
        self.update_viewport()?;
        self.update_clip_rect()
    }

    // ------------------------------------------------------------------
    // Clearing and drawing
    // ------------------------------------------------------------------

    /// Clears the current target with the draw color. The clear color
    /// is only re-sent to the GPU when it changed; scissor is
    /// suspended around the clear since some drivers honor it for
    /// clears and some do not.
    pub fn render_clear(&mut self) -> RenderResult<()> {
        self.activate()?;

        if self.clear_color != self.draw_color {
            let [r, g, b, a] = self.draw_color_normalized(self.target_swaps_channels());
            self.gpu.clear_color(r, g, b, a);
            self.clear_color = self.draw_color;
        }

        let clipping = self.clip_rect.is_some();
        if clipping {
            self.gpu.set_capability(Capability::ScissorTest, false);
        }
        self.gpu.clear();
        if clipping {
            self.gpu.set_capability(Capability::ScissorTest, true);
        }
        Ok(())
    }

    /// Draws points with the current draw color and blend mode.
    pub fn render_draw_points(&mut self, points: &[FPoint]) -> RenderResult<()> {
        let color = self.draw_color_normalized(false);
        let key = BatchKey {
            texture: None,
            blend: self.draw_blend,
            primitive: PrimitiveKind::Points,
        };
        for point in points {
            if !self.batch.has_room_for(1) {
                self.flush()?;
            }
            self.batch.append(key, 1);
            self.batch
                .push(Vertex::solid([point.x + 0.5, point.y + 0.5], color));
        }
        self.check_error("render_draw_points")
    }

    /// Draws a polyline as independent segments between consecutive
    /// points.
    pub fn render_draw_lines(&mut self, points: &[FPoint]) -> RenderResult<()> {
        let color = self.draw_color_normalized(false);
        let key = BatchKey {
            texture: None,
            blend: self.draw_blend,
            primitive: PrimitiveKind::Lines,
        };
        for pair in points.windows(2) {
            if !self.batch.has_room_for(2) {
                self.flush()?;
            }
            self.batch.append(key, 2);
            self.batch
                .push(Vertex::solid([pair[0].x + 0.5, pair[0].y + 0.5], color));
            self.batch
                .push(Vertex::solid([pair[1].x + 0.5, pair[1].y + 0.5], color));
        }
        self.check_error("render_draw_lines")
    }

    /// Fills rectangles with the current draw color. Large inputs are
    /// split across flushes; there is no per-call size limit.
    pub fn render_fill_rects(&mut self, rects: &[FRect]) -> RenderResult<()> {
        let color = self.draw_color_normalized(false);
        let key = BatchKey {
            texture: None,
            blend: self.draw_blend,
            primitive: PrimitiveKind::Triangles,
        };
        for rect in rects {
            if !self.batch.has_room_for(6) {
                self.flush()?;
            }
            self.batch.append(key, 6);

            let (x_min, x_max) = (rect.x, rect.x + rect.w);
            let (y_min, y_max) = (rect.y, rect.y + rect.h);
            // Quad as two triangles: 0-1-2, 2-4-0 (corners repeated).
            for pos in [
                [x_min, y_min],
                [x_max, y_min],
                [x_max, y_max],
                [x_max, y_max],
                [x_min, y_max],
                [x_min, y_min],
            ] {
                self.batch.push(Vertex::solid(pos, color));
            }
        }
        self.check_error("render_fill_rects")
    }

    /// Copies `texture` into `dst` (defaults: whole source, whole
    /// viewport).
    pub fn render_copy(
        &mut self,
        texture: TextureId,
        src: Option<Rect>,
        dst: Option<FRect>,
    ) -> RenderResult<()> {
        self.render_copy_ex(texture, src, dst, 0.0, None, Flip::NONE)
    }

    /// Copies `texture` with rotation and mirroring. `angle` is in
    /// degrees; the pivot defaults to the destination center. The
    /// shader receives `360 - angle` so rotation reads clockwise in
    /// the host's top-left-origin coordinates.
    pub fn render_copy_ex(
        &mut self,
        texture: TextureId,
        src: Option<Rect>,
        dst: Option<FRect>,
        angle: f64,
        center: Option<FPoint>,
        flip: Flip,
    ) -> RenderResult<()> {
        let (tex_w, tex_h, color_mod, blend) = {
            let data = self.require_texture(texture)?;
            (data.w, data.h, data.color_mod, data.blend)
        };
        let src = src.unwrap_or_else(|| Rect::new(0, 0, tex_w as i32, tex_h as i32));
        let dst = dst.unwrap_or_else(|| {
            FRect::new(0.0, 0.0, self.viewport.w as f32, self.viewport.h as f32)
        });
        let center = center.unwrap_or_else(|| FPoint::new(dst.w / 2.0, dst.h / 2.0));

        if !self.batch.has_room_for(6) {
            self.flush()?;
        }

        if let Some(data) = self.texture_data_mut(texture) {
            data.in_batch = true;
        }
        self.batch.append(
            BatchKey {
                texture: Some(texture),
                blend,
                primitive: PrimitiveKind::Triangles,
            },
            6,
        );

        let [mut r, g, mut b, a] = color_mod;
        if self.target_swaps_channels() {
            mem::swap(&mut r, &mut b);
        }
        let color = [
            r as f32 * INV_255,
            g as f32 * INV_255,
            b as f32 * INV_255,
            a as f32 * INV_255,
        ];

        let (mut x_min, mut x_max) = (dst.x, dst.x + dst.w);
        let (mut y_min, mut y_max) = (dst.y, dst.y + dst.h);
        if flip.horizontal {
            mem::swap(&mut x_min, &mut x_max);
        }
        if flip.vertical {
            mem::swap(&mut y_min, &mut y_max);
        }

        let (tw, th) = (tex_w as f32, tex_h as f32);
        let s_min = src.x as f32 / tw;
        let s_max = (src.x + src.w) as f32 / tw;
        let t_min = src.y as f32 / th;
        let t_max = (src.y + src.h) as f32 / th;

        let shader_angle = (360.0 - angle) as f32;
        let pivot = [center.x + dst.x, center.y + dst.y];

        for (pos, tex) in [
            ([x_min, y_min], [s_min, t_min]),
            ([x_max, y_min], [s_max, t_min]),
            ([x_max, y_max], [s_max, t_max]),
            ([x_max, y_max], [s_max, t_max]),
            ([x_min, y_max], [s_min, t_max]),
            ([x_min, y_min], [s_min, t_min]),
        ] {
            self.batch.push(Vertex {
                pos,
                tex,
                angle: shader_angle,
                center: pivot,
                color,
            });
        }

        self.check_error("render_copy_ex")
    }

    // ------------------------------------------------------------------
    // Flush & present
    // ------------------------------------------------------------------

    fn setup_solid(&mut self, blend: BlendMode) -> RenderResult<()> {
        self.apply_blend_mode(blend);
        self.set_tex_coords(false);
        self.select_program(ShaderKind::FragmentSolid, blend)
    }

    fn setup_copy(&mut self, texture: TextureId, blend: BlendMode) -> RenderResult<()> {
        let (format, planes) = {
            let data = self.require_texture(texture)?;
            (data.format, data.planes.clone())
        };
        let fragment = copy_fragment_kind(format, self.target_format());
        self.select_program(fragment, blend)?;

        if format.is_planar_yuv() {
            self.gpu.active_texture(2);
            self.gpu.bind_texture(planes[2]);
            self.gpu.active_texture(1);
            self.gpu.bind_texture(planes[1]);
            self.gpu.active_texture(0);
        } else if format.is_semi_planar() {
            self.gpu.active_texture(1);
            self.gpu.bind_texture(planes[1]);
            self.gpu.active_texture(0);
        }
        self.gpu.bind_texture(planes[0]);

        self.apply_blend_mode(blend);
        self.set_tex_coords(true);
        Ok(())
    }

    /// Submits the accumulated batch: uploads the used arena prefix,
    /// re-points the vertex attributes, and replays the command log
    /// in order. A command whose state setup fails is logged and
    /// skipped; the rest of the batch proceeds.
    pub fn flush(&mut self) -> RenderResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        self.activate()?;

        self.gpu.bind_array_buffer(self.vbo);
        self.gpu
            .buffer_sub_data(0, bytemuck::cast_slice(self.batch.vertices()));
        for attr in &ATTRIBUTES {
            self.gpu
                .vertex_attrib_pointer(attr.index, attr.components, VERTEX_STRIDE, attr.offset);
        }

        let commands: Vec<DrawCommand> = self.batch.commands().to_vec();
        for command in &commands {
            let setup = match command.key.texture {
                Some(texture) if command.key.primitive == PrimitiveKind::Triangles => {
                    self.setup_copy(texture, command.key.blend)
                }
                _ => self.setup_solid(command.key.blend),
            };
            if let Err(err) = setup {
                log::warn!("skipping draw command: {err}");
                continue;
            }
            self.gpu
                .draw_arrays(command.key.primitive, command.first, command.count);
        }

        for command in &commands {
            if let Some(texture) = command.key.texture {
                if let Some(data) = self.texture_data_mut(texture) {
                    data.in_batch = false;
                }
            }
        }

        self.batch.reset();
        self.gpu.unbind_array_buffer();
        self.check_error("flush")
    }

    /// Flushes and presents the back buffer.
    pub fn render_present(&mut self) {
        if let Err(err) = self.flush() {
            log::warn!("present: flush failed: {err}");
        }
        self.gpu.swap_window();
    }

    /// Reads back `rect` from the current target, flips window
    /// readback to top-down, and converts to `format`.
    pub fn render_read_pixels(
        &mut self,
        rect: Rect,
        format: PixelFormat,
        out: &mut [u8],
        pitch: usize,
    ) -> RenderResult<()> {
        self.activate()?;
        if rect.is_empty() {
            return Ok(());
        }

        let temp_format = self.target_format().unwrap_or(PixelFormat::Abgr8888);
        let temp_pitch = rect.w as usize * 4;
        let mut temp = vec![0u8; rect.h as usize * temp_pitch];

        let (_, out_h) = self.gpu.drawable_size();
        let read_y = if self.target.is_some() {
            rect.y
        } else {
            (out_h as i32 - rect.y) - rect.h
        };
        self.gpu
            .read_pixels(rect.x, read_y, rect.w as u32, rect.h as u32, &mut temp);
        self.check_error("glReadPixels")?;

        // Window readback comes bottom-up.
        if self.target.is_none() {
            pixels::flip_rows(&mut temp, temp_pitch, rect.h as usize);
        }

        pixels::convert(
            rect.w as usize,
            rect.h as usize,
            temp_format,
            &temp,
            temp_pitch,
            format,
            out,
            pitch,
        )
    }

    // ------------------------------------------------------------------
    // Window events
    // ------------------------------------------------------------------

    /// Size, show, and hide events invalidate the context binding so
    /// the next operation rebinds and re-applies the viewport.
    /// Minimization drains the GPU; some platforms require drawing to
    /// complete before the surface is suspended.
    pub fn window_event(&mut self, event: WindowEvent) {
        match event {
            WindowEvent::SizeChanged | WindowEvent::Shown | WindowEvent::Hidden => {
                self.context_current = false;
            }
            WindowEvent::Minimized => {
                self.gpu.finish();
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Vertices accumulated since the last flush.
    pub fn vertex_count(&self) -> usize {
        self.batch.vertex_count()
    }

    /// Commands accumulated since the last flush.
    pub fn command_count(&self) -> usize {
        self.batch.command_count()
    }

    /// Whether unflushed commands reference `texture`.
    pub fn texture_in_batch(&self, texture: TextureId) -> bool {
        self.texture_data(texture).is_some_and(|d| d.in_batch)
    }

    /// Linked programs currently cached.
    pub fn program_cache_len(&self) -> usize {
        self.program_cache.len()
    }

    /// Compiled shaders currently cached.
    pub fn shader_cache_len(&self) -> usize {
        self.shader_cache.len()
    }

    /// The active viewport rectangle.
    pub fn viewport(&self) -> Rect {
        self.viewport
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    /// Teardown order: batch arenas, textures, shader cache, program
    /// cache, framebuffer pool, vertex buffer. The context itself
    /// dies with the backend.
    fn drop(&mut self) {
        if self.gpu.make_current().is_err() {
            return;
        }
        self.batch.reset();
        for entry in self.textures.iter_mut() {
            if let Some(data) = entry.take() {
                for plane in data.planes {
                    self.gpu.delete_texture(plane);
                }
            }
        }
        self.shader_cache.drain(&mut self.gpu);
        self.program_cache.drain(&mut self.gpu);
        for (_, fbo) in self.framebuffers.drain() {
            self.gpu.delete_framebuffer(fbo);
        }
        self.gpu.delete_buffer(self.vbo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{GpuCall, HeadlessBackend};

    fn new_renderer(w: u32, h: u32) -> Renderer<HeadlessBackend> {
        let mut renderer = Renderer::new(
            HeadlessBackend::new(w, h),
            RendererOptions {
                debug: false,
                scale_filter: ScaleFilter::Nearest,
            },
        )
        .unwrap();
        renderer.backend_mut().clear_calls();
        renderer
    }

    #[test]
    fn creation_allocates_the_stream_vbo_and_seeds_attributes() {
        let renderer = Renderer::new(HeadlessBackend::new(320, 240), RendererOptions::default())
            .unwrap();
        let gpu = renderer.backend();
        assert_eq!(
            gpu.count(|c| matches!(
                c,
                GpuCall::BufferData { len } if *len == MAX_VERTICES * VERTEX_STRIDE
            )),
            1
        );
        // Attributes 0, 2, 3, 4 on; the tex-coord attribute off.
        for index in [0u32, 2, 3, 4] {
            assert_eq!(
                gpu.count(|c| matches!(c, GpuCall::EnableVertexAttrib(i) if *i == index)),
                1
            );
        }
        assert_eq!(
            gpu.count(|c| matches!(c, GpuCall::DisableVertexAttrib(1))),
            1
        );
    }

    #[test]
    fn clear_color_is_cached_between_identical_clears() {
        let mut renderer = new_renderer(100, 100);
        renderer.set_draw_color(10, 20, 30, 40);
        renderer.render_clear().unwrap();
        renderer.render_clear().unwrap();
        let gpu = renderer.backend();
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::ClearColor { .. })), 1);
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::Clear)), 2);
    }

    #[test]
    fn clear_suspends_the_scissor() {
        let mut renderer = new_renderer(100, 100);
        renderer.set_clip_rect(Some(Rect::new(0, 0, 10, 10))).unwrap();
        renderer.backend_mut().clear_calls();
        renderer.render_clear().unwrap();
        let calls = renderer.backend().calls();
        let disable = calls.iter().position(|c| {
            matches!(
                c,
                GpuCall::SetCapability {
                    capability: Capability::ScissorTest,
                    enabled: false
                }
            )
        });
        let clear = calls.iter().position(|c| matches!(c, GpuCall::Clear));
        let enable = calls.iter().position(|c| {
            matches!(
                c,
                GpuCall::SetCapability {
                    capability: Capability::ScissorTest,
                    enabled: true
                }
            )
        });
        assert!(disable.unwrap() < clear.unwrap());
        assert!(clear.unwrap() < enable.unwrap());
    }

    #[test]
    fn window_viewport_is_y_flipped() {
        let mut renderer = new_renderer(200, 100);
        renderer.set_viewport(Rect::new(10, 20, 50, 30)).unwrap();
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, GpuCall::Viewport { x: 10, y: 50, w: 50, h: 30 })),
            1
        );
    }

    #[test]
    fn points_batch_one_vertex_each() {
        let mut renderer = new_renderer(100, 100);
        renderer
            .render_draw_points(&[FPoint::new(1.0, 2.0)])
            .unwrap();
        assert_eq!(renderer.vertex_count(), 1);
        renderer.flush().unwrap();
        // One POINTS draw of count 1.
        assert_eq!(
            renderer.backend().count(|c| matches!(
                c,
                GpuCall::DrawArrays {
                    primitive: PrimitiveKind::Points,
                    first: 0,
                    count: 1
                }
            )),
            1
        );
    }

    #[test]
    fn lines_emit_segments_between_consecutive_points() {
        let mut renderer = new_renderer(100, 100);
        let points = [
            FPoint::new(0.0, 0.0),
            FPoint::new(10.0, 0.0),
            FPoint::new(10.0, 10.0),
        ];
        renderer.render_draw_lines(&points).unwrap();
        assert_eq!(renderer.vertex_count(), 4);
        assert_eq!(renderer.command_count(), 1);
    }

    #[test]
    fn oversized_fill_rects_split_instead_of_failing() {
        let mut renderer = new_renderer(100, 100);
        let rects = vec![FRect::new(0.0, 0.0, 1.0, 1.0); MAX_VERTICES / 6 + 10];
        renderer.render_fill_rects(&rects).unwrap();
        renderer.render_present();
        let total: i32 = renderer
            .backend()
            .calls()
            .iter()
            .filter_map(|c| match c {
                GpuCall::DrawArrays { count, .. } => Some(*count),
                _ => None,
            })
            .sum();
        assert_eq!(total as usize, rects.len() * 6);
    }

    #[test]
    fn streaming_lock_reflects_pitch_and_offset() {
        let mut renderer = new_renderer(100, 100);
        let tex = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Streaming, 8, 8)
            .unwrap();
        let (pixels, pitch) = renderer.lock_texture(tex, Rect::new(2, 1, 4, 4)).unwrap();
        assert_eq!(pitch, 32);
        // Window starts at row 1, column 2 of a 32-byte-pitch plane.
        assert_eq!(pixels.len(), 8 * 32 - (32 + 8));
    }

    #[test]
    fn locking_a_static_texture_is_an_error() {
        let mut renderer = new_renderer(100, 100);
        let tex = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Static, 8, 8)
            .unwrap();
        assert!(renderer.lock_texture(tex, Rect::new(0, 0, 8, 8)).is_err());
    }

    #[test]
    fn unlock_uploads_the_whole_texture() {
        let mut renderer = new_renderer(100, 100);
        let tex = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Streaming, 8, 8)
            .unwrap();
        renderer.backend_mut().clear_calls();
        renderer.unlock_texture(tex).unwrap();
        assert_eq!(
            renderer.backend().count(|c| matches!(
                c,
                GpuCall::TexSubImage2d { x: 0, y: 0, w: 8, h: 8, .. }
            )),
            1
        );
    }

    #[test]
    fn update_with_empty_rect_is_a_no_op() {
        let mut renderer = new_renderer(100, 100);
        let tex = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Static, 8, 8)
            .unwrap();
        renderer.backend_mut().clear_calls();
        renderer
            .update_texture(tex, Rect::new(0, 0, 0, 8), &[], 32)
            .unwrap();
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, GpuCall::TexSubImage2d { .. })),
            0
        );
    }

    #[test]
    fn planar_texture_owns_three_planes_and_uploads_in_format_order() {
        let mut renderer = new_renderer(100, 100);
        let tex = renderer
            .create_texture(PixelFormat::Yv12, TextureAccess::Static, 16, 16)
            .unwrap();
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, GpuCall::GenTexture(_))),
            3
        );
        // Chroma planes allocated at quarter resolution.
        assert_eq!(
            renderer.backend().count(|c| matches!(
                c,
                GpuCall::TexImage2d { layout: PlaneLayout::Luminance, w: 8, h: 8 }
            )),
            2
        );

        // Full-frame update: luma then two chroma planes.
        let pixels = vec![0u8; 16 * 16 * 3 / 2];
        renderer.backend_mut().clear_calls();
        renderer
            .update_texture(tex, Rect::new(0, 0, 16, 16), &pixels, 16)
            .unwrap();
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, GpuCall::TexSubImage2d { .. })),
            3
        );
    }

    #[test]
    fn nv12_texture_owns_two_planes_with_interleaved_chroma() {
        let mut renderer = new_renderer(100, 100);
        let _tex = renderer
            .create_texture(PixelFormat::Nv12, TextureAccess::Static, 16, 16)
            .unwrap();
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, GpuCall::GenTexture(_))),
            2
        );
        assert_eq!(
            renderer.backend().count(|c| matches!(
                c,
                GpuCall::TexImage2d { layout: PlaneLayout::LuminanceAlpha, w: 8, h: 8 }
            )),
            1
        );
    }

    #[test]
    fn destroying_a_batched_texture_flushes_first() {
        let mut renderer = new_renderer(100, 100);
        let tex = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Static, 8, 8)
            .unwrap();
        renderer.render_copy(tex, None, None).unwrap();
        assert!(renderer.texture_in_batch(tex));
        renderer.backend_mut().clear_calls();
        renderer.destroy_texture(tex).unwrap();
        let gpu = renderer.backend();
        // The batched quad was drawn before the planes were deleted.
        let draw = gpu
            .calls()
            .iter()
            .position(|c| matches!(c, GpuCall::DrawArrays { .. }));
        let delete = gpu
            .calls()
            .iter()
            .position(|c| matches!(c, GpuCall::DeleteTexture(_)));
        assert!(draw.unwrap() < delete.unwrap());
        // The handle is dead afterwards.
        assert!(renderer.render_copy(tex, None, None).is_err());
    }

    #[test]
    fn render_target_binds_the_pooled_fbo_and_checks_completeness() {
        let mut renderer = new_renderer(100, 100);
        let target = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Target, 32, 32)
            .unwrap();
        renderer.backend_mut().clear_calls();
        renderer.set_render_target(Some(target)).unwrap();
        let gpu = renderer.backend();
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::BindFramebuffer(_))), 1);
        assert_eq!(
            gpu.count(|c| matches!(c, GpuCall::FramebufferTexture2d(_))),
            1
        );
        // Back to the window framebuffer.
        renderer.set_render_target(None).unwrap();
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, GpuCall::BindFramebuffer(fbo) if fbo.0 == 0)),
            1
        );
    }

    #[test]
    fn same_size_targets_share_one_pooled_framebuffer() {
        let mut renderer = new_renderer(100, 100);
        let _a = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Target, 32, 32)
            .unwrap();
        let _b = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Target, 32, 32)
            .unwrap();
        let _c = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Target, 64, 32)
            .unwrap();
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, GpuCall::GenFramebuffer(_))),
            2
        );
    }

    #[test]
    fn target_projection_flips_y_against_the_window() {
        let window = ortho_projection(100.0, 50.0, false);
        let target = ortho_projection(100.0, 50.0, true);
        assert_eq!(window.y.y, -2.0 / 50.0);
        assert_eq!(target.y.y, 2.0 / 50.0);
        assert_eq!(window.w.y, 1.0);
        assert_eq!(target.w.y, -1.0);
        // The Z column is collapsed: 2D only.
        assert_eq!(window.z.z, 0.0);
    }

    #[test]
    fn copy_ex_batches_one_quad() {
        let mut renderer = new_renderer(100, 100);
        let tex = renderer
            .create_texture(PixelFormat::Abgr8888, TextureAccess::Static, 8, 8)
            .unwrap();
        renderer
            .render_copy_ex(
                tex,
                None,
                Some(FRect::new(10.0, 20.0, 40.0, 60.0)),
                90.0,
                None,
                Flip::NONE,
            )
            .unwrap();
        // Inspect the batched vertices through the flush upload size.
        assert_eq!(renderer.vertex_count(), 6);
        renderer.flush().unwrap();
        // One triangles draw with 6 vertices.
        assert_eq!(
            renderer.backend().count(|c| matches!(
                c,
                GpuCall::DrawArrays {
                    primitive: PrimitiveKind::Triangles,
                    count: 6,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn window_events_invalidate_the_context_and_minimize_finishes() {
        let mut renderer = new_renderer(100, 100);
        renderer.window_event(WindowEvent::Minimized);
        assert_eq!(renderer.backend().count(|c| matches!(c, GpuCall::Finish)), 1);

        renderer.window_event(WindowEvent::SizeChanged);
        renderer.backend_mut().clear_calls();
        renderer.render_clear().unwrap();
        // The next operation re-bound the context.
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, GpuCall::MakeCurrent)),
            1
        );
    }

    #[test]
    fn debug_mode_surfaces_polled_gpu_errors() {
        let mut renderer = Renderer::new(
            HeadlessBackend::new(64, 64),
            RendererOptions {
                debug: true,
                scale_filter: ScaleFilter::Nearest,
            },
        )
        .unwrap();
        renderer.backend_mut().pending_error = Some(crate::gpu::GpuErrorCode::InvalidOperation);
        let err = renderer
            .render_draw_points(&[FPoint::new(0.0, 0.0)])
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::GpuBackend {
                error: "GL_INVALID_OPERATION",
                ..
            }
        ));
    }

    #[test]
    fn read_pixels_flips_window_rows_and_converts() {
        let mut renderer = new_renderer(4, 4);
        renderer.set_draw_color(255, 0, 0, 255);
        renderer.render_clear().unwrap();
        let mut out = vec![0u8; 2 * 2 * 4];
        renderer
            .render_read_pixels(Rect::new(0, 0, 2, 2), PixelFormat::Argb8888, &mut out, 8)
            .unwrap();
        // Headless read-back returns the clear color; red in ARGB
        // packing is bytes B,G,R,A = 0,0,255,255.
        assert_eq!(&out[0..4], &[0, 0, 255, 255]);
        // The read used a Y-flipped origin for the window.
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, GpuCall::ReadPixels { y: 2, .. })),
            1
        );
    }
}
