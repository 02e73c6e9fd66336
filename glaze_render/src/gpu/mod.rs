//! The GPU function table.
//!
//! Every GPU primitive the renderer core touches goes through the
//! [`GpuBackend`] trait, resolved once at renderer creation. This
//! keeps the core platform-neutral: the windowed implementation
//! ([`gl::GlWindowBackend`], feature `gl-window`) forwards to loaded
//! GL symbols, while [`headless::HeadlessBackend`] records every call
//! for tests and headless use.
//!
//! The method set is deliberately the GLES2 subset the core needs;
//! no method here allocates on the core's behalf beyond the object
//! id it returns.

use cgmath::Matrix4;

use crate::core::error::RenderResult;

pub mod headless;

#[cfg(feature = "gl-window")]
pub mod gl;

/// GPU-side texture object id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureObject(pub u32);

/// GPU-side framebuffer object id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferObject(pub u32);

/// GPU-side shader object id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderObject(pub u32);

/// GPU-side program object id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramObject(pub u32);

/// GPU-side buffer object id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferObject(pub u32);

/// Uniform location within a linked program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub i32);

/// Primitive kind for array draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Points,
    Lines,
    Triangles,
}

/// Texel layout of one GPU texture plane.
///
/// RGBA-family logical formats upload as `Rgba` (channel order is a
/// fragment-shader concern); Y/U/V planes upload as `Luminance`; the
/// interleaved chroma plane of NV12/NV21 as `LuminanceAlpha`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaneLayout {
    Rgba,
    Luminance,
    LuminanceAlpha,
}

impl PlaneLayout {
    /// Bytes per texel for this layout.
    #[inline]
    pub const fn bytes_per_texel(&self) -> usize {
        match self {
            PlaneLayout::Rgba => 4,
            PlaneLayout::Luminance => 1,
            PlaneLayout::LuminanceAlpha => 2,
        }
    }
}

/// Shader pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Payload format a shader instance is delivered in. `Source` is the
/// sentinel for compile-from-text; `Binary` carries the platform's
/// reported binary-format token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderBinaryFormat {
    Source,
    Binary(u32),
}

/// Blend factor for `blend_func_separate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Toggleable raster capabilities the core manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Blend,
    ScissorTest,
}

/// Texture sampling filter applied to every plane of a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScaleFilter {
    Nearest,
    Linear,
}

/// A polled GPU error, translated to its constant name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GpuErrorCode {
    InvalidEnum,
    InvalidValue,
    InvalidOperation,
    InvalidFramebufferOperation,
    OutOfMemory,
    Unknown,
}

impl GpuErrorCode {
    /// The GL constant name for logging and error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            GpuErrorCode::InvalidEnum => "GL_INVALID_ENUM",
            GpuErrorCode::InvalidValue => "GL_INVALID_VALUE",
            GpuErrorCode::InvalidOperation => "GL_INVALID_OPERATION",
            GpuErrorCode::InvalidFramebufferOperation => "GL_INVALID_FRAMEBUFFER_OPERATION",
            GpuErrorCode::OutOfMemory => "GL_OUT_OF_MEMORY",
            GpuErrorCode::Unknown => "UNKNOWN",
        }
    }
}

/// The resolved GPU function table.
///
/// All methods must be called from the thread that created the
/// backend; the GPU context is strictly single-threaded and no
/// implementation adds locking.
pub trait GpuBackend {
    // Context & window surface.

    /// Binds the GPU context to the calling thread / window surface.
    fn make_current(&mut self) -> RenderResult<()>;

    /// Presents the back buffer.
    fn swap_window(&mut self);

    /// Current drawable size in pixels.
    fn drawable_size(&self) -> (u32, u32);

    /// The framebuffer object that was bound at context creation;
    /// rebinding it targets the window again.
    fn window_framebuffer(&self) -> FramebufferObject;

    /// Blocking drain of all submitted GPU work.
    fn finish(&mut self);

    /// Polls one pending GPU error, if any.
    fn poll_error(&mut self) -> Option<GpuErrorCode>;

    /// Shader payload formats this platform accepts, in preference
    /// order. Contains [`ShaderBinaryFormat::Source`] when an online
    /// compiler is present.
    fn shader_formats(&self) -> Vec<ShaderBinaryFormat>;

    // Textures. Texture targets are always 2D; `bind_texture`
    // affects the currently active unit.

    fn gen_texture(&mut self) -> TextureObject;
    fn delete_texture(&mut self, texture: TextureObject);
    fn active_texture(&mut self, unit: u32);
    fn bind_texture(&mut self, texture: TextureObject);
    fn unbind_texture(&mut self);

    /// Applies min/mag filtering plus clamp-to-edge wrap on the
    /// texture bound to the active unit.
    fn tex_filtering(&mut self, filter: ScaleFilter);

    /// Allocates storage for the bound texture (no initial pixels).
    fn tex_image_2d(&mut self, layout: PlaneLayout, w: u32, h: u32);

    /// Uploads a tightly packed sub-rectangle into the bound texture.
    fn tex_sub_image_2d(
        &mut self,
        layout: PlaneLayout,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
        pixels: &[u8],
    );

    /// Sets pack/unpack alignment to 1 (byte-tight rows).
    fn set_pixel_alignment(&mut self);

    /// Reads back RGBA8 pixels from the bound framebuffer.
    /// `out.len()` must be `w * h * 4`.
    fn read_pixels(&mut self, x: i32, y: i32, w: u32, h: u32, out: &mut [u8]);

    // Framebuffers.

    fn gen_framebuffer(&mut self) -> FramebufferObject;
    fn delete_framebuffer(&mut self, fbo: FramebufferObject);
    fn bind_framebuffer(&mut self, fbo: FramebufferObject);

    /// Attaches `texture` at color attachment 0 of the bound FBO.
    fn framebuffer_texture_2d(&mut self, texture: TextureObject);

    /// Completeness check of the bound framebuffer.
    fn framebuffer_complete(&mut self) -> bool;

    // Shaders & programs.

    fn create_shader(&mut self, stage: ShaderStage) -> ShaderObject;
    fn delete_shader(&mut self, shader: ShaderObject);

    /// Compiles `source` into `shader`; `Err` carries the info log
    /// when the backend could obtain one.
    fn compile_shader(&mut self, shader: ShaderObject, source: &str) -> Result<(), String>;

    /// Loads a precompiled payload into `shader`.
    fn load_shader_binary(
        &mut self,
        shader: ShaderObject,
        format: u32,
        payload: &[u8],
    ) -> Result<(), String>;

    fn create_program(&mut self) -> ProgramObject;
    fn delete_program(&mut self, program: ProgramObject);
    fn attach_shader(&mut self, program: ProgramObject, shader: ShaderObject);
    fn bind_attrib_location(&mut self, program: ProgramObject, index: u32, name: &str);

    /// Links `program`; `Err` carries the info log when available.
    fn link_program(&mut self, program: ProgramObject) -> Result<(), String>;

    fn use_program(&mut self, program: ProgramObject);
    fn get_uniform_location(&mut self, program: ProgramObject, name: &str)
        -> Option<UniformLocation>;
    fn uniform1i(&mut self, location: UniformLocation, value: i32);
    fn uniform_matrix4(&mut self, location: UniformLocation, matrix: &Matrix4<f32>);

    // Vertex streams.

    fn gen_buffer(&mut self) -> BufferObject;
    fn delete_buffer(&mut self, buffer: BufferObject);
    fn bind_array_buffer(&mut self, buffer: BufferObject);
    fn unbind_array_buffer(&mut self);

    /// Allocates `len` bytes of stream-draw storage for the bound
    /// array buffer.
    fn buffer_data(&mut self, len: usize);

    /// Uploads `data` at `offset` into the bound array buffer.
    fn buffer_sub_data(&mut self, offset: usize, data: &[u8]);

    fn enable_vertex_attrib(&mut self, index: u32);
    fn disable_vertex_attrib(&mut self, index: u32);

    /// Points attribute `index` at `components` floats with the given
    /// stride and byte offset (client-side offset when no buffer is
    /// bound).
    fn vertex_attrib_pointer(&mut self, index: u32, components: i32, stride: usize, offset: usize);

    // Raster state & draws.

    fn draw_arrays(&mut self, primitive: PrimitiveKind, first: i32, count: i32);
    fn viewport(&mut self, x: i32, y: i32, w: i32, h: i32);
    fn scissor(&mut self, x: i32, y: i32, w: i32, h: i32);
    fn set_capability(&mut self, capability: Capability, enabled: bool);
    fn blend_func_separate(
        &mut self,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    );
    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32);
    fn clear(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_layout_texel_sizes() {
        assert_eq!(PlaneLayout::Rgba.bytes_per_texel(), 4);
        assert_eq!(PlaneLayout::Luminance.bytes_per_texel(), 1);
        assert_eq!(PlaneLayout::LuminanceAlpha.bytes_per_texel(), 2);
    }

    #[test]
    fn gpu_error_names() {
        assert_eq!(GpuErrorCode::OutOfMemory.name(), "GL_OUT_OF_MEMORY");
        assert_eq!(GpuErrorCode::Unknown.name(), "UNKNOWN");
    }

    #[test]
    fn object_ids_are_comparable() {
        assert_eq!(TextureObject(3), TextureObject(3));
        assert_ne!(ProgramObject(1), ProgramObject(2));
    }
}
