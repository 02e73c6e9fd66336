//! Windowed backend: a GLFW window with an OpenGL ES 2.0 context and
//! symbols loaded through the `gl` crate.
//!
//! Only this module touches `gl::*`; the renderer core sees the
//! [`GpuBackend`] trait. The ES-only luminance formats are defined
//! locally since the desktop binding set omits them.

use std::ffi::CString;
use std::ptr;

use cgmath::{Matrix, Matrix4};
use glfw::Context;

use super::{
    BlendFactor, BufferObject, Capability, FramebufferObject, GpuBackend, GpuErrorCode,
    PlaneLayout, PrimitiveKind, ProgramObject, ScaleFilter, ShaderBinaryFormat, ShaderObject,
    ShaderStage, TextureObject, UniformLocation,
};
use crate::core::error::{RenderError, RenderResult};

// ES 2.0 texel formats absent from the desktop core bindings.
const GL_LUMINANCE: u32 = 0x1909;
const GL_LUMINANCE_ALPHA: u32 = 0x190A;

/// Creation options for the windowed backend.
#[derive(Clone, Debug)]
pub struct WindowOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: "glaze".to_owned(),
            width: 800,
            height: 600,
            vsync: true,
        }
    }
}

/// GLFW-hosted OpenGL ES 2.0 backend.
pub struct GlWindowBackend {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    window_framebuffer: FramebufferObject,
    shader_formats: Vec<ShaderBinaryFormat>,
}

impl GlWindowBackend {
    /// Creates the window, binds an ES 2.0 context, and loads the GL
    /// symbols.
    pub fn new(options: WindowOptions) -> RenderResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|e| RenderError::InvalidState(format!("GLFW init failed: {e}")))?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::OpenGlEs));
        glfw.window_hint(glfw::WindowHint::ContextVersion(2, 0));

        let (mut window, events) = glfw
            .create_window(
                options.width,
                options.height,
                &options.title,
                glfw::WindowMode::Windowed,
            )
            .ok_or_else(|| RenderError::InvalidState("failed to create GLFW window".into()))?;

        window.set_framebuffer_size_polling(true);
        window.make_current();
        gl::load_with(|s| window.get_proc_address(s) as *const _);

        glfw.set_swap_interval(glfw::SwapInterval::Sync(u32::from(options.vsync)));

        // The framebuffer bound at creation is the window surface.
        let mut bound: i32 = 0;
        unsafe {
            gl::GetIntegerv(gl::FRAMEBUFFER_BINDING, &mut bound);
        }

        let shader_formats = unsafe { query_shader_formats() };

        log::info!(
            "GL window backend up: {}x{}, {} shader format(s)",
            options.width,
            options.height,
            shader_formats.len()
        );

        Ok(Self {
            glfw,
            window,
            events,
            window_framebuffer: FramebufferObject(bound as u32),
            shader_formats,
        })
    }

    /// Whether the user asked the window to close.
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Pumps pending window events, returning them for translation by
    /// the host.
    pub fn poll_events(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.poll_events();
        glfw::flush_messages(&self.events)
            .map(|(_, e)| e)
            .collect()
    }
}

/// Binary formats reported by the driver, with the source sentinel
/// appended when an online compiler is present.
unsafe fn query_shader_formats() -> Vec<ShaderBinaryFormat> {
    let mut count: i32 = 0;
    gl::GetIntegerv(gl::NUM_SHADER_BINARY_FORMATS, &mut count);
    let mut raw = vec![0i32; count.max(0) as usize];
    if count > 0 {
        gl::GetIntegerv(gl::SHADER_BINARY_FORMATS, raw.as_mut_ptr());
    }
    let mut formats: Vec<ShaderBinaryFormat> = raw
        .into_iter()
        .map(|f| ShaderBinaryFormat::Binary(f as u32))
        .collect();

    let mut has_compiler: u8 = 0;
    gl::GetBooleanv(gl::SHADER_COMPILER, &mut has_compiler);
    if has_compiler != 0 {
        formats.push(ShaderBinaryFormat::Source);
    }
    formats
}

fn plane_format(layout: PlaneLayout) -> u32 {
    match layout {
        PlaneLayout::Rgba => gl::RGBA,
        PlaneLayout::Luminance => GL_LUMINANCE,
        PlaneLayout::LuminanceAlpha => GL_LUMINANCE_ALPHA,
    }
}

fn primitive_mode(primitive: PrimitiveKind) -> u32 {
    match primitive {
        PrimitiveKind::Points => gl::POINTS,
        PrimitiveKind::Lines => gl::LINES,
        PrimitiveKind::Triangles => gl::TRIANGLES,
    }
}

fn blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => gl::ZERO,
        BlendFactor::One => gl::ONE,
        BlendFactor::SrcColor => gl::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => gl::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => gl::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => gl::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => gl::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => gl::ONE_MINUS_DST_ALPHA,
    }
}

/// Pulls the info log for a shader or program object.
unsafe fn object_info_log(id: u32, is_program: bool) -> String {
    let mut len: i32 = 0;
    if is_program {
        gl::GetProgramiv(id, gl::INFO_LOG_LENGTH, &mut len);
    } else {
        gl::GetShaderiv(id, gl::INFO_LOG_LENGTH, &mut len);
    }
    if len <= 1 {
        return String::new();
    }
    let mut buffer = vec![0u8; len as usize];
    let mut written: i32 = 0;
    if is_program {
        gl::GetProgramInfoLog(id, len, &mut written, buffer.as_mut_ptr() as *mut _);
    } else {
        gl::GetShaderInfoLog(id, len, &mut written, buffer.as_mut_ptr() as *mut _);
    }
    buffer.truncate(written.max(0) as usize);
    String::from_utf8_lossy(&buffer).into_owned()
}

impl GpuBackend for GlWindowBackend {
    fn make_current(&mut self) -> RenderResult<()> {
        self.window.make_current();
        Ok(())
    }

    fn swap_window(&mut self) {
        self.window.swap_buffers();
    }

    fn drawable_size(&self) -> (u32, u32) {
        let (w, h) = self.window.get_framebuffer_size();
        (w.max(0) as u32, h.max(0) as u32)
    }

    fn window_framebuffer(&self) -> FramebufferObject {
        self.window_framebuffer
    }

    fn finish(&mut self) {
        unsafe {
            gl::Finish();
        }
    }

    fn poll_error(&mut self) -> Option<GpuErrorCode> {
        let error = unsafe { gl::GetError() };
        match error {
            gl::NO_ERROR => None,
            gl::INVALID_ENUM => Some(GpuErrorCode::InvalidEnum),
            gl::INVALID_VALUE => Some(GpuErrorCode::InvalidValue),
            gl::INVALID_OPERATION => Some(GpuErrorCode::InvalidOperation),
            gl::INVALID_FRAMEBUFFER_OPERATION => Some(GpuErrorCode::InvalidFramebufferOperation),
            gl::OUT_OF_MEMORY => Some(GpuErrorCode::OutOfMemory),
            _ => Some(GpuErrorCode::Unknown),
        }
    }

    fn shader_formats(&self) -> Vec<ShaderBinaryFormat> {
        self.shader_formats.clone()
    }

    fn gen_texture(&mut self) -> TextureObject {
        let mut id = 0;
        unsafe {
            gl::GenTextures(1, &mut id);
        }
        TextureObject(id)
    }

    fn delete_texture(&mut self, texture: TextureObject) {
        unsafe {
            gl::DeleteTextures(1, &texture.0);
        }
    }

    fn active_texture(&mut self, unit: u32) {
        unsafe {
            gl::ActiveTexture(gl::TEXTURE0 + unit);
        }
    }

    fn bind_texture(&mut self, texture: TextureObject) {
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, texture.0);
        }
    }

    fn unbind_texture(&mut self) {
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, 0);
        }
    }

    fn tex_filtering(&mut self, filter: ScaleFilter) {
        let mode = match filter {
            ScaleFilter::Nearest => gl::NEAREST,
            ScaleFilter::Linear => gl::LINEAR,
        } as i32;
        unsafe {
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, mode);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, mode);
            gl::TexParameteri(
                gl::TEXTURE_2D,
                gl::TEXTURE_WRAP_S,
                gl::CLAMP_TO_EDGE as i32,
            );
            gl::TexParameteri(
                gl::TEXTURE_2D,
                gl::TEXTURE_WRAP_T,
                gl::CLAMP_TO_EDGE as i32,
            );
        }
    }

    fn tex_image_2d(&mut self, layout: PlaneLayout, w: u32, h: u32) {
        let format = plane_format(layout);
        unsafe {
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                format as i32,
                w as i32,
                h as i32,
                0,
                format,
                gl::UNSIGNED_BYTE,
                ptr::null(),
            );
        }
    }

    fn tex_sub_image_2d(
        &mut self,
        layout: PlaneLayout,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
        pixels: &[u8],
    ) {
        unsafe {
            gl::TexSubImage2D(
                gl::TEXTURE_2D,
                0,
                x,
                y,
                w as i32,
                h as i32,
                plane_format(layout),
                gl::UNSIGNED_BYTE,
                pixels.as_ptr() as *const _,
            );
        }
    }

    fn set_pixel_alignment(&mut self) {
        unsafe {
            gl::PixelStorei(gl::PACK_ALIGNMENT, 1);
            gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);
        }
    }

    fn read_pixels(&mut self, x: i32, y: i32, w: u32, h: u32, out: &mut [u8]) {
        debug_assert!(out.len() >= (w as usize) * (h as usize) * 4);
        unsafe {
            gl::ReadPixels(
                x,
                y,
                w as i32,
                h as i32,
                gl::RGBA,
                gl::UNSIGNED_BYTE,
                out.as_mut_ptr() as *mut _,
            );
        }
    }

    fn gen_framebuffer(&mut self) -> FramebufferObject {
        let mut id = 0;
        unsafe {
            gl::GenFramebuffers(1, &mut id);
        }
        FramebufferObject(id)
    }

    fn delete_framebuffer(&mut self, fbo: FramebufferObject) {
        unsafe {
            gl::DeleteFramebuffers(1, &fbo.0);
        }
    }

    fn bind_framebuffer(&mut self, fbo: FramebufferObject) {
        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, fbo.0);
        }
    }

    fn framebuffer_texture_2d(&mut self, texture: TextureObject) {
        unsafe {
            gl::FramebufferTexture2D(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                texture.0,
                0,
            );
        }
    }

    fn framebuffer_complete(&mut self) -> bool {
        unsafe { gl::CheckFramebufferStatus(gl::FRAMEBUFFER) == gl::FRAMEBUFFER_COMPLETE }
    }

    fn create_shader(&mut self, stage: ShaderStage) -> ShaderObject {
        let kind = match stage {
            ShaderStage::Vertex => gl::VERTEX_SHADER,
            ShaderStage::Fragment => gl::FRAGMENT_SHADER,
        };
        ShaderObject(unsafe { gl::CreateShader(kind) })
    }

    fn delete_shader(&mut self, shader: ShaderObject) {
        unsafe {
            gl::DeleteShader(shader.0);
        }
    }

    fn compile_shader(&mut self, shader: ShaderObject, source: &str) -> Result<(), String> {
        let c_source = CString::new(source).map_err(|_| "shader source contains NUL".to_owned())?;
        unsafe {
            gl::ShaderSource(shader.0, 1, &c_source.as_ptr(), ptr::null());
            gl::CompileShader(shader.0);

            let mut status = 0;
            gl::GetShaderiv(shader.0, gl::COMPILE_STATUS, &mut status);
            if status == gl::TRUE as i32 {
                Ok(())
            } else {
                Err(object_info_log(shader.0, false))
            }
        }
    }

    fn load_shader_binary(
        &mut self,
        shader: ShaderObject,
        format: u32,
        payload: &[u8],
    ) -> Result<(), String> {
        unsafe {
            gl::ShaderBinary(
                1,
                &shader.0,
                format,
                payload.as_ptr() as *const _,
                payload.len() as i32,
            );
        }
        Ok(())
    }

    fn create_program(&mut self) -> ProgramObject {
        ProgramObject(unsafe { gl::CreateProgram() })
    }

    fn delete_program(&mut self, program: ProgramObject) {
        unsafe {
            gl::DeleteProgram(program.0);
        }
    }

    fn attach_shader(&mut self, program: ProgramObject, shader: ShaderObject) {
        unsafe {
            gl::AttachShader(program.0, shader.0);
        }
    }

    fn bind_attrib_location(&mut self, program: ProgramObject, index: u32, name: &str) {
        if let Ok(c_name) = CString::new(name) {
            unsafe {
                gl::BindAttribLocation(program.0, index, c_name.as_ptr());
            }
        }
    }

    fn link_program(&mut self, program: ProgramObject) -> Result<(), String> {
        unsafe {
            gl::LinkProgram(program.0);
            let mut status = 0;
            gl::GetProgramiv(program.0, gl::LINK_STATUS, &mut status);
            if status == gl::TRUE as i32 {
                Ok(())
            } else {
                Err(object_info_log(program.0, true))
            }
        }
    }

    fn use_program(&mut self, program: ProgramObject) {
        unsafe {
            gl::UseProgram(program.0);
        }
    }

    fn get_uniform_location(
        &mut self,
        program: ProgramObject,
        name: &str,
    ) -> Option<UniformLocation> {
        let c_name = CString::new(name).ok()?;
        let location = unsafe { gl::GetUniformLocation(program.0, c_name.as_ptr()) };
        (location >= 0).then_some(UniformLocation(location))
    }

    fn uniform1i(&mut self, location: UniformLocation, value: i32) {
        unsafe {
            gl::Uniform1i(location.0, value);
        }
    }

    fn uniform_matrix4(&mut self, location: UniformLocation, matrix: &Matrix4<f32>) {
        unsafe {
            gl::UniformMatrix4fv(location.0, 1, gl::FALSE, matrix.as_ptr());
        }
    }

    fn gen_buffer(&mut self) -> BufferObject {
        let mut id = 0;
        unsafe {
            gl::GenBuffers(1, &mut id);
        }
        BufferObject(id)
    }

    fn delete_buffer(&mut self, buffer: BufferObject) {
        unsafe {
            gl::DeleteBuffers(1, &buffer.0);
        }
    }

    fn bind_array_buffer(&mut self, buffer: BufferObject) {
        unsafe {
            gl::BindBuffer(gl::ARRAY_BUFFER, buffer.0);
        }
    }

    fn unbind_array_buffer(&mut self) {
        unsafe {
            gl::BindBuffer(gl::ARRAY_BUFFER, 0);
        }
    }

    fn buffer_data(&mut self, len: usize) {
        unsafe {
            gl::BufferData(
                gl::ARRAY_BUFFER,
                len as isize,
                ptr::null(),
                gl::STREAM_DRAW,
            );
        }
    }

    fn buffer_sub_data(&mut self, offset: usize, data: &[u8]) {
        unsafe {
            gl::BufferSubData(
                gl::ARRAY_BUFFER,
                offset as isize,
                data.len() as isize,
                data.as_ptr() as *const _,
            );
        }
    }

    fn enable_vertex_attrib(&mut self, index: u32) {
        unsafe {
            gl::EnableVertexAttribArray(index);
        }
    }

    fn disable_vertex_attrib(&mut self, index: u32) {
        unsafe {
            gl::DisableVertexAttribArray(index);
        }
    }

    fn vertex_attrib_pointer(&mut self, index: u32, components: i32, stride: usize, offset: usize) {
        unsafe {
            gl::VertexAttribPointer(
                index,
                components,
                gl::FLOAT,
                gl::FALSE,
                stride as i32,
                offset as *const _,
            );
        }
    }

    fn draw_arrays(&mut self, primitive: PrimitiveKind, first: i32, count: i32) {
        unsafe {
            gl::DrawArrays(primitive_mode(primitive), first, count);
        }
    }

    fn viewport(&mut self, x: i32, y: i32, w: i32, h: i32) {
        unsafe {
            gl::Viewport(x, y, w, h);
        }
    }

    fn scissor(&mut self, x: i32, y: i32, w: i32, h: i32) {
        unsafe {
            gl::Scissor(x, y, w, h);
        }
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        let cap = match capability {
            Capability::Blend => gl::BLEND,
            Capability::ScissorTest => gl::SCISSOR_TEST,
        };
        unsafe {
            if enabled {
                gl::Enable(cap);
            } else {
                gl::Disable(cap);
            }
        }
    }

    fn blend_func_separate(
        &mut self,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        unsafe {
            gl::BlendFuncSeparate(
                blend_factor(src_rgb),
                blend_factor(dst_rgb),
                blend_factor(src_alpha),
                blend_factor(dst_alpha),
            );
        }
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        unsafe {
            gl::ClearColor(r, g, b, a);
        }
    }

    fn clear(&mut self) {
        unsafe {
            gl::Clear(gl::COLOR_BUFFER_BIT);
        }
    }
}
