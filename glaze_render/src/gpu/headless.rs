//! Recording backend for tests and headless operation.
//!
//! Every trait call appends a [`GpuCall`] to an in-order log that
//! tests inspect to assert which GPU work the core actually issued.
//! Object ids are handed out from monotonically increasing counters,
//! compiles and links succeed unless a failure is injected, and
//! `read_pixels` returns the last cleared color so readback paths
//! can be exercised without a GPU.

use cgmath::Matrix4;

use super::{
    BlendFactor, BufferObject, Capability, FramebufferObject, GpuBackend, GpuErrorCode,
    PlaneLayout, PrimitiveKind, ProgramObject, ScaleFilter, ShaderBinaryFormat, ShaderObject,
    ShaderStage, TextureObject, UniformLocation,
};
use crate::core::error::RenderResult;

/// One recorded GPU call. Bulky payloads are reduced to lengths.
#[derive(Clone, Debug, PartialEq)]
pub enum GpuCall {
    MakeCurrent,
    SwapWindow,
    Finish,
    GenTexture(TextureObject),
    DeleteTexture(TextureObject),
    ActiveTexture(u32),
    BindTexture(TextureObject),
    UnbindTexture,
    TexFiltering(ScaleFilter),
    TexImage2d {
        layout: PlaneLayout,
        w: u32,
        h: u32,
    },
    TexSubImage2d {
        layout: PlaneLayout,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
        len: usize,
    },
    SetPixelAlignment,
    ReadPixels {
        x: i32,
        y: i32,
        w: u32,
        h: u32,
    },
    GenFramebuffer(FramebufferObject),
    DeleteFramebuffer(FramebufferObject),
    BindFramebuffer(FramebufferObject),
    FramebufferTexture2d(TextureObject),
    CreateShader(ShaderObject, ShaderStage),
    DeleteShader(ShaderObject),
    CompileShader(ShaderObject),
    LoadShaderBinary(ShaderObject),
    CreateProgram(ProgramObject),
    DeleteProgram(ProgramObject),
    AttachShader {
        program: ProgramObject,
        shader: ShaderObject,
    },
    BindAttribLocation {
        index: u32,
        name: String,
    },
    LinkProgram(ProgramObject),
    UseProgram(ProgramObject),
    Uniform1i {
        location: UniformLocation,
        value: i32,
    },
    UniformMatrix4(UniformLocation),
    GenBuffer(BufferObject),
    DeleteBuffer(BufferObject),
    BindArrayBuffer(BufferObject),
    UnbindArrayBuffer,
    BufferData {
        len: usize,
    },
    BufferSubData {
        offset: usize,
        len: usize,
    },
    EnableVertexAttrib(u32),
    DisableVertexAttrib(u32),
    VertexAttribPointer {
        index: u32,
        components: i32,
        stride: usize,
        offset: usize,
    },
    DrawArrays {
        primitive: PrimitiveKind,
        first: i32,
        count: i32,
    },
    Viewport {
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    },
    Scissor {
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    },
    SetCapability {
        capability: Capability,
        enabled: bool,
    },
    ClearColor {
        r: f32,
        g: f32,
        b: f32,
        a: f32,
    },
    Clear,
    BlendFuncSeparate {
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    },
}

/// A backend that records instead of drawing.
pub struct HeadlessBackend {
    drawable: (u32, u32),
    calls: Vec<GpuCall>,
    next_id: u32,
    clear_color: [f32; 4],
    /// Queued error for the next `poll_error` (debug-mode testing).
    pub pending_error: Option<GpuErrorCode>,
    /// When set, the next `compile_shader` fails with this log.
    pub fail_next_compile: Option<String>,
    /// When set, the next `link_program` fails with this log.
    pub fail_next_link: Option<String>,
}

impl HeadlessBackend {
    /// Creates a backend with the given drawable size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            drawable: (width, height),
            calls: Vec::new(),
            next_id: 1,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            pending_error: None,
            fail_next_compile: None,
            fail_next_link: None,
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push(&mut self, call: GpuCall) {
        self.calls.push(call);
    }

    /// The call log, in submission order.
    pub fn calls(&self) -> &[GpuCall] {
        &self.calls
    }

    /// Clears the call log (e.g. after renderer setup noise).
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Counts log entries matching `pred`.
    pub fn count(&self, pred: impl Fn(&GpuCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    /// Changes the reported drawable size (window resize).
    pub fn set_drawable_size(&mut self, width: u32, height: u32) {
        self.drawable = (width, height);
    }
}

impl GpuBackend for HeadlessBackend {
    fn make_current(&mut self) -> RenderResult<()> {
        self.push(GpuCall::MakeCurrent);
        Ok(())
    }

    fn swap_window(&mut self) {
        self.push(GpuCall::SwapWindow);
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.drawable
    }

    fn window_framebuffer(&self) -> FramebufferObject {
        FramebufferObject(0)
    }

    fn finish(&mut self) {
        self.push(GpuCall::Finish);
    }

    fn poll_error(&mut self) -> Option<GpuErrorCode> {
        self.pending_error.take()
    }

    fn shader_formats(&self) -> Vec<ShaderBinaryFormat> {
        vec![ShaderBinaryFormat::Source]
    }

    fn gen_texture(&mut self) -> TextureObject {
        let tex = TextureObject(self.next_id());
        self.push(GpuCall::GenTexture(tex));
        tex
    }

    fn delete_texture(&mut self, texture: TextureObject) {
        self.push(GpuCall::DeleteTexture(texture));
    }

    fn active_texture(&mut self, unit: u32) {
        self.push(GpuCall::ActiveTexture(unit));
    }

    fn bind_texture(&mut self, texture: TextureObject) {
        self.push(GpuCall::BindTexture(texture));
    }

    fn unbind_texture(&mut self) {
        self.push(GpuCall::UnbindTexture);
    }

    fn tex_filtering(&mut self, filter: ScaleFilter) {
        self.push(GpuCall::TexFiltering(filter));
    }

    fn tex_image_2d(&mut self, layout: PlaneLayout, w: u32, h: u32) {
        self.push(GpuCall::TexImage2d { layout, w, h });
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
        self.push(GpuCall::TexSubImage2d {
            layout,
            x,
            y,
            w,
            h,
            len: pixels.len(),
        });
    }

    fn set_pixel_alignment(&mut self) {
        self.push(GpuCall::SetPixelAlignment);
    }

    fn read_pixels(&mut self, x: i32, y: i32, w: u32, h: u32, out: &mut [u8]) {
        self.push(GpuCall::ReadPixels { x, y, w, h });
        let texel = [
            (self.clear_color[0] * 255.0).round() as u8,
            (self.clear_color[1] * 255.0).round() as u8,
            (self.clear_color[2] * 255.0).round() as u8,
            (self.clear_color[3] * 255.0).round() as u8,
        ];
        for chunk in out.chunks_exact_mut(4) {
            chunk.copy_from_slice(&texel);
        }
    }

    fn gen_framebuffer(&mut self) -> FramebufferObject {
        let fbo = FramebufferObject(self.next_id());
        self.push(GpuCall::GenFramebuffer(fbo));
        fbo
    }

    fn delete_framebuffer(&mut self, fbo: FramebufferObject) {
        self.push(GpuCall::DeleteFramebuffer(fbo));
    }

    fn bind_framebuffer(&mut self, fbo: FramebufferObject) {
        self.push(GpuCall::BindFramebuffer(fbo));
    }

    fn framebuffer_texture_2d(&mut self, texture: TextureObject) {
        self.push(GpuCall::FramebufferTexture2d(texture));
    }

    fn framebuffer_complete(&mut self) -> bool {
        true
    }

    fn create_shader(&mut self, stage: ShaderStage) -> ShaderObject {
        let shader = ShaderObject(self.next_id());
        self.push(GpuCall::CreateShader(shader, stage));
        shader
    }

    fn delete_shader(&mut self, shader: ShaderObject) {
        self.push(GpuCall::DeleteShader(shader));
    }

    fn compile_shader(&mut self, shader: ShaderObject, _source: &str) -> Result<(), String> {
        self.push(GpuCall::CompileShader(shader));
        match self.fail_next_compile.take() {
            Some(log) => Err(log),
            None => Ok(()),
        }
    }

    fn load_shader_binary(
        &mut self,
        shader: ShaderObject,
        _format: u32,
        _payload: &[u8],
    ) -> Result<(), String> {
        self.push(GpuCall::LoadShaderBinary(shader));
        Ok(())
    }

    fn create_program(&mut self) -> ProgramObject {
        let program = ProgramObject(self.next_id());
        self.push(GpuCall::CreateProgram(program));
        program
    }

    fn delete_program(&mut self, program: ProgramObject) {
        self.push(GpuCall::DeleteProgram(program));
    }

    fn attach_shader(&mut self, program: ProgramObject, shader: ShaderObject) {
        self.push(GpuCall::AttachShader { program, shader });
    }

    fn bind_attrib_location(&mut self, _program: ProgramObject, index: u32, name: &str) {
        self.push(GpuCall::BindAttribLocation {
            index,
            name: name.to_owned(),
        });
    }

    fn link_program(&mut self, program: ProgramObject) -> Result<(), String> {
        self.push(GpuCall::LinkProgram(program));
        match self.fail_next_link.take() {
            Some(log) => Err(log),
            None => Ok(()),
        }
    }

    fn use_program(&mut self, program: ProgramObject) {
        self.push(GpuCall::UseProgram(program));
    }

    fn get_uniform_location(
        &mut self,
        program: ProgramObject,
        name: &str,
    ) -> Option<UniformLocation> {
        // Stable per-program, per-name locations like a real driver.
        let offset = match name {
            "u_projection" => 0,
            "u_texture" => 1,
            "u_texture_u" => 2,
            "u_texture_v" => 3,
            _ => return None,
        };
        Some(UniformLocation((program.0 * 16 + offset) as i32))
    }

    fn uniform1i(&mut self, location: UniformLocation, value: i32) {
        self.push(GpuCall::Uniform1i { location, value });
    }

    fn uniform_matrix4(&mut self, location: UniformLocation, _matrix: &Matrix4<f32>) {
        self.push(GpuCall::UniformMatrix4(location));
    }

    fn gen_buffer(&mut self) -> BufferObject {
        let buffer = BufferObject(self.next_id());
        self.push(GpuCall::GenBuffer(buffer));
        buffer
    }

    fn delete_buffer(&mut self, buffer: BufferObject) {
        self.push(GpuCall::DeleteBuffer(buffer));
    }

    fn bind_array_buffer(&mut self, buffer: BufferObject) {
        self.push(GpuCall::BindArrayBuffer(buffer));
    }

    fn unbind_array_buffer(&mut self) {
        self.push(GpuCall::UnbindArrayBuffer);
    }

    fn buffer_data(&mut self, len: usize) {
        self.push(GpuCall::BufferData { len });
    }

    fn buffer_sub_data(&mut self, offset: usize, data: &[u8]) {
        self.push(GpuCall::BufferSubData {
            offset,
            len: data.len(),
        });
    }

    fn enable_vertex_attrib(&mut self, index: u32) {
        self.push(GpuCall::EnableVertexAttrib(index));
    }

    fn disable_vertex_attrib(&mut self, index: u32) {
        self.push(GpuCall::DisableVertexAttrib(index));
    }

    fn vertex_attrib_pointer(&mut self, index: u32, components: i32, stride: usize, offset: usize) {
        self.push(GpuCall::VertexAttribPointer {
            index,
            components,
            stride,
            offset,
        });
    }

    fn draw_arrays(&mut self, primitive: PrimitiveKind, first: i32, count: i32) {
        self.push(GpuCall::DrawArrays {
            primitive,
            first,
            count,
        });
    }

    fn viewport(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.push(GpuCall::Viewport { x, y, w, h });
    }

    fn scissor(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.push(GpuCall::Scissor { x, y, w, h });
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        self.push(GpuCall::SetCapability {
            capability,
            enabled,
        });
    }

    fn blend_func_separate(
        &mut self,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        self.push(GpuCall::BlendFuncSeparate {
            src_rgb,
            dst_rgb,
            src_alpha,
            dst_alpha,
        });
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear_color = [r, g, b, a];
        self.push(GpuCall::ClearColor { r, g, b, a });
    }

    fn clear(&mut self) {
        self.push(GpuCall::Clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let mut gpu = HeadlessBackend::new(640, 480);
        let tex = gpu.gen_texture();
        gpu.bind_texture(tex);
        gpu.clear();
        assert_eq!(
            gpu.calls(),
            &[
                GpuCall::GenTexture(tex),
                GpuCall::BindTexture(tex),
                GpuCall::Clear,
            ]
        );
    }

    #[test]
    fn ids_are_unique() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let a = gpu.gen_texture();
        let b = gpu.gen_texture();
        let p = gpu.create_program();
        assert_ne!(a, b);
        assert_ne!(a.0, p.0);
    }

    #[test]
    fn injected_compile_failure_fires_once() {
        let mut gpu = HeadlessBackend::new(1, 1);
        gpu.fail_next_compile = Some("syntax error".into());
        let s = gpu.create_shader(ShaderStage::Fragment);
        assert!(gpu.compile_shader(s, "void main(){}").is_err());
        assert!(gpu.compile_shader(s, "void main(){}").is_ok());
    }

    #[test]
    fn read_pixels_returns_clear_color() {
        let mut gpu = HeadlessBackend::new(2, 2);
        gpu.clear_color(1.0, 0.0, 0.5, 1.0);
        let mut out = vec![0u8; 4];
        gpu.read_pixels(0, 0, 1, 1, &mut out);
        assert_eq!(out, vec![255, 0, 128, 255]);
    }

    #[test]
    fn uniform_locations_are_stable_per_program() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let p = gpu.create_program();
        let a = gpu.get_uniform_location(p, "u_projection");
        let b = gpu.get_uniform_location(p, "u_projection");
        assert_eq!(a, b);
        assert!(gpu.get_uniform_location(p, "u_bogus").is_none());
    }
}
