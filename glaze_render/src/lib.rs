//! glaze-render: a batched 2D renderer core for shader-only GPU
//! pipelines (OpenGL ES 2.0 class).
//!
//! The host 2D API feeds drawing requests (clear, points, lines,
//! filled rects, textured copies with rotation and mirroring, pixel
//! readback) into [`render::Renderer`], which coalesces them into
//! runs of compatible draws over a pre-allocated vertex arena and
//! replays them against a [`gpu::GpuBackend`] — the GPU function
//! table resolved at creation. Shader objects and linked programs
//! are cached and reference-counted; redundant GPU state changes are
//! elided.
//!
//! Two backends ship with the crate:
//!
//! - [`gpu::headless::HeadlessBackend`] records every GPU call,
//!   for tests and headless hosts.
//! - `gpu::gl::GlWindowBackend` (feature `gl-window`) drives a GLFW
//!   window with a real ES 2.0 context.
//!
//! ```no_run
//! use glaze_render::gpu::headless::HeadlessBackend;
//! use glaze_render::render::{Renderer, RendererOptions};
//! use glaze_render::FRect;
//!
//! let gpu = HeadlessBackend::new(640, 480);
//! let mut renderer = Renderer::new(gpu, RendererOptions::default())?;
//! renderer.set_draw_color(255, 0, 0, 255);
//! renderer.render_clear()?;
//! renderer.render_fill_rects(&[FRect::new(10.0, 10.0, 64.0, 64.0)])?;
//! renderer.render_present();
//! # Ok::<(), glaze_render::RenderError>(())
//! ```

pub mod core;
pub mod gpu;
pub mod logger;
pub mod render;
pub mod shaders;

pub use crate::core::error::{RenderError, RenderResult};
pub use crate::core::math::{FPoint, FRect, Rect};
pub use crate::render::{
    BlendMode, Flip, PixelFormat, Renderer, RendererOptions, TextureAccess, TextureId,
    WindowEvent,
};
