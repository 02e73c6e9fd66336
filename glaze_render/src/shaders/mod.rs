//! GLSL ES shader catalog.
//!
//! Each logical shader kind maps to one or more deliverable
//! *instances*; an instance is either compile-ready source (the
//! common case) or a precompiled binary tagged with the platform
//! format token it was built for. The cache picks the first instance
//! whose format the platform reports.
//!
//! Rotation happens here, not on the CPU: the vertex shader rotates
//! every vertex around its per-vertex center by its per-vertex angle,
//! so the drawing adapters stay branch- and trig-free.

use crate::gpu::{ShaderBinaryFormat, ShaderStage};
use crate::render::BlendMode;

/// Logical shader identity, distinct from any GPU handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    VertexDefault,
    FragmentSolid,
    FragmentTextureAbgr,
    FragmentTextureArgb,
    FragmentTextureRgb,
    FragmentTextureBgr,
    FragmentTextureYuv,
    FragmentTextureNv12,
    FragmentTextureNv21,
}

impl ShaderKind {
    /// Pipeline stage this kind occupies.
    pub const fn stage(&self) -> ShaderStage {
        match self {
            ShaderKind::VertexDefault => ShaderStage::Vertex,
            _ => ShaderStage::Fragment,
        }
    }
}

/// Deliverable payload of a shader instance.
#[derive(Clone, Copy, Debug)]
pub enum ShaderPayload {
    Source(&'static str),
    Binary(&'static [u8]),
}

/// One deliverable build of a shader kind.
#[derive(Debug)]
pub struct ShaderInstance {
    pub stage: ShaderStage,
    pub format: ShaderBinaryFormat,
    pub payload: ShaderPayload,
}

/// A shader kind's instance list, in preference order.
#[derive(Debug)]
pub struct ShaderDescriptor {
    instances: &'static [&'static ShaderInstance],
}

impl ShaderDescriptor {
    /// Picks the first instance whose format the platform reports.
    pub fn select_instance(
        &self,
        platform_formats: &[ShaderBinaryFormat],
    ) -> Option<&'static ShaderInstance> {
        self.instances
            .iter()
            .copied()
            .find(|instance| platform_formats.contains(&instance.format))
    }
}

/// Looks up the catalog entry for `kind`. The blend mode is part of
/// the cache key but every current instance is blend-agnostic (the
/// blend equation is fixed-function state).
pub fn shader(kind: ShaderKind, _blend: BlendMode) -> &'static ShaderDescriptor {
    match kind {
        ShaderKind::VertexDefault => &VERTEX_DEFAULT,
        ShaderKind::FragmentSolid => &FRAGMENT_SOLID,
        ShaderKind::FragmentTextureAbgr => &FRAGMENT_TEXTURE_ABGR,
        ShaderKind::FragmentTextureArgb => &FRAGMENT_TEXTURE_ARGB,
        ShaderKind::FragmentTextureRgb => &FRAGMENT_TEXTURE_RGB,
        ShaderKind::FragmentTextureBgr => &FRAGMENT_TEXTURE_BGR,
        ShaderKind::FragmentTextureYuv => &FRAGMENT_TEXTURE_YUV,
        ShaderKind::FragmentTextureNv12 => &FRAGMENT_TEXTURE_NV12,
        ShaderKind::FragmentTextureNv21 => &FRAGMENT_TEXTURE_NV21,
    }
}

const VERTEX_DEFAULT_SRC: &str = r#"
uniform mat4 u_projection;
attribute vec2 a_position;
attribute vec2 a_texCoord;
attribute float a_angle;
attribute vec2 a_center;
attribute vec4 a_color;
varying vec2 v_texCoord;
varying vec4 v_color;

void main()
{
    float angle = radians(a_angle);
    float c = cos(angle);
    float s = sin(angle);
    mat2 rotation = mat2(c, s, -s, c);
    vec2 position = rotation * (a_position - a_center) + a_center;
    v_texCoord = a_texCoord;
    v_color = a_color;
    gl_Position = u_projection * vec4(position, 0.0, 1.0);
    gl_PointSize = 1.0;
}
"#;

const FRAGMENT_SOLID_SRC: &str = r#"
precision mediump float;
varying vec4 v_color;

void main()
{
    gl_FragColor = v_color;
}
"#;

const FRAGMENT_TEXTURE_ABGR_SRC: &str = r#"
precision mediump float;
uniform sampler2D u_texture;
varying vec2 v_texCoord;
varying vec4 v_color;

void main()
{
    gl_FragColor = texture2D(u_texture, v_texCoord);
    gl_FragColor *= v_color;
}
"#;

const FRAGMENT_TEXTURE_ARGB_SRC: &str = r#"
precision mediump float;
uniform sampler2D u_texture;
varying vec2 v_texCoord;
varying vec4 v_color;

void main()
{
    vec4 abgr = texture2D(u_texture, v_texCoord);
    gl_FragColor = abgr;
    gl_FragColor.r = abgr.b;
    gl_FragColor.b = abgr.r;
    gl_FragColor *= v_color;
}
"#;

const FRAGMENT_TEXTURE_RGB_SRC: &str = r#"
precision mediump float;
uniform sampler2D u_texture;
varying vec2 v_texCoord;
varying vec4 v_color;

void main()
{
    vec4 abgr = texture2D(u_texture, v_texCoord);
    gl_FragColor = abgr;
    gl_FragColor.r = abgr.b;
    gl_FragColor.b = abgr.r;
    gl_FragColor.a = 1.0;
    gl_FragColor *= v_color;
}
"#;

const FRAGMENT_TEXTURE_BGR_SRC: &str = r#"
precision mediump float;
uniform sampler2D u_texture;
varying vec2 v_texCoord;
varying vec4 v_color;

void main()
{
    gl_FragColor = texture2D(u_texture, v_texCoord);
    gl_FragColor.a = 1.0;
    gl_FragColor *= v_color;
}
"#;

const FRAGMENT_TEXTURE_YUV_SRC: &str = r#"
precision mediump float;
uniform sampler2D u_texture;
uniform sampler2D u_texture_u;
uniform sampler2D u_texture_v;
varying vec2 v_texCoord;
varying vec4 v_color;

void main()
{
    mediump vec3 yuv;
    lowp vec3 rgb;
    yuv.x = texture2D(u_texture, v_texCoord).r;
    yuv.y = texture2D(u_texture_u, v_texCoord).r - 0.5;
    yuv.z = texture2D(u_texture_v, v_texCoord).r - 0.5;
    rgb = mat3(1.0,      1.0,      1.0,
               0.0,     -0.39465,  2.03211,
               1.13983, -0.58060,  0.0) * yuv;
    gl_FragColor = vec4(rgb, 1.0);
    gl_FragColor *= v_color;
}
"#;

const FRAGMENT_TEXTURE_NV12_SRC: &str = r#"
precision mediump float;
uniform sampler2D u_texture;
uniform sampler2D u_texture_u;
varying vec2 v_texCoord;
varying vec4 v_color;

void main()
{
    mediump vec3 yuv;
    lowp vec3 rgb;
    yuv.x = texture2D(u_texture, v_texCoord).r;
    yuv.yz = texture2D(u_texture_u, v_texCoord).ra - 0.5;
    rgb = mat3(1.0,      1.0,      1.0,
               0.0,     -0.39465,  2.03211,
               1.13983, -0.58060,  0.0) * yuv;
    gl_FragColor = vec4(rgb, 1.0);
    gl_FragColor *= v_color;
}
"#;

const FRAGMENT_TEXTURE_NV21_SRC: &str = r#"
precision mediump float;
uniform sampler2D u_texture;
uniform sampler2D u_texture_u;
varying vec2 v_texCoord;
varying vec4 v_color;

void main()
{
    mediump vec3 yuv;
    lowp vec3 rgb;
    yuv.x = texture2D(u_texture, v_texCoord).r;
    yuv.yz = texture2D(u_texture_u, v_texCoord).ar - 0.5;
    rgb = mat3(1.0,      1.0,      1.0,
               0.0,     -0.39465,  2.03211,
               1.13983, -0.58060,  0.0) * yuv;
    gl_FragColor = vec4(rgb, 1.0);
    gl_FragColor *= v_color;
}
"#;

macro_rules! source_instance {
    ($name:ident, $stage:expr, $src:expr) => {
        static $name: ShaderInstance = ShaderInstance {
            stage: $stage,
            format: ShaderBinaryFormat::Source,
            payload: ShaderPayload::Source($src),
        };
    };
}

source_instance!(VERTEX_DEFAULT_INSTANCE, ShaderStage::Vertex, VERTEX_DEFAULT_SRC);
source_instance!(FRAGMENT_SOLID_INSTANCE, ShaderStage::Fragment, FRAGMENT_SOLID_SRC);
source_instance!(
    FRAGMENT_TEXTURE_ABGR_INSTANCE,
    ShaderStage::Fragment,
    FRAGMENT_TEXTURE_ABGR_SRC
);
source_instance!(
    FRAGMENT_TEXTURE_ARGB_INSTANCE,
    ShaderStage::Fragment,
    FRAGMENT_TEXTURE_ARGB_SRC
);
source_instance!(
    FRAGMENT_TEXTURE_RGB_INSTANCE,
    ShaderStage::Fragment,
    FRAGMENT_TEXTURE_RGB_SRC
);
source_instance!(
    FRAGMENT_TEXTURE_BGR_INSTANCE,
    ShaderStage::Fragment,
    FRAGMENT_TEXTURE_BGR_SRC
);
source_instance!(
    FRAGMENT_TEXTURE_YUV_INSTANCE,
    ShaderStage::Fragment,
    FRAGMENT_TEXTURE_YUV_SRC
);
source_instance!(
    FRAGMENT_TEXTURE_NV12_INSTANCE,
    ShaderStage::Fragment,
    FRAGMENT_TEXTURE_NV12_SRC
);
source_instance!(
    FRAGMENT_TEXTURE_NV21_INSTANCE,
    ShaderStage::Fragment,
    FRAGMENT_TEXTURE_NV21_SRC
);

static VERTEX_DEFAULT: ShaderDescriptor = ShaderDescriptor {
    instances: &[&VERTEX_DEFAULT_INSTANCE],
};
static FRAGMENT_SOLID: ShaderDescriptor = ShaderDescriptor {
    instances: &[&FRAGMENT_SOLID_INSTANCE],
};
static FRAGMENT_TEXTURE_ABGR: ShaderDescriptor = ShaderDescriptor {
    instances: &[&FRAGMENT_TEXTURE_ABGR_INSTANCE],
};
static FRAGMENT_TEXTURE_ARGB: ShaderDescriptor = ShaderDescriptor {
    instances: &[&FRAGMENT_TEXTURE_ARGB_INSTANCE],
};
static FRAGMENT_TEXTURE_RGB: ShaderDescriptor = ShaderDescriptor {
    instances: &[&FRAGMENT_TEXTURE_RGB_INSTANCE],
};
static FRAGMENT_TEXTURE_BGR: ShaderDescriptor = ShaderDescriptor {
    instances: &[&FRAGMENT_TEXTURE_BGR_INSTANCE],
};
static FRAGMENT_TEXTURE_YUV: ShaderDescriptor = ShaderDescriptor {
    instances: &[&FRAGMENT_TEXTURE_YUV_INSTANCE],
};
static FRAGMENT_TEXTURE_NV12: ShaderDescriptor = ShaderDescriptor {
    instances: &[&FRAGMENT_TEXTURE_NV12_INSTANCE],
};
static FRAGMENT_TEXTURE_NV21: ShaderDescriptor = ShaderDescriptor {
    instances: &[&FRAGMENT_TEXTURE_NV21_INSTANCE],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_resolves_with_a_source_compiler() {
        let formats = [ShaderBinaryFormat::Source];
        for kind in [
            ShaderKind::VertexDefault,
            ShaderKind::FragmentSolid,
            ShaderKind::FragmentTextureAbgr,
            ShaderKind::FragmentTextureArgb,
            ShaderKind::FragmentTextureRgb,
            ShaderKind::FragmentTextureBgr,
            ShaderKind::FragmentTextureYuv,
            ShaderKind::FragmentTextureNv12,
            ShaderKind::FragmentTextureNv21,
        ] {
            let instance = shader(kind, BlendMode::None)
                .select_instance(&formats)
                .unwrap();
            assert_eq!(instance.stage, kind.stage());
        }
    }

    #[test]
    fn no_instance_without_matching_format() {
        let formats = [ShaderBinaryFormat::Binary(0x1234)];
        assert!(shader(ShaderKind::FragmentSolid, BlendMode::None)
            .select_instance(&formats)
            .is_none());
    }

    #[test]
    fn vertex_shader_binds_the_frozen_attribute_names() {
        for name in ["a_position", "a_texCoord", "a_angle", "a_center", "a_color"] {
            assert!(VERTEX_DEFAULT_SRC.contains(name), "missing {name}");
        }
    }

    #[test]
    fn planar_yuv_samples_three_units() {
        assert!(FRAGMENT_TEXTURE_YUV_SRC.contains("u_texture_u"));
        assert!(FRAGMENT_TEXTURE_YUV_SRC.contains("u_texture_v"));
        // Semi-planar kinds read interleaved chroma from unit 1 only.
        assert!(!FRAGMENT_TEXTURE_NV12_SRC.contains("u_texture_v"));
        assert!(!FRAGMENT_TEXTURE_NV21_SRC.contains("u_texture_v"));
    }
}
