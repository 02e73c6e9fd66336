//! Program cache: linked shader pairs, most-recently-used first.
//!
//! Lookup keys on the identity of the two shader-cache slots. A hit
//! moves the entry to the front; a miss links a new program, binds
//! the frozen attribute locations, resolves the four uniforms, and
//! seeds the sampler units once. Overflowing the capacity evicts the
//! least-recently-used entry, dropping its hold on both shaders.

use cgmath::{Matrix4, Zero};

use crate::core::error::{record, RenderError, RenderResult};
use crate::gpu::{GpuBackend, ProgramObject, UniformLocation};

use super::shader::{ShaderCache, ShaderSlot};
use super::vertex::ATTRIBUTES;
use super::BlendMode;

/// Cache capacity; the tail beyond this is evicted.
pub(crate) const MAX_CACHED_PROGRAMS: usize = 8;

/// Indices into a program's uniform-location table.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Uniform {
    Projection = 0,
    Texture = 1,
    TextureU = 2,
    TextureV = 3,
}

pub(crate) struct ProgramCacheEntry {
    pub id: ProgramObject,
    #[allow(dead_code)]
    pub blend: BlendMode,
    pub vertex_shader: ShaderSlot,
    pub fragment_shader: ShaderSlot,
    pub uniforms: [Option<UniformLocation>; 4],
    /// Last projection uploaded to this program.
    pub projection: Matrix4<f32>,
}

pub(crate) struct ProgramCache {
    /// MRU order: index 0 is the most recently selected program.
    entries: Vec<ProgramCacheEntry>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(MAX_CACHED_PROGRAMS),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, id: ProgramObject) -> Option<&ProgramCacheEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: ProgramObject) -> Option<&mut ProgramCacheEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    #[cfg(test)]
    pub fn head(&self) -> Option<&ProgramCacheEntry> {
        self.entries.first()
    }

    /// Returns the program for `(vertex, fragment)`, linking one on
    /// miss. The returned program sits at the head afterwards.
    pub fn select<B: GpuBackend>(
        &mut self,
        gpu: &mut B,
        shaders: &mut ShaderCache,
        vertex: ShaderSlot,
        fragment: ShaderSlot,
        blend: BlendMode,
    ) -> RenderResult<ProgramObject> {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.vertex_shader == vertex && e.fragment_shader == fragment)
        {
            if pos != 0 {
                let entry = self.entries.remove(pos);
                self.entries.insert(0, entry);
            }
            return Ok(self.entries[0].id);
        }

        let vertex_id = shaders
            .entry(vertex)
            .ok_or_else(|| record(RenderError::InvalidState("vertex shader not cached".into())))?
            .id;
        let fragment_id = shaders
            .entry(fragment)
            .ok_or_else(|| {
                record(RenderError::InvalidState("fragment shader not cached".into()))
            })?
            .id;

        let id = gpu.create_program();
        gpu.attach_shader(id, vertex_id);
        gpu.attach_shader(id, fragment_id);
        for attr in &ATTRIBUTES {
            gpu.bind_attrib_location(id, attr.index, attr.name);
        }
        if let Err(info_log) = gpu.link_program(id) {
            gpu.delete_program(id);
            log::error!("program link failed: {info_log}");
            return Err(record(RenderError::ProgramLinkFailed(info_log)));
        }

        let uniforms = [
            gpu.get_uniform_location(id, "u_projection"),
            gpu.get_uniform_location(id, "u_texture"),
            gpu.get_uniform_location(id, "u_texture_u"),
            gpu.get_uniform_location(id, "u_texture_v"),
        ];

        // Sampler units never change per program; seed them once.
        gpu.use_program(id);
        if let Some(loc) = uniforms[Uniform::TextureV as usize] {
            gpu.uniform1i(loc, 2);
        }
        if let Some(loc) = uniforms[Uniform::TextureU as usize] {
            gpu.uniform1i(loc, 1);
        }
        if let Some(loc) = uniforms[Uniform::Texture as usize] {
            gpu.uniform1i(loc, 0);
        }
        let projection = Matrix4::zero();
        if let Some(loc) = uniforms[Uniform::Projection as usize] {
            gpu.uniform_matrix4(loc, &projection);
        }

        shaders.add_ref(vertex);
        shaders.add_ref(fragment);
        self.entries.insert(
            0,
            ProgramCacheEntry {
                id,
                blend,
                vertex_shader: vertex,
                fragment_shader: fragment,
                uniforms,
                projection,
            },
        );

        if self.entries.len() > MAX_CACHED_PROGRAMS {
            if let Some(tail) = self.entries.pop() {
                shaders.release(gpu, tail.vertex_shader);
                shaders.release(gpu, tail.fragment_shader);
                gpu.delete_program(tail.id);
            }
        }

        Ok(id)
    }

    /// Deletes every cached program (renderer teardown).
    pub fn drain<B: GpuBackend>(&mut self, gpu: &mut B) {
        for entry in self.entries.drain(..) {
            gpu.delete_program(entry.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{GpuCall, HeadlessBackend};
    use crate::gpu::ShaderObject;
    use crate::shaders::ShaderKind;

    fn synthetic_pair(
        cache: &mut ShaderCache,
        next_id: &mut u32,
    ) -> (ShaderSlot, ShaderSlot) {
        let v = cache.insert_for_test(ShaderObject(*next_id), ShaderKind::VertexDefault);
        let f = cache.insert_for_test(ShaderObject(*next_id + 1), ShaderKind::FragmentSolid);
        *next_id += 2;
        (v, f)
    }

    #[test]
    fn hit_moves_entry_to_head_without_relinking() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let mut shaders = ShaderCache::new();
        let mut programs = ProgramCache::new();
        let mut id = 1000;
        let (v, f) = synthetic_pair(&mut shaders, &mut id);
        let (v2, f2) = synthetic_pair(&mut shaders, &mut id);

        let p1 = programs.select(&mut gpu, &mut shaders, v, f, BlendMode::None).unwrap();
        let p2 = programs.select(&mut gpu, &mut shaders, v2, f2, BlendMode::None).unwrap();
        assert_ne!(p1, p2);
        assert_eq!(programs.head().unwrap().id, p2);

        let links = gpu.count(|c| matches!(c, GpuCall::LinkProgram(_)));
        let again = programs.select(&mut gpu, &mut shaders, v, f, BlendMode::None).unwrap();
        assert_eq!(again, p1);
        assert_eq!(programs.head().unwrap().id, p1);
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::LinkProgram(_))), links);
    }

    #[test]
    fn attributes_are_bound_and_units_seeded_on_link() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let mut shaders = ShaderCache::new();
        let mut programs = ProgramCache::new();
        let mut id = 1000;
        let (v, f) = synthetic_pair(&mut shaders, &mut id);
        programs.select(&mut gpu, &mut shaders, v, f, BlendMode::None).unwrap();

        for name in ["a_position", "a_texCoord", "a_angle", "a_center", "a_color"] {
            assert_eq!(
                gpu.count(|c| matches!(c, GpuCall::BindAttribLocation { name: n, .. } if n == name)),
                1
            );
        }
        // Units 0, 1, 2 seeded once each.
        for unit in 0..3 {
            assert_eq!(
                gpu.count(|c| matches!(c, GpuCall::Uniform1i { value, .. } if *value == unit)),
                1
            );
        }
    }

    #[test]
    fn capacity_overflow_evicts_the_tail_and_its_shader_holds() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let mut shaders = ShaderCache::new();
        let mut programs = ProgramCache::new();
        let mut id = 1000;

        let mut pairs = Vec::new();
        for _ in 0..(MAX_CACHED_PROGRAMS + 1) {
            pairs.push(synthetic_pair(&mut shaders, &mut id));
        }

        let mut program_ids = Vec::new();
        for (v, f) in &pairs {
            program_ids.push(
                programs
                    .select(&mut gpu, &mut shaders, *v, *f, BlendMode::None)
                    .unwrap(),
            );
        }

        assert_eq!(programs.len(), MAX_CACHED_PROGRAMS);
        // The first-created pair fell off the tail.
        let first = program_ids[0];
        assert!(programs.entry(first).is_none());
        assert_eq!(
            gpu.count(|c| matches!(c, GpuCall::DeleteProgram(p) if *p == first)),
            1
        );
        // Its shaders hit zero references and were deleted.
        let (v0, f0) = pairs[0];
        assert!(shaders.entry(v0).is_none());
        assert!(shaders.entry(f0).is_none());
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::DeleteShader(_))), 2);
    }

    #[test]
    fn shared_shaders_survive_eviction_of_one_holder() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let mut shaders = ShaderCache::new();
        let mut programs = ProgramCache::new();

        // One vertex shader shared by every program.
        let shared_v = shaders.insert_for_test(ShaderObject(1), ShaderKind::VertexDefault);
        let mut frags = Vec::new();
        for i in 0..(MAX_CACHED_PROGRAMS + 1) as u32 {
            frags.push(shaders.insert_for_test(ShaderObject(100 + i), ShaderKind::FragmentSolid));
        }

        for f in &frags {
            programs
                .select(&mut gpu, &mut shaders, shared_v, *f, BlendMode::None)
                .unwrap();
        }

        // Evicting one holder decremented the shared vertex shader but
        // left it alive for the remaining eight programs.
        assert_eq!(shaders.references(shared_v), Some(MAX_CACHED_PROGRAMS as i32));
        assert!(shaders.entry(shared_v).is_some());
        // The evicted program's fragment shader is gone.
        assert!(shaders.entry(frags[0]).is_none());
    }

    #[test]
    fn refcounts_equal_holder_count() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let mut shaders = ShaderCache::new();
        let mut programs = ProgramCache::new();

        let v = shaders.insert_for_test(ShaderObject(1), ShaderKind::VertexDefault);
        let f1 = shaders.insert_for_test(ShaderObject(2), ShaderKind::FragmentSolid);
        let f2 = shaders.insert_for_test(ShaderObject(3), ShaderKind::FragmentTextureAbgr);

        programs.select(&mut gpu, &mut shaders, v, f1, BlendMode::None).unwrap();
        programs.select(&mut gpu, &mut shaders, v, f2, BlendMode::None).unwrap();

        assert_eq!(shaders.references(v), Some(2));
        assert_eq!(shaders.references(f1), Some(1));
        assert_eq!(shaders.references(f2), Some(1));
    }

    #[test]
    fn link_failure_deletes_the_program_and_keeps_the_cache_clean() {
        let mut gpu = HeadlessBackend::new(1, 1);
        gpu.fail_next_link = Some("varying mismatch".into());
        let mut shaders = ShaderCache::new();
        let mut programs = ProgramCache::new();
        let mut id = 1000;
        let (v, f) = synthetic_pair(&mut shaders, &mut id);

        let err = programs
            .select(&mut gpu, &mut shaders, v, f, BlendMode::None)
            .unwrap_err();
        assert!(matches!(err, RenderError::ProgramLinkFailed(_)));
        assert_eq!(programs.len(), 0);
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::DeleteProgram(_))), 1);
        // No reference was taken on either shader.
        assert_eq!(shaders.references(v), Some(0));
        assert_eq!(shaders.references(f), Some(0));
    }
}
