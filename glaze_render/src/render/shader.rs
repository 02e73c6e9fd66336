//! Shader cache.
//!
//! Entries live in a slot arena addressed by generational handles, so
//! program-cache entries can hold stable references to their two
//! shaders without ownership. Each entry counts the programs holding
//! it; eviction happens only when that count returns to zero under
//! program-cache pressure.

use std::ptr;

use crate::core::error::{record, RenderError, RenderResult};
use crate::core::handle::{Handle, HandleAllocator};
use crate::gpu::{GpuBackend, ShaderBinaryFormat, ShaderObject};
use crate::shaders::{self, ShaderInstance, ShaderKind, ShaderPayload};

use super::texture::PixelFormat;
use super::BlendMode;

/// Marker type for shader-cache slots.
pub(crate) struct ShaderSlotMarker;

/// Stable identity of a cached shader.
pub(crate) type ShaderSlot = Handle<ShaderSlotMarker>;

pub(crate) struct ShaderCacheEntry {
    pub id: ShaderObject,
    #[allow(dead_code)]
    pub kind: ShaderKind,
    pub instance: &'static ShaderInstance,
    /// Number of cached programs holding this shader.
    pub references: i32,
}

pub(crate) struct ShaderCache {
    allocator: HandleAllocator<ShaderSlotMarker>,
    entries: Vec<Option<(ShaderSlot, ShaderCacheEntry)>>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self {
            allocator: HandleAllocator::new(),
            entries: Vec::new(),
        }
    }

    pub fn entry(&self, slot: ShaderSlot) -> Option<&ShaderCacheEntry> {
        self.entries
            .get(slot.index() as usize)
            .and_then(|e| e.as_ref())
            .filter(|(stored, _)| *stored == slot)
            .map(|(_, entry)| entry)
    }

    fn entry_mut(&mut self, slot: ShaderSlot) -> Option<&mut ShaderCacheEntry> {
        self.entries
            .get_mut(slot.index() as usize)
            .and_then(|e| e.as_mut())
            .filter(|(stored, _)| *stored == slot)
            .map(|(_, entry)| entry)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// Resolves `kind` to a cached shader, compiling or loading it on
    /// miss. The selected instance is the first one whose delivery
    /// format the platform reports.
    pub fn cache<B: GpuBackend>(
        &mut self,
        gpu: &mut B,
        kind: ShaderKind,
        blend: BlendMode,
        platform_formats: &[ShaderBinaryFormat],
    ) -> RenderResult<ShaderSlot> {
        let descriptor = shaders::shader(kind, blend);
        let instance = descriptor.select_instance(platform_formats).ok_or_else(|| {
            record(RenderError::UnsupportedFormat(
                "no shader instance is loadable on this platform".into(),
            ))
        })?;

        // Instances are interned statics, so pointer identity is the
        // dedup key.
        for (slot, entry) in self.entries.iter().flatten() {
            if ptr::eq(entry.instance, instance) {
                return Ok(*slot);
            }
        }

        let id = gpu.create_shader(instance.stage);
        let built = match (&instance.payload, instance.format) {
            (ShaderPayload::Source(source), _) => gpu.compile_shader(id, source),
            (ShaderPayload::Binary(data), ShaderBinaryFormat::Binary(format)) => {
                gpu.load_shader_binary(id, format, data)
            }
            (ShaderPayload::Binary(_), ShaderBinaryFormat::Source) => {
                Err("binary shader payload tagged as source".to_owned())
            }
        };
        if let Err(info_log) = built {
            gpu.delete_shader(id);
            log::error!("shader build failed for {kind:?}: {info_log}");
            return Err(record(RenderError::ShaderCompileFailed(info_log)));
        }

        let slot = self.allocator.allocate();
        let index = slot.index() as usize;
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index] = Some((
            slot,
            ShaderCacheEntry {
                id,
                kind,
                instance,
                references: 0,
            },
        ));
        Ok(slot)
    }

    /// Records one more program holding `slot`.
    pub fn add_ref(&mut self, slot: ShaderSlot) {
        if let Some(entry) = self.entry_mut(slot) {
            entry.references += 1;
        }
    }

    /// Drops one program's hold on `slot`; evicts at zero.
    pub fn release<B: GpuBackend>(&mut self, gpu: &mut B, slot: ShaderSlot) {
        let evict = match self.entry_mut(slot) {
            Some(entry) => {
                entry.references -= 1;
                entry.references <= 0
            }
            None => false,
        };
        if evict {
            self.evict(gpu, slot);
        }
    }

    /// Evicts `slot` only when no program references it. Used on the
    /// select-program fault path for freshly cached shaders.
    pub fn evict_if_unreferenced<B: GpuBackend>(&mut self, gpu: &mut B, slot: ShaderSlot) {
        if self
            .entry(slot)
            .is_some_and(|entry| entry.references <= 0)
        {
            self.evict(gpu, slot);
        }
    }

    fn evict<B: GpuBackend>(&mut self, gpu: &mut B, slot: ShaderSlot) {
        let index = slot.index() as usize;
        let matches = self.entries.get(index).is_some_and(|e| {
            e.as_ref()
                .is_some_and(|(stored, _)| *stored == slot)
        });
        if matches {
            if let Some((_, entry)) = self.entries[index].take() {
                gpu.delete_shader(entry.id);
            }
            self.allocator.deallocate(slot);
        }
    }

    /// Deletes every cached shader (renderer teardown).
    pub fn drain<B: GpuBackend>(&mut self, gpu: &mut B) {
        for slot_entry in self.entries.iter_mut() {
            if let Some((_, entry)) = slot_entry.take() {
                gpu.delete_shader(entry.id);
            }
        }
    }

    #[cfg(test)]
    pub fn references(&self, slot: ShaderSlot) -> Option<i32> {
        self.entry(slot).map(|e| e.references)
    }

    /// Test-only: inserts an entry without compiling, so cache-policy
    /// tests can mint arbitrarily many distinct shader identities.
    #[cfg(test)]
    pub fn insert_for_test(&mut self, id: ShaderObject, kind: ShaderKind) -> ShaderSlot {
        let instance = shaders::shader(kind, BlendMode::None)
            .select_instance(&[ShaderBinaryFormat::Source])
            .unwrap();
        let slot = self.allocator.allocate();
        let index = slot.index() as usize;
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index] = Some((
            slot,
            ShaderCacheEntry {
                id,
                kind,
                instance,
                references: 0,
            },
        ));
        slot
    }
}

/// Fragment kind for copying `texture_format` into the current
/// target. Matching formats use the non-swizzling kind; cross-format
/// combinations pick the kind whose sampled channel order matches the
/// destination layout; YUV sources always use their dedicated kinds.
pub(crate) fn copy_fragment_kind(
    texture_format: PixelFormat,
    target_format: Option<PixelFormat>,
) -> ShaderKind {
    use PixelFormat::*;
    use ShaderKind::*;

    match target_format {
        Some(target) if target != texture_format => match texture_format {
            Argb8888 => match target {
                Abgr8888 | Bgr888 => FragmentTextureArgb,
                _ => FragmentTextureAbgr,
            },
            Abgr8888 => match target {
                Argb8888 | Rgb888 => FragmentTextureArgb,
                _ => FragmentTextureAbgr,
            },
            Rgb888 => match target {
                Argb8888 => FragmentTextureBgr,
                Abgr8888 | Bgr888 => FragmentTextureArgb,
                _ => FragmentTextureAbgr,
            },
            Bgr888 => match target {
                Abgr8888 => FragmentTextureBgr,
                Argb8888 => FragmentTextureRgb,
                Rgb888 => FragmentTextureArgb,
                _ => FragmentTextureAbgr,
            },
            Iyuv | Yv12 => FragmentTextureYuv,
            Nv12 => FragmentTextureNv12,
            Nv21 => FragmentTextureNv21,
        },
        Some(_) => FragmentTextureAbgr,
        None => match texture_format {
            Argb8888 => FragmentTextureArgb,
            Abgr8888 => FragmentTextureAbgr,
            Rgb888 => FragmentTextureRgb,
            Bgr888 => FragmentTextureBgr,
            Iyuv | Yv12 => FragmentTextureYuv,
            Nv12 => FragmentTextureNv12,
            Nv21 => FragmentTextureNv21,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{GpuCall, HeadlessBackend};

    fn formats() -> Vec<ShaderBinaryFormat> {
        vec![ShaderBinaryFormat::Source]
    }

    #[test]
    fn cache_hit_returns_the_same_slot_without_recompiling() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let mut cache = ShaderCache::new();
        let a = cache
            .cache(&mut gpu, ShaderKind::FragmentSolid, BlendMode::None, &formats())
            .unwrap();
        let compile_count = gpu.count(|c| matches!(c, GpuCall::CompileShader(_)));
        let b = cache
            .cache(&mut gpu, ShaderKind::FragmentSolid, BlendMode::Blend, &formats())
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            gpu.count(|c| matches!(c, GpuCall::CompileShader(_))),
            compile_count
        );
    }

    #[test]
    fn compile_failure_is_reported_and_nothing_is_inserted() {
        let mut gpu = HeadlessBackend::new(1, 1);
        gpu.fail_next_compile = Some("0:1: bad token".into());
        let mut cache = ShaderCache::new();
        let err = cache
            .cache(&mut gpu, ShaderKind::FragmentSolid, BlendMode::None, &formats())
            .unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompileFailed(ref log) if log.contains("bad token")));
        assert_eq!(cache.len(), 0);
        // The failed object was deleted.
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::DeleteShader(_))), 1);
    }

    #[test]
    fn unsupported_platform_formats_error_before_touching_the_gpu() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let mut cache = ShaderCache::new();
        let err = cache
            .cache(
                &mut gpu,
                ShaderKind::FragmentSolid,
                BlendMode::None,
                &[ShaderBinaryFormat::Binary(7)],
            )
            .unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedFormat(_)));
        assert!(gpu.calls().is_empty());
    }

    #[test]
    fn release_evicts_at_zero_references() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let mut cache = ShaderCache::new();
        let slot = cache
            .cache(&mut gpu, ShaderKind::VertexDefault, BlendMode::None, &formats())
            .unwrap();
        cache.add_ref(slot);
        cache.add_ref(slot);
        cache.release(&mut gpu, slot);
        assert_eq!(cache.references(slot), Some(1));
        cache.release(&mut gpu, slot);
        assert!(cache.entry(slot).is_none());
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::DeleteShader(_))), 1);
    }

    #[test]
    fn evict_if_unreferenced_spares_held_shaders() {
        let mut gpu = HeadlessBackend::new(1, 1);
        let mut cache = ShaderCache::new();
        let slot = cache
            .cache(&mut gpu, ShaderKind::VertexDefault, BlendMode::None, &formats())
            .unwrap();
        cache.add_ref(slot);
        cache.evict_if_unreferenced(&mut gpu, slot);
        assert!(cache.entry(slot).is_some());
    }

    #[test]
    fn same_format_copies_use_the_identity_kind() {
        for format in [
            PixelFormat::Argb8888,
            PixelFormat::Abgr8888,
            PixelFormat::Rgb888,
            PixelFormat::Bgr888,
        ] {
            assert_eq!(
                copy_fragment_kind(format, Some(format)),
                ShaderKind::FragmentTextureAbgr
            );
        }
    }

    #[test]
    fn window_copies_use_the_per_format_kind() {
        assert_eq!(
            copy_fragment_kind(PixelFormat::Argb8888, None),
            ShaderKind::FragmentTextureArgb
        );
        assert_eq!(
            copy_fragment_kind(PixelFormat::Abgr8888, None),
            ShaderKind::FragmentTextureAbgr
        );
        assert_eq!(
            copy_fragment_kind(PixelFormat::Rgb888, None),
            ShaderKind::FragmentTextureRgb
        );
        assert_eq!(
            copy_fragment_kind(PixelFormat::Bgr888, None),
            ShaderKind::FragmentTextureBgr
        );
    }

    #[test]
    fn cross_format_copies_swizzle() {
        use PixelFormat::*;
        use ShaderKind::*;
        assert_eq!(copy_fragment_kind(Argb8888, Some(Abgr8888)), FragmentTextureArgb);
        assert_eq!(copy_fragment_kind(Argb8888, Some(Rgb888)), FragmentTextureAbgr);
        assert_eq!(copy_fragment_kind(Abgr8888, Some(Argb8888)), FragmentTextureArgb);
        assert_eq!(copy_fragment_kind(Abgr8888, Some(Bgr888)), FragmentTextureAbgr);
        assert_eq!(copy_fragment_kind(Rgb888, Some(Argb8888)), FragmentTextureBgr);
        assert_eq!(copy_fragment_kind(Bgr888, Some(Argb8888)), FragmentTextureRgb);
        assert_eq!(copy_fragment_kind(Bgr888, Some(Abgr8888)), FragmentTextureBgr);
    }

    #[test]
    fn yuv_sources_keep_their_kind_under_any_target() {
        use PixelFormat::*;
        use ShaderKind::*;
        assert_eq!(copy_fragment_kind(Iyuv, None), FragmentTextureYuv);
        assert_eq!(copy_fragment_kind(Yv12, Some(Abgr8888)), FragmentTextureYuv);
        assert_eq!(copy_fragment_kind(Nv12, Some(Argb8888)), FragmentTextureNv12);
        assert_eq!(copy_fragment_kind(Nv21, None), FragmentTextureNv21);
    }
}
