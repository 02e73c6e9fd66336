//! Vertex arena and command log.
//!
//! Incoming draws append vertices to a fixed arena and either extend
//! the open command or start a new one. A command stays open while
//! consecutive draws share the same `(texture, blend, primitive)`
//! key; any key change, or a flush, seals it. Commands are replayed
//! in order at flush time, so submission order is preserved exactly.

use super::texture::TextureId;
use super::vertex::Vertex;
use super::BlendMode;
use crate::gpu::PrimitiveKind;

/// Arena capacity in vertices. The command log shares this bound
/// (one command can never be smaller than one vertex).
pub const MAX_VERTICES: usize = 3600;

/// Coalescing key: draws merge only when all three fields match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchKey {
    pub texture: Option<TextureId>,
    pub blend: BlendMode,
    pub primitive: PrimitiveKind,
}

/// One contiguous run of vertices drawn with a single state setup.
#[derive(Clone, Copy, Debug)]
pub struct DrawCommand {
    pub key: BatchKey,
    /// Index of the run's first vertex in the arena.
    pub first: i32,
    /// Number of vertices; grows while the command is open.
    pub count: i32,
}

/// The batch accumulated between two flushes.
pub struct Batch {
    vertices: Vec<Vertex>,
    commands: Vec<DrawCommand>,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            vertices: Vec::with_capacity(MAX_VERTICES),
            commands: Vec::new(),
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether `count` more vertices fit without flushing.
    #[inline]
    pub fn has_room_for(&self, count: usize) -> bool {
        self.vertices.len() + count <= MAX_VERTICES
    }

    /// Grows the open command by `count` vertices, or opens a new one
    /// when no command is open or `key` differs from the open one.
    /// Call before pushing the vertices themselves.
    pub fn append(&mut self, key: BatchKey, count: i32) {
        match self.commands.last_mut() {
            Some(open) if open.key == key => open.count += count,
            _ => {
                let first = self.vertices.len() as i32;
                self.commands.push(DrawCommand { key, first, count });
            }
        }
    }

    /// Writes one vertex at the current offset.
    #[inline]
    pub fn push(&mut self, vertex: Vertex) {
        debug_assert!(self.vertices.len() < MAX_VERTICES);
        self.vertices.push(vertex);
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Drops all accumulated vertices and commands.
    pub fn reset(&mut self) {
        self.vertices.clear();
        self.commands.clear();
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}
