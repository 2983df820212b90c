//! Visuals: user-facing bundles of pipelines, typed data sources and
//! per-item props, with the default bake (prop -> source staging) and fill
//! (draw recording) protocols.

use ash::vk;

use crate::binding::Bindings;
use crate::command::Commands;
use crate::error::{Error, Result};
use crate::gpu::Gpu;
use crate::pipeline::{Compute, Graphics};
use crate::resource::{Buffer, BufferRegions};

pub const MAX_GRAPHICS_PER_VISUAL: usize = 16;
pub const MAX_COMPUTES_PER_VISUAL: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    D1,
    D2,
    D3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Vertex,
    Index,
    Uniform,
    Storage,
    Texture(TextureKind),
}

impl SourceKind {
    fn buffer_usage(self) -> Option<vk::BufferUsageFlags> {
        match self {
            SourceKind::Vertex => Some(vk::BufferUsageFlags::VERTEX_BUFFER),
            SourceKind::Index => Some(vk::BufferUsageFlags::INDEX_BUFFER),
            SourceKind::Uniform => Some(vk::BufferUsageFlags::UNIFORM_BUFFER),
            SourceKind::Storage => Some(vk::BufferUsageFlags::STORAGE_BUFFER),
            SourceKind::Texture(_) => None,
        }
    }
}

/// Identifies a source within a visual, together with the pipeline index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Mvp,
    Viewport,
    Param,
    Vertex,
    Index,
    Texture(u32),
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    /// GPU buffer handled by the library; filled by `bake`.
    Lib,
    /// GPU buffer handled by the user; staging skipped entirely.
    User,
    /// Library-owned buffer, but the user provides baked data directly.
    NoBake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyType {
    /// Clamp to the last prop item when the source is longer than the prop.
    Single,
    /// Cycle through the prop items.
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    Pos,
    Color,
    Normal,
    Texcoords,
    MarkerSize,
    Length,
    LightPos,
    LightParams,
    Model,
    View,
    Proj,
    Time,
    Index,
    Other(u32),
}

/// Densely packed array of `item_size`-byte structs, the staging target of
/// the bake protocol.
pub struct SourceArray {
    item_size: usize,
    data: Vec<u8>,
}

impl SourceArray {
    pub fn new(item_size: usize) -> SourceArray {
        SourceArray {
            item_size,
            data: Vec::new(),
        }
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn item_count(&self) -> usize {
        if self.item_size == 0 {
            0
        } else {
            self.data.len() / self.item_size
        }
    }

    pub fn resize(&mut self, item_count: usize) {
        self.data.resize(item_count * self.item_size, 0);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Writes `bytes` into item `item_idx` at byte `offset` within the item.
    fn write_field(&mut self, item_idx: usize, offset: usize, bytes: &[u8]) {
        let start = item_idx * self.item_size + offset;
        debug_assert!(start + bytes.len() <= self.data.len());
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

pub struct Source {
    pub source_type: SourceType,
    pub kind: SourceKind,
    pub pipeline_idx: usize,
    pub slot_idx: usize,
    pub origin: SourceOrigin,
    array: SourceArray,
    /// Item count for `User`/`NoBake` sources whose data bypasses staging.
    user_count: usize,
    buffer: Option<Buffer>,
    regions: Option<BufferRegions>,
}

impl Source {
    pub fn item_count(&self) -> usize {
        match self.origin {
            SourceOrigin::Lib => self.array.item_count(),
            _ => self.user_count,
        }
    }

    pub fn regions(&self) -> Option<&BufferRegions> {
        self.regions.as_ref()
    }

    pub fn array(&self) -> &SourceArray {
        &self.array
    }
}

pub struct Prop {
    pub prop_type: PropType,
    pub prop_idx: usize,
    pub source_type: SourceType,
    pub pipeline_idx: usize,
    pub offset: usize,
    pub copy_type: CopyType,
    pub reps: usize,
    item_size: usize,
    count: usize,
    data: Vec<u8>,
}

impl Prop {
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Default staging: the source's item count is the maximum effective count
/// over its props (`count * reps`); each prop is interleaved at its byte
/// offset with reps-fold expansion.
fn stage_source(array: &mut SourceArray, props: &[&Prop]) -> usize {
    let item_count = props
        .iter()
        .map(|p| p.count * p.reps.max(1))
        .max()
        .unwrap_or(0);
    array.resize(item_count);
    for prop in props {
        if prop.count == 0 || prop.item_size == 0 {
            continue;
        }
        let reps = prop.reps.max(1);
        for item in 0..item_count {
            let src = match prop.copy_type {
                CopyType::Single => (item / reps).min(prop.count - 1),
                CopyType::Repeat => (item / reps) % prop.count,
            };
            let bytes = &prop.data[src * prop.item_size..(src + 1) * prop.item_size];
            array.write_field(item, prop.offset, bytes);
        }
    }
    item_count
}

/// Outcome of a bake pass; `need_refill` is set when a vertex or index count
/// changed, which invalidates recorded draw commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct BakeOutcome {
    pub need_refill: bool,
}

type FillCallback = Box<dyn FnMut(&mut Visual, &Commands, usize) -> Result<()>>;
type BakeCallback = Box<dyn FnMut(&mut Visual) -> Result<()>>;

/// A bundle of graphics/compute pipelines with their sources and props,
/// rendered into a canvas's command buffers.
pub struct Visual {
    gpu: Gpu,
    graphics: Vec<Graphics>,
    graphics_bindings: Vec<Option<Bindings>>,
    computes: Vec<Compute>,
    sources: Vec<Source>,
    props: Vec<Prop>,
    prev_vertex_count: Vec<usize>,
    prev_index_count: Vec<usize>,
    fill_callback: Option<FillCallback>,
    bake_callback: Option<BakeCallback>,
}

impl Visual {
    pub fn new(gpu: &Gpu) -> Visual {
        Visual {
            gpu: gpu.clone(),
            graphics: Vec::new(),
            graphics_bindings: Vec::new(),
            computes: Vec::new(),
            sources: Vec::new(),
            props: Vec::new(),
            prev_vertex_count: Vec::new(),
            prev_index_count: Vec::new(),
            fill_callback: None,
            bake_callback: None,
        }
    }

    /// Appends a graphics pipeline; returns its pipeline index.
    pub fn graphics(&mut self, graphics: Graphics) -> Result<usize> {
        if self.graphics.len() >= MAX_GRAPHICS_PER_VISUAL {
            return Err(Error::CapacityExceeded {
                what: "graphics pipelines per visual",
                max: MAX_GRAPHICS_PER_VISUAL,
            });
        }
        self.graphics.push(graphics);
        self.graphics_bindings.push(None);
        self.prev_vertex_count.push(0);
        self.prev_index_count.push(0);
        Ok(self.graphics.len() - 1)
    }

    pub fn compute(&mut self, compute: Compute) -> Result<usize> {
        if self.computes.len() >= MAX_COMPUTES_PER_VISUAL {
            return Err(Error::CapacityExceeded {
                what: "compute pipelines per visual",
                max: MAX_COMPUTES_PER_VISUAL,
            });
        }
        self.computes.push(compute);
        Ok(self.computes.len() - 1)
    }

    pub fn bindings(&mut self, pipeline_idx: usize, bindings: Bindings) -> Result<()> {
        let slot = self
            .graphics_bindings
            .get_mut(pipeline_idx)
            .ok_or(Error::InvalidIndex {
                what: "pipeline",
                index: pipeline_idx,
                count: self.graphics.len(),
            })?;
        *slot = Some(bindings);
        Ok(())
    }

    pub fn graphics_pipeline(&self, pipeline_idx: usize) -> Option<&Graphics> {
        self.graphics.get(pipeline_idx)
    }

    /// Declares a data source. A source is identified by
    /// `(source_type, pipeline_idx)`.
    pub fn source(
        &mut self,
        source_type: SourceType,
        kind: SourceKind,
        pipeline_idx: usize,
        slot_idx: usize,
        item_size: usize,
        origin: SourceOrigin,
    ) -> Result<()> {
        if self.find_source(source_type, pipeline_idx).is_some() {
            return Err(Error::AlreadyCreated("source already declared"));
        }
        self.sources.push(Source {
            source_type,
            kind,
            pipeline_idx,
            slot_idx,
            origin,
            array: SourceArray::new(item_size),
            user_count: 0,
            buffer: None,
            regions: None,
        });
        Ok(())
    }

    /// Declares a prop routed to one source field.
    #[allow(clippy::too_many_arguments)]
    pub fn prop(
        &mut self,
        prop_type: PropType,
        prop_idx: usize,
        source_type: SourceType,
        pipeline_idx: usize,
        offset: usize,
        item_size: usize,
    ) -> Result<()> {
        if self.find_source(source_type, pipeline_idx).is_none() {
            return Err(Error::NotConfigured("prop routed to unknown source"));
        }
        self.props.push(Prop {
            prop_type,
            prop_idx,
            source_type,
            pipeline_idx,
            offset,
            copy_type: CopyType::Single,
            reps: 1,
            item_size,
            count: 0,
            data: Vec::new(),
        });
        Ok(())
    }

    /// Adjusts the copy policy of a declared prop.
    pub fn prop_copy(
        &mut self,
        prop_type: PropType,
        prop_idx: usize,
        copy_type: CopyType,
        reps: usize,
    ) -> Result<()> {
        let prop = self
            .props
            .iter_mut()
            .find(|p| p.prop_type == prop_type && p.prop_idx == prop_idx)
            .ok_or(Error::NotConfigured("unknown prop"))?;
        prop.copy_type = copy_type;
        prop.reps = reps.max(1);
        Ok(())
    }

    /// Sets the per-item data of a prop.
    pub fn prop_data<T: Copy>(
        &mut self,
        prop_type: PropType,
        prop_idx: usize,
        data: &[T],
    ) -> Result<()> {
        let prop = self
            .props
            .iter_mut()
            .find(|p| p.prop_type == prop_type && p.prop_idx == prop_idx)
            .ok_or(Error::NotConfigured("unknown prop"))?;
        let bytes = unsafe {
            std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data))
        };
        if prop.item_size == 0 || bytes.len() % prop.item_size != 0 {
            return Err(Error::InvalidIndex {
                what: "prop data bytes",
                index: bytes.len(),
                count: prop.item_size,
            });
        }
        prop.count = bytes.len() / prop.item_size;
        prop.data = bytes.to_vec();
        Ok(())
    }

    /// Hands a user-managed buffer region to a `User`/`NoBake` source.
    pub fn buffer(
        &mut self,
        source_type: SourceType,
        pipeline_idx: usize,
        regions: BufferRegions,
        item_count: usize,
    ) -> Result<()> {
        let source = self
            .find_source_mut(source_type, pipeline_idx)
            .ok_or(Error::NotConfigured("unknown source"))?;
        source.regions = Some(regions);
        source.user_count = item_count;
        Ok(())
    }

    pub fn source_ref(&self, source_type: SourceType, pipeline_idx: usize) -> Option<&Source> {
        self.find_source(source_type, pipeline_idx)
    }

    fn find_source(&self, source_type: SourceType, pipeline_idx: usize) -> Option<&Source> {
        self.sources
            .iter()
            .find(|s| s.source_type == source_type && s.pipeline_idx == pipeline_idx)
    }

    fn find_source_mut(
        &mut self,
        source_type: SourceType,
        pipeline_idx: usize,
    ) -> Option<&mut Source> {
        self.sources
            .iter_mut()
            .find(|s| s.source_type == source_type && s.pipeline_idx == pipeline_idx)
    }

    /// Custom callbacks override the default fill/bake protocols.
    pub fn fill_callback(
        &mut self,
        cb: impl FnMut(&mut Visual, &Commands, usize) -> Result<()> + 'static,
    ) {
        self.fill_callback = Some(Box::new(cb));
    }

    pub fn bake_callback(&mut self, cb: impl FnMut(&mut Visual) -> Result<()> + 'static) {
        self.bake_callback = Some(Box::new(cb));
    }

    pub fn vertex_count(&self, pipeline_idx: usize) -> usize {
        self.find_source(SourceType::Vertex, pipeline_idx)
            .map(|s| s.item_count())
            .unwrap_or(0)
    }

    pub fn index_count(&self, pipeline_idx: usize) -> usize {
        self.find_source(SourceType::Index, pipeline_idx)
            .map(|s| s.item_count())
            .unwrap_or(0)
    }

    /// Host-side staging only: interleaves every prop into its source array.
    /// Detects vertex/index count changes since the previous pass.
    pub fn stage(&mut self) -> BakeOutcome {
        for source in self.sources.iter_mut() {
            if source.origin != SourceOrigin::Lib {
                continue;
            }
            if matches!(source.kind, SourceKind::Texture(_)) {
                continue;
            }
            let props: Vec<&Prop> = self
                .props
                .iter()
                .filter(|p| {
                    p.source_type == source.source_type && p.pipeline_idx == source.pipeline_idx
                })
                .collect();
            stage_source(&mut source.array, &props);
        }

        let mut need_refill = false;
        for pipeline_idx in 0..self.graphics.len() {
            let vertex_count = self.vertex_count(pipeline_idx);
            let index_count = self.index_count(pipeline_idx);
            if vertex_count != self.prev_vertex_count[pipeline_idx]
                || index_count != self.prev_index_count[pipeline_idx]
            {
                need_refill = true;
            }
            self.prev_vertex_count[pipeline_idx] = vertex_count;
            self.prev_index_count[pipeline_idx] = index_count;
        }
        BakeOutcome { need_refill }
    }

    /// Full bake: stage, then (re)allocate and upload every library-origin
    /// buffer source. Returns whether the canvas must refill its command
    /// buffers.
    pub fn bake(&mut self) -> Result<BakeOutcome> {
        if let Some(mut cb) = self.bake_callback.take() {
            let result = cb(self);
            self.bake_callback = Some(cb);
            result?;
            return Ok(BakeOutcome::default());
        }

        let outcome = self.stage();
        for source in self.sources.iter_mut() {
            if source.origin == SourceOrigin::User {
                continue;
            }
            let Some(usage) = source.kind.buffer_usage() else {
                continue;
            };
            let bytes = source.array.as_bytes();
            if bytes.is_empty() {
                continue;
            }
            let needs_alloc = source
                .buffer
                .as_ref()
                .map(|b| b.byte_size() < bytes.len() as u64)
                .unwrap_or(true);
            if needs_alloc {
                let mut buffer = Buffer::new(&self.gpu);
                buffer.size(bytes.len() as u64, source.array.item_size() as u64)?;
                buffer.usage(usage | vk::BufferUsageFlags::TRANSFER_DST)?;
                buffer.memory(
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                )?;
                buffer.create()?;
                source.regions =
                    Some(BufferRegions::new(&buffer, 1, bytes.len() as u64, &[])?);
                source.buffer = Some(buffer);
            }
            if source.origin == SourceOrigin::Lib {
                source
                    .buffer
                    .as_ref()
                    .expect("lib source buffer")
                    .upload(0, bytes)?;
            }
        }
        Ok(outcome)
    }

    /// Default draw recording into buffer `idx` of `cmds`: per pipeline with
    /// a non-empty vertex source, bind vertex (and index) regions, bind the
    /// pipeline with its per-image descriptor set, and draw.
    pub fn fill(&mut self, cmds: &Commands, idx: usize) -> Result<()> {
        if let Some(mut cb) = self.fill_callback.take() {
            let result = cb(self, cmds, idx);
            self.fill_callback = Some(cb);
            return result;
        }

        for pipeline_idx in 0..self.graphics.len() {
            let vertex_count = self.vertex_count(pipeline_idx);
            if vertex_count == 0 {
                // Zero-count sources skip the pipeline entirely.
                continue;
            }
            let vertex_regions = self
                .find_source(SourceType::Vertex, pipeline_idx)
                .and_then(|s| s.regions.clone())
                .ok_or(Error::NotConfigured("vertex source has no buffer"))?;
            let bindings = self.graphics_bindings[pipeline_idx]
                .as_ref()
                .ok_or(Error::NotConfigured("pipeline has no bindings"))?;
            let set_idx = idx.min(bindings.dset_count().saturating_sub(1));

            cmds.bind_vertex_buffer(idx, &vertex_regions, 0)?;
            let index_count = self.index_count(pipeline_idx);
            let index_regions = self
                .find_source(SourceType::Index, pipeline_idx)
                .and_then(|s| s.regions.clone());
            cmds.bind_graphics(idx, &self.graphics[pipeline_idx], bindings, set_idx)?;
            match (index_count, index_regions) {
                (n, Some(regions)) if n > 0 => {
                    cmds.bind_index_buffer(idx, &regions, 0)?;
                    cmds.draw_indexed(idx, 0, 0, n as u32)?;
                }
                _ => {
                    cmds.draw(idx, 0, vertex_count as u32)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(
        source_type: SourceType,
        offset: usize,
        item_size: usize,
        data: Vec<u8>,
        copy_type: CopyType,
        reps: usize,
    ) -> Prop {
        let count = data.len() / item_size;
        Prop {
            prop_type: PropType::Pos,
            prop_idx: 0,
            source_type,
            pipeline_idx: 0,
            offset,
            copy_type,
            reps,
            item_size,
            count,
            data,
        }
    }

    #[test]
    fn staging_interleaves_props_at_offsets() {
        // Struct layout: { a: u8 at 0, b: u8 at 1 }, item size 2.
        let mut array = SourceArray::new(2);
        let pos = prop(
            SourceType::Vertex,
            0,
            1,
            vec![1, 2, 3],
            CopyType::Single,
            1,
        );
        let color = prop(
            SourceType::Vertex,
            1,
            1,
            vec![9, 8, 7],
            CopyType::Single,
            1,
        );
        let count = stage_source(&mut array, &[&pos, &color]);
        assert_eq!(count, 3);
        assert_eq!(array.as_bytes(), &[1, 9, 2, 8, 3, 7]);
    }

    #[test]
    fn staging_expands_single_value_over_items() {
        // One color broadcast over three positions.
        let mut array = SourceArray::new(2);
        let pos = prop(
            SourceType::Vertex,
            0,
            1,
            vec![1, 2, 3],
            CopyType::Single,
            1,
        );
        let color = prop(SourceType::Vertex, 1, 1, vec![5], CopyType::Single, 1);
        stage_source(&mut array, &[&pos, &color]);
        assert_eq!(array.as_bytes(), &[1, 5, 2, 5, 3, 5]);
    }

    #[test]
    fn staging_reps_expansion() {
        // Two items, each repeated twice.
        let mut array = SourceArray::new(1);
        let p = prop(SourceType::Vertex, 0, 1, vec![4, 6], CopyType::Single, 2);
        let count = stage_source(&mut array, &[&p]);
        assert_eq!(count, 4);
        assert_eq!(array.as_bytes(), &[4, 4, 6, 6]);
    }

    #[test]
    fn staging_repeat_cycles() {
        let mut array = SourceArray::new(1);
        let short = prop(SourceType::Vertex, 0, 1, vec![1, 2], CopyType::Repeat, 1);
        let long = prop(SourceType::Vertex, 0, 1, vec![0; 5], CopyType::Single, 1);
        // `long` forces 5 items; `short` cycles 1,2,1,2,1. Order matters:
        // later props overwrite earlier ones at the same offset.
        let count = stage_source(&mut array, &[&long, &short]);
        assert_eq!(count, 5);
        assert_eq!(array.as_bytes(), &[1, 2, 1, 2, 1]);
    }

    #[test]
    fn staging_empty_props_yield_zero_items() {
        let mut array = SourceArray::new(4);
        assert_eq!(stage_source(&mut array, &[]), 0);
        assert_eq!(array.item_count(), 0);
    }
}
