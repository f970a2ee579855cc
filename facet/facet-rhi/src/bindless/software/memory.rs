//! CPU-side heap backing software allocations, plus the resident-set view the timeline checks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::bindless::native::{Allocation, AllocationId, NativeTextureDescriptor, TextureType};
use crate::validate::align_to;
use crate::{Result, RhiError};

/// First GPU virtual address handed out. Zero stays invalid.
const ADDRESS_BASE: u64 = 0x1_0000_0000;
/// Buffers start on this boundary and are separated by at least one guard page of it.
const ADDRESS_ALIGNMENT: u64 = 256;

#[derive(Debug)]
enum BlockKind {
    Buffer,
    Texture(NativeTextureDescriptor),
}

#[derive(Debug)]
struct Block {
    label: Option<String>,
    gpu_address: u64,
    kind: BlockKind,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct Heap {
    blocks: HashMap<AllocationId, Block>,
    by_address: BTreeMap<u64, AllocationId>,
    next_address: u64,
}

#[derive(Debug)]
pub struct SoftwareMemory {
    heap: Mutex<Heap>,
    next_id: AtomicU64,
}

impl Default for SoftwareMemory {
    fn default() -> Self {
        Self {
            heap: Mutex::new(Heap {
                next_address: ADDRESS_BASE,
                ..Default::default()
            }),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Texel extent of one mip level.
fn level_extent(desc: &NativeTextureDescriptor, level: u32) -> (u32, u32, u32) {
    let w = (desc.width >> level).max(1);
    let h = (desc.height >> level).max(1);
    let d = match desc.texture_type {
        TextureType::Type3D => (desc.depth_or_layers >> level).max(1),
        _ => desc.depth_or_layers.max(1),
    };
    (w, h, d)
}

fn level_size(desc: &NativeTextureDescriptor, level: u32) -> u64 {
    let (w, h, d) = level_extent(desc, level);
    w as u64 * h as u64 * d as u64 * desc.bytes_per_pixel as u64
}

fn level_offset(desc: &NativeTextureDescriptor, level: u32) -> u64 {
    (0..level).map(|l| level_size(desc, l)).sum()
}

fn texture_size(desc: &NativeTextureDescriptor) -> u64 {
    level_offset(desc, desc.mipmap_level_count)
}

impl SoftwareMemory {
    /// Fresh id from the shared object namespace (allocations, samplers, pipelines, libraries).
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn alloc_buffer(&self, length: u64, label: Option<&str>) -> Allocation {
        let id = self.next_id();
        let mut heap = self.heap.lock();
        let gpu_address = heap.next_address;
        heap.next_address += align_to(length.max(1), ADDRESS_ALIGNMENT) + ADDRESS_ALIGNMENT;
        heap.by_address.insert(gpu_address, id);
        heap.blocks.insert(
            id,
            Block {
                label: label.map(str::to_string),
                gpu_address,
                kind: BlockKind::Buffer,
                bytes: vec![0; length as usize],
            },
        );
        Allocation {
            id,
            gpu_address,
            length,
        }
    }

    pub fn alloc_texture(&self, desc: &NativeTextureDescriptor, label: Option<&str>) -> Allocation {
        let id = self.next_id();
        let length = texture_size(desc);
        self.heap.lock().blocks.insert(
            id,
            Block {
                label: label.map(str::to_string),
                gpu_address: 0,
                kind: BlockKind::Texture(desc.clone()),
                bytes: vec![0; length as usize],
            },
        );
        Allocation {
            id,
            gpu_address: 0,
            length,
        }
    }

    /// Returns false if `id` was not live.
    pub fn free(&self, id: AllocationId) -> bool {
        let mut heap = self.heap.lock();
        match heap.blocks.remove(&id) {
            Some(block) => {
                if block.gpu_address != 0 {
                    heap.by_address.remove(&block.gpu_address);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: AllocationId) -> bool {
        self.heap.lock().blocks.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.heap.lock().blocks.len()
    }

    pub fn label(&self, id: AllocationId) -> Option<String> {
        self.heap.lock().blocks.get(&id).and_then(|b| b.label.clone())
    }

    /// Map a GPU address to (allocation, offset into it).
    pub fn resolve(&self, address: u64) -> Option<(AllocationId, u64)> {
        let heap = self.heap.lock();
        let (&base, &id) = heap.by_address.range(..=address).next_back()?;
        let block = heap.blocks.get(&id)?;
        let offset = address - base;
        (offset < block.bytes.len() as u64).then_some((id, offset))
    }

    pub fn write(&self, id: AllocationId, offset: u64, data: &[u8]) -> Result<()> {
        let mut heap = self.heap.lock();
        let block = heap
            .blocks
            .get_mut(&id)
            .ok_or_else(|| RhiError::Driver(format!("write to freed allocation {}", id)))?;
        let end = offset as usize + data.len();
        if end > block.bytes.len() {
            return Err(RhiError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size: block.bytes.len() as u64,
            });
        }
        block.bytes[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    /// Up to `len` bytes from `offset`, clipped at the end of the allocation.
    pub fn read(&self, id: AllocationId, offset: u64, len: u64) -> Result<Vec<u8>> {
        let heap = self.heap.lock();
        let block = heap
            .blocks
            .get(&id)
            .ok_or_else(|| RhiError::Driver(format!("read from freed allocation {}", id)))?;
        let start = (offset as usize).min(block.bytes.len());
        let end = (offset.saturating_add(len) as usize).min(block.bytes.len());
        Ok(block.bytes[start..end].to_vec())
    }

    /// Copy between two allocations as the GPU would.
    pub fn copy(
        &self,
        src: (AllocationId, u64),
        dst: (AllocationId, u64),
        size: u64,
    ) -> Result<()> {
        let bytes = self.read(src.0, src.1, size)?;
        if bytes.len() as u64 != size {
            return Err(RhiError::OutOfBounds {
                offset: src.1,
                len: size,
                size: src.1 + bytes.len() as u64,
            });
        }
        self.write(dst.0, dst.1, &bytes)
    }

    fn with_texture<R>(
        &self,
        id: AllocationId,
        f: impl FnOnce(&NativeTextureDescriptor, &mut Vec<u8>) -> Result<R>,
    ) -> Result<R> {
        let mut heap = self.heap.lock();
        let block = heap
            .blocks
            .get_mut(&id)
            .ok_or_else(|| RhiError::Driver(format!("texture {} is not allocated", id)))?;
        match &block.kind {
            BlockKind::Texture(desc) => {
                let desc = desc.clone();
                f(&desc, &mut block.bytes)
            }
            BlockKind::Buffer => Err(RhiError::Driver(format!("allocation {} is a buffer", id))),
        }
    }

    /// Copy rows of `data` into a texture region. `bytes_per_row` is the source pitch.
    pub fn replace_region(
        &self,
        id: AllocationId,
        level: u32,
        origin: (u32, u32, u32),
        size: (u32, u32, u32),
        bytes_per_row: u32,
        data: &[u8],
    ) -> Result<()> {
        self.with_texture(id, |desc, bytes| {
            if level >= desc.mipmap_level_count {
                return Err(RhiError::InvalidDescriptor(format!(
                    "mip level {} of a {}-level texture",
                    level, desc.mipmap_level_count
                )));
            }
            let (w, h, d) = level_extent(desc, level);
            let fits = |o: u32, s: u32, limit: u32| o.checked_add(s).map_or(false, |end| end <= limit);
            if !(fits(origin.0, size.0, w) && fits(origin.1, size.1, h) && fits(origin.2, size.2, d)) {
                return Err(RhiError::InvalidDescriptor(format!(
                    "region {:?}+{:?} outside level extent {:?}",
                    origin,
                    size,
                    (w, h, d)
                )));
            }
            let bpp = desc.bytes_per_pixel as usize;
            let row_len = size.0 as usize * bpp;
            let base = level_offset(desc, level) as usize;
            let pitch = w as usize * bpp;
            let slice_len = pitch * h as usize;
            for z in 0..size.2 as usize {
                for y in 0..size.1 as usize {
                    let src = (z * size.1 as usize + y) * bytes_per_row as usize;
                    let src_row = data.get(src..src + row_len).ok_or(RhiError::OutOfBounds {
                        offset: src as u64,
                        len: row_len as u64,
                        size: data.len() as u64,
                    })?;
                    let dst = base
                        + (origin.2 as usize + z) * slice_len
                        + (origin.1 as usize + y) * pitch
                        + origin.0 as usize * bpp;
                    bytes[dst..dst + row_len].copy_from_slice(src_row);
                }
            }
            Ok(())
        })
    }

    /// Fill one slice of one mip level with a repeated texel.
    pub fn fill_texture(&self, id: AllocationId, level: u32, slice: u32, texel: &[u8]) -> Result<()> {
        self.with_texture(id, |desc, bytes| {
            let (w, h, _) = level_extent(desc, level);
            let slice_len = w as usize * h as usize * desc.bytes_per_pixel as usize;
            let start = level_offset(desc, level) as usize + slice as usize * slice_len;
            let region = bytes
                .get_mut(start..start + slice_len)
                .ok_or_else(|| RhiError::Driver(format!("slice {} out of range", slice)))?;
            if texel.is_empty() {
                return Ok(());
            }
            for chunk in region.chunks_exact_mut(texel.len()) {
                chunk.copy_from_slice(texel);
            }
            Ok(())
        })
    }

    /// Tightly packed texels of one slice of one mip level.
    pub fn read_texture(&self, id: AllocationId, level: u32, slice: u32) -> Result<Vec<u8>> {
        self.with_texture(id, |desc, bytes| {
            let (w, h, _) = level_extent(desc, level);
            let slice_len = w as usize * h as usize * desc.bytes_per_pixel as usize;
            let start = level_offset(desc, level) as usize + slice as usize * slice_len;
            bytes
                .get(start..start + slice_len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| RhiError::Driver(format!("slice {} out of range", slice)))
        })
    }
}

/// Committed contents of every residency set, and which sets are attached to the queue.
#[derive(Debug, Default)]
pub struct ResidencyView {
    committed: Mutex<HashMap<u64, HashSet<AllocationId>>>,
    attached: Mutex<HashSet<u64>>,
}

impl ResidencyView {
    pub fn publish(&self, set_id: u64, members: HashSet<AllocationId>) {
        self.committed.lock().insert(set_id, members);
    }

    pub fn attach(&self, set_id: u64) {
        self.attached.lock().insert(set_id);
    }

    pub fn detach(&self, set_id: u64) {
        self.attached.lock().remove(&set_id);
        self.committed.lock().remove(&set_id);
    }

    pub fn is_resident(&self, id: AllocationId) -> bool {
        let attached = self.attached.lock();
        let committed = self.committed.lock();
        attached
            .iter()
            .filter_map(|set| committed.get(set))
            .any(|members| members.contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindless::native::{PixelFormat, TextureUsage};

    fn texture_desc(width: u32, height: u32, levels: u32) -> NativeTextureDescriptor {
        NativeTextureDescriptor {
            texture_type: TextureType::Type2D,
            pixel_format: PixelFormat::Rgba8Unorm,
            width,
            height,
            depth_or_layers: 1,
            mipmap_level_count: levels,
            usage: TextureUsage::SHADER_READ,
            bytes_per_pixel: 4,
        }
    }

    #[test]
    fn addresses_resolve_inside_allocations_only() {
        let memory = SoftwareMemory::default();
        let a = memory.alloc_buffer(16, Some("a"));
        let b = memory.alloc_buffer(16, None);
        assert_ne!(a.gpu_address, b.gpu_address);
        assert_eq!(memory.resolve(a.gpu_address + 4), Some((a.id, 4)));
        assert_eq!(memory.resolve(a.gpu_address + 16), None);
        assert_eq!(memory.resolve(0), None);
        assert!(memory.free(a.id));
        assert!(!memory.free(a.id));
        assert_eq!(memory.resolve(a.gpu_address), None);
        assert_eq!(memory.label(b.id), None);
    }

    #[test]
    fn write_is_bounds_checked() {
        let memory = SoftwareMemory::default();
        let a = memory.alloc_buffer(8, None);
        memory.write(a.id, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(memory.read(a.id, 0, 8).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(matches!(
            memory.write(a.id, 6, &[0; 4]),
            Err(RhiError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn mip_chain_is_packed() {
        let desc = texture_desc(4, 4, 3);
        assert_eq!(texture_size(&desc), (16 + 4 + 1) * 4);
        assert_eq!(level_offset(&desc, 2), (16 + 4) * 4);
    }

    #[test]
    fn region_upload_and_fill() {
        let memory = SoftwareMemory::default();
        let tex = memory.alloc_texture(&texture_desc(2, 2, 1), None);
        memory.fill_texture(tex.id, 0, 0, &[9, 9, 9, 9]).unwrap();
        memory
            .replace_region(tex.id, 0, (1, 1, 0), (1, 1, 1), 4, &[1, 2, 3, 4])
            .unwrap();
        let texels = memory.read_texture(tex.id, 0, 0).unwrap();
        assert_eq!(&texels[0..4], &[9, 9, 9, 9]);
        assert_eq!(&texels[12..16], &[1, 2, 3, 4]);
        assert!(memory
            .replace_region(tex.id, 0, (2, 0, 0), (1, 1, 1), 4, &[0; 4])
            .is_err());
    }

    #[test]
    fn residency_requires_attached_committed_set() {
        let view = ResidencyView::default();
        view.publish(1, [7].into_iter().collect());
        assert!(!view.is_resident(7));
        view.attach(1);
        assert!(view.is_resident(7));
        view.detach(1);
        assert!(!view.is_resident(7));
    }
}
