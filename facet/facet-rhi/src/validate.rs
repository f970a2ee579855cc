//! Backend-independent argument checks shared by the device implementations.

use std::collections::HashSet;

use crate::{BindGroupEntry, BindGroupLayoutEntry, BindingResource, Result, RhiError};

/// Copy alignment for buffer sizes and write offsets.
pub const COPY_BUFFER_ALIGNMENT: u64 = 4;

/// Round `size` up to a multiple of `alignment` (a power of two).
pub fn align_to(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

/// Size of a new buffer after rounding; zero-sized requests are a descriptor error.
pub fn buffer_allocation_size(requested: u64, alignment: u64) -> Result<u64> {
    if requested == 0 {
        return Err(RhiError::InvalidDescriptor(
            "buffer size is zero and no element type size is known".to_string(),
        ));
    }
    Ok(align_to(requested, alignment))
}

/// Reject writes that do not fit in `size - offset` bytes.
pub fn check_write_range(offset: u64, len: usize, size: u64) -> Result<()> {
    let len = len as u64;
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(RhiError::OutOfBounds { offset, len, size }),
    }
}

/// Layout entries must use distinct binding numbers.
pub fn check_layout_entries(entries: &[BindGroupLayoutEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.binding) {
            return Err(RhiError::InvalidDescriptor(format!(
                "binding {} appears twice in bind group layout",
                entry.binding
            )));
        }
    }
    Ok(())
}

/// Bind-group entries must line up with the layout entry by entry: same count, same binding
/// numbers in the same order, same resource kind.
pub fn check_bind_group_entries(
    layout: &[BindGroupLayoutEntry],
    entries: &[BindGroupEntry<'_>],
) -> Result<()> {
    if layout.len() != entries.len() {
        return Err(RhiError::LayoutMismatch(format!(
            "layout has {} entries, bind group has {}",
            layout.len(),
            entries.len()
        )));
    }
    for (i, (expected, entry)) in layout.iter().zip(entries).enumerate() {
        if expected.binding != entry.binding {
            return Err(RhiError::LayoutMismatch(format!(
                "entry {} has binding {}, layout expects {}",
                i, entry.binding, expected.binding
            )));
        }
        if expected.ty.kind() != entry.resource.kind() {
            return Err(RhiError::LayoutMismatch(format!(
                "binding {} is {:?} in the layout but {:?} was supplied",
                entry.binding,
                expected.ty.kind(),
                entry.resource.kind()
            )));
        }
        if let BindingResource::Buffer {
            buffer,
            offset,
            size,
        } = entry.resource
        {
            let len = size.unwrap_or_else(|| buffer.size().saturating_sub(offset));
            if len == 0 || offset.checked_add(len).map_or(true, |end| end > buffer.size()) {
                return Err(RhiError::OutOfBounds {
                    offset,
                    len,
                    size: buffer.size(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindingType, SamplerBindingType, ShaderStages};

    #[test]
    fn one_byte_rounds_to_four() {
        assert_eq!(buffer_allocation_size(1, COPY_BUFFER_ALIGNMENT), Ok(4));
        assert_eq!(buffer_allocation_size(4, COPY_BUFFER_ALIGNMENT), Ok(4));
        assert_eq!(buffer_allocation_size(65, COPY_BUFFER_ALIGNMENT), Ok(68));
        assert!(matches!(
            buffer_allocation_size(0, COPY_BUFFER_ALIGNMENT),
            Err(RhiError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn write_range_is_checked_not_truncated() {
        assert!(check_write_range(0, 16, 16).is_ok());
        assert!(check_write_range(12, 4, 16).is_ok());
        assert_eq!(
            check_write_range(12, 8, 16),
            Err(RhiError::OutOfBounds {
                offset: 12,
                len: 8,
                size: 16
            })
        );
        assert!(check_write_range(u64::MAX, 1, 16).is_err());
    }

    #[test]
    fn duplicate_layout_bindings_rejected() {
        let entry = BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Sampler(SamplerBindingType::Filtering),
        };
        assert!(check_layout_entries(&[entry]).is_ok());
        assert!(check_layout_entries(&[entry, entry]).is_err());
    }

    #[test]
    fn empty_group_matches_empty_layout() {
        assert!(check_bind_group_entries(&[], &[]).is_ok());
        let entry = BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::VERTEX,
            ty: BindingType::UniformBuffer,
        };
        assert!(matches!(
            check_bind_group_entries(&[entry], &[]),
            Err(RhiError::LayoutMismatch(_))
        ));
    }
}
