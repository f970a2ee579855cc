//! Binding-space translation: (group, binding) pairs to flat argument-table slots.
//!
//! Buffer slots `0..VERTEX_BUFFER_SLOT_COUNT` are reserved for vertex buffers; bind-group buffers
//! start after them. These numbers are a fixed contract with the shaders, which declare
//! `[[buffer(n)]]`, `[[texture(n)]]` and `[[sampler(n)]]` with the same arithmetic.

use crate::{BindGroupLayoutEntry, BindingKind, Result, RhiError};

pub const VERTEX_BUFFER_SLOT_COUNT: u32 = 4;
pub const BUFFERS_PER_GROUP: u32 = 8;
pub const TEXTURES_PER_GROUP: u32 = 8;
pub const SAMPLERS_PER_GROUP: u32 = 4;
pub const MAX_BIND_GROUPS: u32 = 4;

pub const MAX_BUFFER_BINDINGS: u32 = VERTEX_BUFFER_SLOT_COUNT + MAX_BIND_GROUPS * BUFFERS_PER_GROUP;
pub const MAX_TEXTURE_BINDINGS: u32 = MAX_BIND_GROUPS * TEXTURES_PER_GROUP;
pub const MAX_SAMPLER_BINDINGS: u32 = MAX_BIND_GROUPS * SAMPLERS_PER_GROUP;

fn check(kind: &'static str, group: u32, binding: u32, per_group: u32) -> Result<()> {
    if group >= MAX_BIND_GROUPS || binding >= per_group {
        return Err(RhiError::BindingOutOfRange {
            kind,
            group,
            binding,
        });
    }
    Ok(())
}

pub fn buffer_slot(group: u32, binding: u32) -> Result<u32> {
    check("buffer", group, binding, BUFFERS_PER_GROUP)?;
    Ok(VERTEX_BUFFER_SLOT_COUNT + group * BUFFERS_PER_GROUP + binding)
}

pub fn texture_slot(group: u32, binding: u32) -> Result<u32> {
    check("texture", group, binding, TEXTURES_PER_GROUP)?;
    Ok(group * TEXTURES_PER_GROUP + binding)
}

pub fn sampler_slot(group: u32, binding: u32) -> Result<u32> {
    check("sampler", group, binding, SAMPLERS_PER_GROUP)?;
    Ok(group * SAMPLERS_PER_GROUP + binding)
}

/// Vertex buffers occupy the reserved low buffer slots.
pub fn vertex_buffer_slot(slot: u32) -> Result<u32> {
    if slot >= VERTEX_BUFFER_SLOT_COUNT {
        return Err(RhiError::BindingOutOfRange {
            kind: "vertex buffer",
            group: 0,
            binding: slot,
        });
    }
    Ok(slot)
}

/// Slot for a layout entry placed at `group`, by resource kind.
pub fn slot_for(kind: BindingKind, group: u32, binding: u32) -> Result<u32> {
    match kind {
        BindingKind::Buffer => buffer_slot(group, binding),
        BindingKind::Texture => texture_slot(group, binding),
        BindingKind::Sampler => sampler_slot(group, binding),
    }
}

/// Layout entries must fit in a group's slot range regardless of which group they land in.
pub fn check_layout_bindings(entries: &[BindGroupLayoutEntry]) -> Result<()> {
    for entry in entries {
        slot_for(entry.ty.kind(), 0, entry.binding)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindingType, SamplerBindingType, ShaderStages};
    use std::collections::HashSet;

    #[test]
    fn derived_maxima() {
        assert_eq!(MAX_BUFFER_BINDINGS, 36);
        assert_eq!(MAX_TEXTURE_BINDINGS, 32);
        assert_eq!(MAX_SAMPLER_BINDINGS, 16);
    }

    #[test]
    fn every_valid_pair_maps_to_a_unique_slot() {
        let cases: [(fn(u32, u32) -> Result<u32>, u32, u32); 3] = [
            (buffer_slot, BUFFERS_PER_GROUP, MAX_BUFFER_BINDINGS),
            (texture_slot, TEXTURES_PER_GROUP, MAX_TEXTURE_BINDINGS),
            (sampler_slot, SAMPLERS_PER_GROUP, MAX_SAMPLER_BINDINGS),
        ];
        for (slot_fn, per_group, max) in cases {
            let mut seen = HashSet::new();
            for group in 0..MAX_BIND_GROUPS {
                for binding in 0..per_group {
                    let slot = slot_fn(group, binding).unwrap();
                    assert!(slot < max);
                    assert!(seen.insert(slot), "slot {} assigned twice", slot);
                }
            }
        }
    }

    #[test]
    fn buffer_slots_skip_vertex_range() {
        assert_eq!(buffer_slot(0, 0), Ok(4));
        assert_eq!(buffer_slot(1, 2), Ok(14));
        assert_eq!(buffer_slot(3, 7), Ok(35));
        assert_eq!(texture_slot(2, 1), Ok(17));
        assert_eq!(sampler_slot(3, 3), Ok(15));
    }

    #[test]
    fn out_of_range_pairs_fail_without_wrapping() {
        assert_eq!(
            buffer_slot(0, 8),
            Err(RhiError::BindingOutOfRange {
                kind: "buffer",
                group: 0,
                binding: 8
            })
        );
        assert!(buffer_slot(4, 0).is_err());
        assert!(texture_slot(0, 8).is_err());
        assert!(sampler_slot(0, 4).is_err());
        assert!(sampler_slot(u32::MAX, 0).is_err());
        assert!(vertex_buffer_slot(4).is_err());
        assert_eq!(vertex_buffer_slot(3), Ok(3));
    }

    #[test]
    fn layout_entries_checked_against_group_capacity() {
        let ok = BindGroupLayoutEntry {
            binding: 3,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Sampler(SamplerBindingType::Filtering),
        };
        let too_far = BindGroupLayoutEntry { binding: 4, ..ok };
        assert!(check_layout_bindings(&[ok]).is_ok());
        assert!(matches!(
            check_layout_bindings(&[ok, too_far]),
            Err(RhiError::BindingOutOfRange { kind: "sampler", .. })
        ));
    }
}
