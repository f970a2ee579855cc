//! Typed buffer wrapper. The element type only sizes allocations and casts writes; the GPU sees bytes.

use std::marker::PhantomData;
use std::mem::size_of;

use crate::{Buffer, BufferDescriptor, BufferInitDescriptor, BufferUsage, Device, Queue, Result};

/// A device buffer holding one `T` (or a slice of them).
#[derive(Debug)]
pub struct TypedBuffer<T: bytemuck::Pod> {
    raw: Box<dyn Buffer>,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> TypedBuffer<T> {
    /// Allocate room for one `T`. Zero-sized `T` is rejected.
    pub fn new(device: &dyn Device, label: Option<&'static str>, usage: BufferUsage) -> Result<Self> {
        let raw = device.create_buffer(&BufferDescriptor {
            label,
            size: size_of::<T>() as u64,
            usage,
        })?;
        Ok(Self::from_raw(raw))
    }

    /// Allocate and upload `value`.
    pub fn with_data(
        device: &dyn Device,
        label: Option<&'static str>,
        value: &T,
        usage: BufferUsage,
    ) -> Result<Self> {
        let raw = device.create_buffer_init(&BufferInitDescriptor {
            label,
            contents: bytemuck::bytes_of(value),
            usage,
        })?;
        Ok(Self::from_raw(raw))
    }

    /// Allocate and upload a slice of elements.
    pub fn with_slice(
        device: &dyn Device,
        label: Option<&'static str>,
        values: &[T],
        usage: BufferUsage,
    ) -> Result<Self> {
        let raw = device.create_buffer_init(&BufferInitDescriptor {
            label,
            contents: bytemuck::cast_slice(values),
            usage,
        })?;
        Ok(Self::from_raw(raw))
    }

    pub fn from_raw(raw: Box<dyn Buffer>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Overwrite element `index`.
    pub fn write(&self, queue: &dyn Queue, index: u64, value: &T) -> Result<()> {
        self.raw
            .update_data(queue, index * size_of::<T>() as u64, bytemuck::bytes_of(value))
    }

    pub fn write_slice(&self, queue: &dyn Queue, first: u64, values: &[T]) -> Result<()> {
        self.raw
            .update_data(queue, first * size_of::<T>() as u64, bytemuck::cast_slice(values))
    }

    /// Number of whole elements that fit in the allocation.
    pub fn len(&self) -> u64 {
        match size_of::<T>() as u64 {
            0 => 0,
            stride => self.raw.size() / stride,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn raw(&self) -> &dyn Buffer {
        self.raw.as_ref()
    }

    pub fn into_raw(self) -> Box<dyn Buffer> {
        self.raw
    }
}
