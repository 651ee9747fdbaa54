//! Element-count resolution: turns a host-known or device-resident element
//! count into the count buffer every kernel reads, and fixes the dispatch
//! geometry of a sort call.

use crate::sorter::{PARTITION_SIZE, RADIX};

/// Where the number of elements to sort comes from.
#[derive(Clone, Copy, Debug)]
pub enum ElementCount<'a> {
    /// Known on the host when the sort is recorded.
    Host(u32),
    /// A `u32` living in a device buffer, e.g. written by an upstream kernel.
    ///
    /// The buffer needs `COPY_SRC` usage and `offset` must be a multiple of 4.
    /// The value must not exceed the engine capacity; this cannot be checked
    /// when the work is submitted.
    Device {
        /// Buffer holding the count
        buffer: &'a wgpu::Buffer,
        /// Byte offset of the count inside `buffer`
        offset: wgpu::BufferAddress,
    },
}

/// Number of workgroups for each phase of one digit pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchGeometry {
    /// Workgroups of the counting and scatter phases (one per partition)
    pub partitions: u32,
    /// Workgroups of the prefix phase (one per digit value)
    pub digits:     u32,
}

/// `ceil(n / PARTITION_SIZE)`.
pub fn partitions_for(n: u32) -> u32 {
    n.div_ceil(PARTITION_SIZE)
}

impl ElementCount<'_> {
    /// Dispatch geometry for an engine built with `max_capacity`.
    ///
    /// Host counts are sized exactly. Device counts are unknown at submission
    /// time, so they always get the worst case and the kernels bound their
    /// work with the count they read on the device.
    pub fn geometry(&self, max_capacity: u32) -> DispatchGeometry {
        let partitions = match self {
            ElementCount::Host(n)        => partitions_for(*n),
            ElementCount::Device { .. }  => partitions_for(max_capacity),
        };
        DispatchGeometry { partitions, digits: RADIX }
    }

    /// The host value, if there is one.
    pub fn host_value(&self) -> Option<u32> {
        match self {
            ElementCount::Host(n)       => Some(*n),
            ElementCount::Device { .. } => None,
        }
    }

    /// Host counts are written through the queue, so they land before the
    /// next submission. Call before submitting the first pass.
    pub(crate) fn write_host(&self, queue: &wgpu::Queue, count_buf: &wgpu::Buffer) {
        if let ElementCount::Host(n) = self {
            queue.write_buffer(count_buf, 0, bytemuck::bytes_of(n));
        }
    }

    /// Device counts are copied at the head of the first pass' encoder.
    pub(crate) fn record_copy(&self, encoder: &mut wgpu::CommandEncoder, count_buf: &wgpu::Buffer) {
        if let ElementCount::Device { buffer, offset } = self {
            encoder.copy_buffer_to_buffer(buffer, *offset, count_buf, 0, 4);
        }
    }
}

impl From<u32> for ElementCount<'_> {
    fn from(n: u32) -> Self {
        ElementCount::Host(n)
    }
}

impl<'a> From<&'a wgpu::Buffer> for ElementCount<'a> {
    fn from(buffer: &'a wgpu::Buffer) -> Self {
        ElementCount::Device { buffer, offset: 0 }
    }
}
