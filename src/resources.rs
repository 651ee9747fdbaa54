//! Internal buffers of the sorter, sized once from the engine capacity.
//!
//! [`ResourcePlan`] is pure arithmetic and can be checked against a set of
//! [`wgpu::Limits`] without a device; [`SortResources`] owns the allocations.

use crate::count::partitions_for;
use crate::error::SortError;
use crate::sorter::{PARTITION_SIZE, RADIX, RADIX_PASSES};

const WORD: u64 = std::mem::size_of::<u32>() as u64;

/// Bytes of one pass' slice of the global histogram.
pub const HISTOGRAM_SLICE_BYTES: u64 = RADIX as u64 * WORD;

/// Byte offset of `pass`' slice inside the global histogram.
pub fn histogram_slice_offset(pass: u32) -> u64 {
    pass as u64 * HISTOGRAM_SLICE_BYTES
}

/// Buffer sizes (in bytes) needed by an engine of a given capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourcePlan {
    /// Elements the engine can sort
    pub max_capacity:       u32,
    /// `ceil(max_capacity / PARTITION_SIZE)`
    pub partition_count:    u32,
    /// 4 x 256 counters
    pub global_histogram:   u64,
    /// `partition_count` x 256 counters
    pub partition_histogram: u64,
    /// Ping-pong partner of the caller's key buffer
    pub scratch_keys:       u64,
    /// Ping-pong partner of the caller's value buffer
    pub scratch_values:     u64,
}

impl ResourcePlan {
    /// Sizes for `max_capacity` elements.
    ///
    /// Storage bindings may not be empty, so every buffer holds at least one word.
    pub fn new(max_capacity: u32) -> Self {
        let partition_count = partitions_for(max_capacity);
        Self {
            max_capacity,
            partition_count,
            global_histogram:    RADIX_PASSES as u64 * HISTOGRAM_SLICE_BYTES,
            partition_histogram: (partition_count as u64 * RADIX as u64 * WORD).max(WORD),
            scratch_keys:        (max_capacity as u64 * WORD).max(WORD),
            scratch_values:      (max_capacity as u64 * WORD).max(WORD),
        }
    }

    /// Total bytes the engine allocates, small uniform/count/dummy buffers included.
    pub fn total_bytes(&self) -> u64 {
        self.global_histogram + self.partition_histogram + self.scratch_keys + self.scratch_values + 3 * WORD
    }

    /// Largest capacity whose plan passes [`ResourcePlan::validate`] on `limits`.
    pub fn largest_capacity(limits: &wgpu::Limits) -> u32 {
        let max_binding = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        let by_buffer = max_binding / WORD;
        let by_dispatch = limits.max_compute_workgroups_per_dimension as u64 * PARTITION_SIZE as u64;
        by_buffer.min(by_dispatch).min(u32::MAX as u64) as u32
    }

    /// Check every size and the dispatch width against the device limits.
    pub fn validate(&self, limits: &wgpu::Limits) -> Result<(), SortError> {
        let max_binding = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        let checks = [
            ("partition count", self.partition_count as u64, limits.max_compute_workgroups_per_dimension as u64),
            ("partition histogram", self.partition_histogram, max_binding),
            ("scratch key buffer", self.scratch_keys, max_binding),
            ("scratch value buffer", self.scratch_values, max_binding),
        ];
        for (what, requested, limit) in checks {
            if requested > limit {
                return Err(SortError::CapacityExceedsLimits { what, requested, limit });
            }
        }
        Ok(())
    }
}

/// Buffers owned by one sorter for its whole lifetime.
pub struct SortResources {
    /// Sizes these buffers were created with
    pub plan:                ResourcePlan,
    /// Element count read by every kernel (1 x u32)
    pub element_count:       wgpu::Buffer,
    /// Digit counts of all four passes (4 x 256 x u32)
    pub global_histogram:    wgpu::Buffer,
    /// Per-partition counts, then offsets, of the current pass
    pub partition_histogram: wgpu::Buffer,
    /// Keys of odd passes' source / even passes' destination
    pub scratch_keys:        wgpu::Buffer,
    /// Values, same roles as `scratch_keys`
    pub scratch_values:      wgpu::Buffer,
    /// Current digit pass (uniform, 1 x u32)
    pub sort_pass:           wgpu::Buffer,
    /// Bound to the payload slots of keys-only sorts
    pub dummy:               wgpu::Buffer,
}

impl SortResources {
    /// Validate `plan` against the device and allocate everything.
    pub fn allocate(device: &wgpu::Device, plan: ResourcePlan) -> Result<Self, SortError> {
        plan.validate(&device.limits())?;

        let mk = |label: &str, size: u64, usage: wgpu::BufferUsages| device.create_buffer(&wgpu::BufferDescriptor {
            label:              Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let resources = Self {
            plan,
            element_count:       mk("wrdx element_count", WORD, wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST),
            global_histogram:    mk(
                "wrdx global_hist",
                plan.global_histogram,
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            ),
            partition_histogram: mk("wrdx partition_hist", plan.partition_histogram, wgpu::BufferUsages::STORAGE),
            scratch_keys:        mk("wrdx scratch_keys", plan.scratch_keys, wgpu::BufferUsages::STORAGE),
            scratch_values:      mk("wrdx scratch_values", plan.scratch_values, wgpu::BufferUsages::STORAGE),
            sort_pass:           mk("wrdx sort_pass", WORD, wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST),
            dummy:               mk("wrdx dummy", WORD, wgpu::BufferUsages::STORAGE),
        };

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            resources.destroy();
            return Err(SortError::ResourceAllocation(err.to_string()));
        }

        log::info!(
            "Allocated sorter resources: capacity {}, {} partitions, {} bytes",
            plan.max_capacity, plan.partition_count, plan.total_bytes(),
        );
        Ok(resources)
    }

    /// Release every buffer now instead of when the last reference drops.
    pub fn destroy(&self) {
        self.element_count.destroy();
        self.global_histogram.destroy();
        self.partition_histogram.destroy();
        self.scratch_keys.destroy();
        self.scratch_values.destroy();
        self.sort_pass.destroy();
        self.dummy.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_plan_sizes() {
        let plan = ResourcePlan::new(1 << 20);
        assert_eq!(plan.partition_count, 512);
        assert_eq!(plan.global_histogram, 4096);
        assert_eq!(plan.partition_histogram, 512 * 256 * 4);
        assert_eq!(plan.scratch_keys, 4 << 20);
        assert_eq!(plan.scratch_values, 4 << 20);
        assert_eq!(plan.total_bytes(), 4096 + 512 * 1024 + (8 << 20) + 12);
    }

    #[test]
    fn test_plan_odd_and_empty_capacity() {
        let plan = ResourcePlan::new(2049);
        assert_eq!(plan.partition_count, 2);
        assert_eq!(plan.partition_histogram, 2 * 1024);

        let empty = ResourcePlan::new(0);
        assert_eq!(empty.partition_count, 0);
        assert_eq!(empty.partition_histogram, 4);
        assert_eq!(empty.scratch_keys, 4);
    }

    #[test]
    fn test_histogram_slices() {
        assert_eq!(histogram_slice_offset(0), 0);
        assert_eq!(histogram_slice_offset(3), 3 * 1024);
        assert_eq!(histogram_slice_offset(3) + HISTOGRAM_SLICE_BYTES, ResourcePlan::new(1).global_histogram);
    }

    #[test]
    fn test_validate_against_limits() {
        let limits = wgpu::Limits::default();
        assert!(ResourcePlan::new(1 << 20).validate(&limits).is_ok());

        let max_words = limits.max_storage_buffer_binding_size / 4;
        assert!(ResourcePlan::new(max_words).validate(&limits).is_ok());
        match ResourcePlan::new(max_words + 1).validate(&limits) {
            Err(SortError::CapacityExceedsLimits { what, .. }) => assert_eq!(what, "scratch key buffer"),
            other => panic!("expected a capacity error, got {other:?}"),
        }

        let largest = ResourcePlan::largest_capacity(&limits);
        assert_eq!(largest, max_words);

        let narrow = wgpu::Limits { max_compute_workgroups_per_dimension: 4, ..wgpu::Limits::default() };
        match ResourcePlan::new(5 * 2048).validate(&narrow) {
            Err(SortError::CapacityExceedsLimits { what, requested, limit }) => {
                assert_eq!(what, "partition count");
                assert_eq!((requested, limit), (5, 4));
            }
            other => panic!("expected a capacity error, got {other:?}"),
        }
        let largest = ResourcePlan::largest_capacity(&narrow);
        assert_eq!(largest, 4 * 2048);
        assert!(ResourcePlan::new(largest).validate(&narrow).is_ok());
        assert!(ResourcePlan::new(largest + 1).validate(&narrow).is_err());
    }
}
