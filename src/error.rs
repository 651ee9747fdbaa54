//! Errors raised while building the sorter or talking to the device.

/// Everything that can go wrong outside of an enqueued sort.
///
/// Sorting itself never returns an error: once an engine exists, every entry
/// point unconditionally records its four passes.
#[derive(Debug, thiserror::Error)]
pub enum SortError {
    /// A buffer or dispatch sized from `max_capacity` does not fit the device.
    #[error("{what} needs {requested}, but the device allows at most {limit}")]
    CapacityExceedsLimits {
        /// Which resource overflowed
        what:      &'static str,
        /// Size or count the engine asked for
        requested: u64,
        /// Device limit it was checked against
        limit:     u64,
    },
    /// The device ran out of memory while the internal buffers were allocated.
    #[error("failed to allocate sorter resources: {0}")]
    ResourceAllocation(String),
    /// A kernel could not be preprocessed, compiled or turned into a pipeline.
    #[error("failed to build radix sort kernels: {0}")]
    KernelBuild(String),
    /// An optional feature was requested that the device does not expose.
    #[error("device does not support the optional feature {0}")]
    MissingFeature(&'static str),
    /// No adapter matched the request.
    #[error("no GPU adapter found: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),
    /// The adapter refused to hand out a device.
    #[error("failed to get GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    /// Mapping a staging buffer for readback failed.
    #[error("failed to map readback buffer: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
    /// Waiting on the device failed.
    #[error("failed to wait for the device: {0}")]
    Poll(#[from] wgpu::PollError),
}
