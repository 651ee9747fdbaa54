//! Device acquisition, upload and readback helpers.
//!
//! The sorter itself never waits on the device; these helpers do, and are
//! what the command line front end and the tests use around it.

use wgpu::util::DeviceExt;

use crate::error::SortError;

/// Request a high-performance adapter and a device with whichever of
/// `features` the adapter supports; check [`wgpu::Device::features`] for
/// what was actually enabled.
///
/// The device gets the adapter's own limits, so large capacities are not
/// capped by the WebGPU defaults.
pub async fn request_device(features: wgpu::Features) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), SortError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        })
        .await?;

    let missing = features - adapter.features();
    if !missing.is_empty() {
        log::warn!("Adapter lacks requested features {:?}, continuing without them", missing);
    }

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label:             Some("wrdx_gpu"),
            required_features: features & adapter.features(),
            required_limits:   adapter.limits(),
            ..Default::default()
        })
        .await?;

    log::info!("GPU: {} ({:?})", adapter.get_info().name, adapter.get_info().backend);
    Ok((adapter, device, queue))
}

/// Blocking [`request_device`], without the adapter.
pub fn request_device_blocking(features: wgpu::Features) -> Result<(wgpu::Device, wgpu::Queue), SortError> {
    let (_, device, queue) = pollster::block_on(request_device(features))?;
    Ok((device, queue))
}

/// Storage buffer initialised with `contents`, usable as a sort input and as
/// a copy source or destination. Empty contents still get one word, since
/// empty buffers cannot be bound.
pub fn create_storage_buffer(device: &wgpu::Device, label: &str, contents: &[u32]) -> wgpu::Buffer {
    let contents = if contents.is_empty() { &[0u32][..] } else { contents };
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label:    Some(label),
        contents: bytemuck::cast_slice(contents),
        usage:    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
    })
}

/// Overwrite the start of `buffer` with `contents`.
pub fn upload_u32(queue: &wgpu::Queue, buffer: &wgpu::Buffer, contents: &[u32]) {
    if contents.is_empty() { return; }
    queue.write_buffer(buffer, 0, bytemuck::cast_slice(contents));
}

/// Copy the first `len` words of `buffer` back to the host.
///
/// Blocks until every previously submitted command has finished, so it also
/// serves as the fence after a sort.
pub fn read_buffer_u32(
    device: &wgpu::Device,
    queue:  &wgpu::Queue,
    buffer: &wgpu::Buffer,
    len:    usize,
) -> Result<Vec<u32>, SortError> {
    if len == 0 { return Ok(Vec::new()); }
    let size = (len * std::mem::size_of::<u32>()) as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label:              Some("wrdx staging"),
        size,
        usage:              wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut enc = device.create_command_encoder(&Default::default());
    enc.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    queue.submit([enc.finish()]);

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| { let _ = tx.send(r); });
    device.poll(wgpu::PollType::wait_indefinitely())?;
    // the callback has run once poll returns; a closed channel means it never fired
    rx.recv().unwrap_or(Err(wgpu::BufferAsyncError))?;

    let data = slice.get_mapped_range();
    let result: Vec<u32> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(result)
}

/// Flush pending queue writes and block until the device is idle.
pub fn wait_idle(device: &wgpu::Device, queue: &wgpu::Queue) -> Result<(), SortError> {
    queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
    device.poll(wgpu::PollType::wait_indefinitely())?;
    Ok(())
}
