//! `wrdx bench` and `wrdx info`: drive the sorter on random input, check it
//! against a CPU sort and report timings.
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::SortError;
use crate::gpu_utils::{create_storage_buffer, read_buffer_u32, request_device, upload_u32, wait_idle};
use crate::resources::ResourcePlan;
use crate::sorter::{RadixSorter, SorterOptions};

/// Settings of one benchmark run
#[derive(Clone, Debug)]
pub struct BenchConfig {
    /// Keys per sort
    pub elements:     u32,
    /// Capacity of the sorter, at least `elements`
    pub max_capacity: u32,
    /// Timed sorts
    pub iterations:   usize,
    /// Sort key-value pairs instead of bare keys
    pub key_values:   bool,
    /// Pass the element count through a device buffer
    pub indirect:     bool,
    /// Seed of the random keys
    pub seed:         u64,
    /// Subgroup prefix kernel
    pub subgroups:    bool,
}

/// Outcome of [`run_bench`]
#[derive(Clone, Debug)]
pub struct BenchReport {
    /// Wall time of every timed sort, submission to device idle
    pub timings:    Vec<Duration>,
    /// Positions where the GPU output differs from the CPU reference
    pub mismatches: usize,
}

impl BenchReport {
    /// Mean of [`BenchReport::timings`].
    pub fn mean(&self) -> Duration {
        if self.timings.is_empty() { return Duration::ZERO; }
        self.timings.iter().sum::<Duration>() / self.timings.len() as u32
    }

    /// Millions of keys sorted per second at the mean time.
    pub fn throughput(&self, elements: u32) -> f64 {
        let secs = self.mean().as_secs_f64();
        if secs == 0.0 { 0.0 } else { elements as f64 / secs / 1.0e6 }
    }
}

/// Random keys, and the original index of each key as its value.
pub fn generate_input(elements: u32, seed: u64) -> (Vec<u32>, Vec<u32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let keys   = (0..elements).map(|_| rng.gen::<u32>()).collect();
    let values = (0..elements).collect();
    (keys, values)
}

/// CPU reference: stable sort of the pairs by key.
pub fn reference_sort(keys: &[u32], values: &[u32]) -> (Vec<u32>, Vec<u32>) {
    let mut pairs: Vec<(u32, u32)> = keys.iter().copied().zip(values.iter().copied()).collect();
    pairs.par_sort_by_key(|&(k, _)| k);
    pairs.into_iter().unzip()
}

/// Number of positions where `got` and `expected` differ.
pub fn count_mismatches(got: &[u32], expected: &[u32]) -> usize {
    got.par_iter().zip(expected.par_iter()).filter(|(a, b)| a != b).count()
        + got.len().abs_diff(expected.len())
}

/// Sort the same random input `iterations` times and verify the last result.
pub fn run_bench(config: &BenchConfig) -> Result<BenchReport, SortError> {
    if config.max_capacity < config.elements {
        return Err(SortError::CapacityExceedsLimits {
            what:      "element count",
            requested: config.elements as u64,
            limit:     config.max_capacity as u64,
        });
    }

    let features = if config.subgroups { wgpu::Features::SUBGROUP } else { wgpu::Features::empty() };
    let (_, device, queue) = pollster::block_on(request_device(features))?;
    let mut sorter = RadixSorter::with_options(
        &device,
        &queue,
        config.max_capacity,
        SorterOptions { subgroups: config.subgroups },
    )?;

    log::info!("Generating {} keys with seed {}", config.elements, config.seed);
    let (keys, values) = generate_input(config.elements, config.seed);
    let (expected_keys, expected_values) = reference_sort(&keys, &values);

    let key_buf   = create_storage_buffer(&device, "bench keys", &keys);
    let value_buf = create_storage_buffer(&device, "bench values", &values);
    // element count sits behind a leading word to exercise the offset
    let count_buf = create_storage_buffer(&device, "bench count", &[0, config.elements]);
    let count_offset = std::mem::size_of::<u32>() as wgpu::BufferAddress;

    let bar = ProgressBar::new(config.iterations as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} sorts [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut timings = Vec::with_capacity(config.iterations);
    for _ in 0..config.iterations {
        upload_u32(&queue, &key_buf, &keys);
        if config.key_values {
            upload_u32(&queue, &value_buf, &values);
        }
        wait_idle(&device, &queue)?;

        let start = Instant::now();
        match (config.key_values, config.indirect) {
            (false, false) => sorter.sort_keys(config.elements, &key_buf),
            (false, true)  => sorter.sort_keys_indirect(&count_buf, count_offset, &key_buf),
            (true, false)  => sorter.sort_key_values(config.elements, &key_buf, &value_buf),
            (true, true)   => sorter.sort_key_values_indirect(&count_buf, count_offset, &key_buf, &value_buf),
        }
        wait_idle(&device, &queue)?;
        timings.push(start.elapsed());
        bar.inc(1);
    }
    bar.finish_and_clear();

    let got_keys = read_buffer_u32(&device, &queue, &key_buf, config.elements as usize)?;
    let mut mismatches = count_mismatches(&got_keys, &expected_keys);
    if config.key_values {
        let got_values = read_buffer_u32(&device, &queue, &value_buf, config.elements as usize)?;
        mismatches += count_mismatches(&got_values, &expected_values);
    }

    sorter.destroy();
    key_buf.destroy();
    value_buf.destroy();
    count_buf.destroy();

    let report = BenchReport { timings, mismatches };
    log::info!(
        "Mean sort time {:.3} ms over {} iterations ({:.1} Mkeys/s)",
        report.mean().as_secs_f64() * 1.0e3,
        config.iterations,
        report.throughput(config.elements),
    );
    Ok(report)
}

/// Print the adapter, the limits that bound the sorter, and its largest capacity.
pub fn run_info() -> Result<(), SortError> {
    let (adapter, device, _) = pollster::block_on(request_device(wgpu::Features::SUBGROUP))?;
    let info = adapter.get_info();
    let limits = device.limits();

    println!("Adapter:  {} ({:?}, {:?})", info.name, info.backend, info.device_type);
    println!("Driver:   {} {}", info.driver, info.driver_info);
    println!("Subgroups: {}", device.features().contains(wgpu::Features::SUBGROUP));
    println!("max_storage_buffer_binding_size: {}", limits.max_storage_buffer_binding_size);
    println!("max_buffer_size: {}", limits.max_buffer_size);
    println!("max_compute_workgroups_per_dimension: {}", limits.max_compute_workgroups_per_dimension);

    let largest = ResourcePlan::largest_capacity(&limits);
    let plan = ResourcePlan::new(largest);
    println!(
        "Largest sorter capacity: {} keys ({} partitions, {} bytes of internal buffers)",
        largest, plan.partition_count, plan.total_bytes(),
    );
    Ok(())
}
