//! GPU least-significant-digit radix sort of 32-bit keys, with optional
//! 32-bit payloads, on top of wgpu.
//!
//! A [`RadixSorter`] is built once for a maximum element count and then sorts
//! device buffers in place, either with a count known on the host or with a
//! count that lives in a device buffer.
//!
//! ```no_run
//! use wrdx::{gpu_utils, RadixSorter};
//!
//! let (device, queue) = gpu_utils::request_device_blocking(wgpu::Features::empty())?;
//! let keys = gpu_utils::create_storage_buffer(&device, "keys", &[5, 3, 9, 1]);
//! let mut sorter = RadixSorter::new(&device, &queue, 1024)?;
//! sorter.sort_keys(4, &keys);
//! assert_eq!(gpu_utils::read_buffer_u32(&device, &queue, &keys, 4)?, vec![1, 3, 5, 9]);
//! # Ok::<(), wrdx::SortError>(())
//! ```
#![warn(missing_docs)]

/// Host and device element counts, and the dispatch sizes they imply
pub mod count;

/// Errors of construction and of the helpers
pub mod error;

/// Device acquisition, upload and readback
pub mod gpu_utils;

/// WGSL kernels and their pipelines
pub mod kernels;

/// Internal buffers of a sorter
pub mod resources;

/// The sorting engine
pub mod sorter;

#[cfg(feature = "cli")]
pub mod cli;

/// Benchmark and adapter report behind the command line
#[cfg(feature = "cli")]
pub mod bench;

pub use count::ElementCount;
pub use error::SortError;
pub use kernels::ScatterVariant;
pub use sorter::{RadixSorter, SortRequest, SorterOptions};

#[cfg(feature = "cli")]
use crate::cli::*;

#[doc(hidden)]
#[cfg(feature = "cli")]
pub fn main() {
    let args = cli_args();
    let level = if args.verbose { log::Level::Info } else { log::Level::Warn };
    if let Err(e) = simple_logger::init_with_level(level) {
        eprintln!("Could not set up logging: {e}");
    }

    log::info!("Starting program!");
    let start = std::time::Instant::now();

    let outcome = match &args.command {
        Commands::Bench {
            elements,
            max_capacity,
            iterations,
            key_values,
            indirect,
            seed,
            subgroups,
        } => {
            let config = bench::BenchConfig {
                elements:     *elements,
                max_capacity: max_capacity.unwrap_or(*elements),
                iterations:   *iterations,
                key_values:   *key_values,
                indirect:     *indirect,
                seed:         *seed,
                subgroups:    *subgroups,
            };
            bench::run_bench(&config).map(|report| {
                eprintln!(
                    "Sorted {} {} {} times: mean {:.3} ms, {:.1} Mkeys/s",
                    config.elements,
                    if config.key_values { "key-value pairs" } else { "keys" },
                    config.iterations,
                    report.mean().as_secs_f64() * 1.0e3,
                    report.throughput(config.elements),
                );
                report.mismatches
            })
        }
        Commands::Info => bench::run_info().map(|_| 0),
    };

    match outcome {
        Ok(0) => {}
        Ok(mismatches) => {
            eprintln!("Output differs from the CPU reference at {mismatches} positions");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }

    log::info!("Finishing program! ({} ms)", start.elapsed().as_millis());
}
