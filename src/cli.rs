//! Command line interface, built using [`crate::clap` with `Derive`](https://docs.rs/clap/latest/clap/_derive/_tutorial/index.html)
use clap::{Parser, Subcommand};

/// Default number of keys to sort
pub const DEFAULT_ELEMENTS: u32 = 1 << 20;
/// Default number of timed sorts
pub const DEFAULT_ITERATIONS: usize = 10;
/// Default seed for the random input
pub const DEFAULT_SEED: u64 = 42;

#[doc(hidden)]
fn valid_iterations(s: &str) -> Result<usize, String> {
    let iterations: usize = s
        .parse()
        .map_err(|_| format!("`{s}` isn't a valid number of iterations"))?;
    if iterations < 1 {
        Err("Iterations must be one or higher".to_string())
    } else {
        Ok(iterations)
    }
}

/// Options that apply to all subcommands
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[doc(hidden)]
    #[command(subcommand)]
    pub command: Commands,

    /// Log progress at info level instead of warnings only
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Subcommands and their specific options
#[derive(Subcommand)]
pub enum Commands {
    /// Sort random keys on the GPU, check them against a CPU sort and report timings
    Bench {
        /// Number of keys to sort
        #[arg(short = 'n', long, default_value_t = DEFAULT_ELEMENTS)]
        elements: u32,

        /// Capacity of the sorter (defaults to the number of keys)
        #[arg(long)]
        max_capacity: Option<u32>,

        /// Number of timed sorts
        #[arg(short, long, value_parser = valid_iterations, default_value_t = DEFAULT_ITERATIONS)]
        iterations: usize,

        /// Carry a value per key (the key's original index)
        #[arg(long, default_value_t = false)]
        key_values: bool,

        /// Read the element count from a device buffer instead of passing it from the host
        #[arg(long, default_value_t = false)]
        indirect: bool,

        /// Seed of the random input
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Use subgroup operations in the prefix kernel (needs adapter support)
        #[arg(long, default_value_t = false)]
        subgroups: bool,
    },
    /// Print the adapter and the largest sorter it can hold
    Info,
}

/// Function to parse command line args into [`Args`] struct
pub fn cli_args() -> Args {
    Args::parse()
}
