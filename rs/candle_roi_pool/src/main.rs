//! ROI pooling with Candle
//!
//! This binary runs the Faster R-CNN ROI pooling layer on feature maps
//! stored as `.npy` files or on plain images.

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

mod cmd_demo;
mod cmd_pool;

use candle_core::{Device, Result};
use clap::{Parser, Subcommand};

/// Select the compute device
pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if candle_core::utils::cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if candle_core::utils::metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            println!(
                "Running on CPU, to run on GPU(metal), build this example with `--features metal`"
            );
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            println!("Running on CPU, to run on GPU, build this example with `--features cuda`");
        }
        Ok(Device::Cpu)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pool proposals out of a feature map or image.
    Pool(cmd_pool::PoolArgs),
    /// Run the layer on a synthetic four-block feature map.
    Demo(cmd_demo::DemoArgs),
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Run on CPU rather than on GPU.
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Command,
}

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let device = device(args.cpu)?;
    println!("Using device: {:?}", device);

    match &args.command {
        Command::Pool(pool_args) => cmd_pool::run(pool_args, &device),
        Command::Demo(demo_args) => cmd_demo::run(demo_args, &device),
    }
}
