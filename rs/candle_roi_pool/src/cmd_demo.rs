//! Demo subcommand: pool proposals out of a synthetic four-block map.

use candle_core::{Device, Result, Tensor};
use candle_roi_pool::{Padding, PoolingMode, RoiPoolConfig, RoiPoolingLayer};
use clap::Args;

/// Arguments for the demo subcommand
#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Side of each constant block; the map is twice this size.
    #[arg(long, default_value_t = 5)]
    pub block_size: usize,

    /// Pooling mode: crop or roi_pooling.
    #[arg(long, default_value = "crop")]
    pub mode: PoolingMode,

    /// Print statistics of intermediate tensors.
    #[arg(long)]
    pub debug: bool,
}

/// Square `[1, 2b, 2b, 1]` map with blocks 1 | 2 over 3 | 4
pub fn block_feature_map(block_size: usize, device: &Device) -> Result<Tensor> {
    let side = block_size * 2;
    let data: Vec<f32> = (0..side * side)
        .map(|i| {
            let (y, x) = (i / side, i % side);
            1.0 + (x >= block_size) as u8 as f32 + 2.0 * (y >= block_size) as u8 as f32
        })
        .collect();
    Tensor::from_vec(data, (1, side, side, 1), device)
}

/// Run the demo subcommand
pub fn run(args: &DemoArgs, device: &Device) -> anyhow::Result<()> {
    if args.block_size < 2 {
        anyhow::bail!("Block size must be at least 2, got {}", args.block_size);
    }
    let side = args.block_size * 2;
    let feature_map = block_feature_map(args.block_size, device)?;

    // Proposals straddling each block boundary, a quarter of the way across
    let b = args.block_size as f32;
    let s = side as f32 - 1.0;
    let q = (b * 0.6).round();
    let proposals = [
        [0.0, b - 1.0, 1.0, b + 2.0, b - 1.0],
        [1.0, 1.0, b - 1.0, b - 1.0, b + 3.0],
        [2.0, b, b - 1.0, s, b + 3.0],
        [3.0, b - 1.0, b + 1.0, b + 2.0, s],
        [0.0, q, q, s - q, s - q],
    ];
    let flat: Vec<f32> = proposals.iter().flatten().copied().collect();
    let proposals = Tensor::from_vec(flat, (proposals.len(), 5), device)?;

    let config = RoiPoolConfig::new(args.mode, 2, 2, Padding::Valid);
    println!("Feature map: {0}x{0}, 2x2 blocks of {1}", side, args.block_size);
    println!("Config: {:?}", config);

    let layer = RoiPoolingLayer::new(config, args.debug)?;
    let output = layer.forward(&proposals, &feature_map, (side, side))?;

    let pooled = output.roi_pool.squeeze(3)?;
    let rows: Vec<Vec<f32>> = proposals.to_vec2()?;
    for (i, row) in rows.iter().enumerate() {
        let grid: Vec<Vec<f32>> = pooled.get(i)?.to_vec2()?;
        println!("proposal {:?}", &row[1..]);
        for line in grid {
            let cells: Vec<String> = line.iter().map(|v| format!("{:6.3}", v)).collect();
            println!("  [{}]", cells.join(", "));
        }
    }

    Ok(())
}
