//! Pool subcommand: run the ROI pooling layer on files from disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_roi_pool::{Padding, PoolingMode, RoiPoolConfig, RoiPoolingLayer};
use clap::Args;
use image::DynamicImage;
use ndarray::ArrayD;
use ndarray_npy::ReadNpyExt;

/// Arguments for the pool subcommand
#[derive(Args, Debug)]
pub struct PoolArgs {
    /// Feature map in .npy format, shaped [B, H, W, C] or [H, W, C].
    #[arg(long, conflicts_with = "image", required_unless_present = "image")]
    pub feature_map: Option<PathBuf>,

    /// Image to use as a [1, H, W, 3] feature map with values in [0, 1].
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Proposals in .npy format, shaped [N, 5] as (batch_index, x1, y1, x2, y2).
    #[arg(long)]
    pub proposals: PathBuf,

    /// Height of the original image, defaults to the feature map height.
    #[arg(long)]
    pub im_height: Option<usize>,

    /// Width of the original image, defaults to the feature map width.
    #[arg(long)]
    pub im_width: Option<usize>,

    /// JSON file with the pooling configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pooling mode: crop or roi_pooling.
    #[arg(long)]
    pub mode: Option<PoolingMode>,

    /// Width of the pooled output.
    #[arg(long)]
    pub pooled_width: Option<usize>,

    /// Height of the pooled output.
    #[arg(long)]
    pub pooled_height: Option<usize>,

    /// Max-pool padding: VALID or SAME.
    #[arg(long)]
    pub padding: Option<Padding>,

    /// Output file for the pooled tensors.
    #[arg(long, short, default_value = "roi_pool.safetensors")]
    pub output: PathBuf,

    /// Also write every crop as a PNG into this directory.
    #[arg(long)]
    pub save_crops: Option<PathBuf>,

    /// Print statistics of intermediate tensors.
    #[arg(long)]
    pub debug: bool,
}

impl PoolArgs {
    /// Configuration file (or defaults) with command line overrides applied
    fn pool_config(&self) -> anyhow::Result<RoiPoolConfig> {
        let mut config = match &self.config {
            Some(path) => RoiPoolConfig::from_json_file(path)?,
            None => RoiPoolConfig::default(),
        };
        if let Some(mode) = self.mode {
            config.pooling_mode = mode;
        }
        if let Some(width) = self.pooled_width {
            config.pooled_width = width;
        }
        if let Some(height) = self.pooled_height {
            config.pooled_height = height;
        }
        if let Some(padding) = self.padding {
            config.padding = padding;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Load a numpy array as an F32 tensor.
///
/// numpy writes float64 and int64 by default, so those (and int32) are
/// accepted and cast.
fn load_npy(path: &Path, device: &Device) -> anyhow::Result<Tensor> {
    let bytes =
        std::fs::read(path).map_err(|e| anyhow::anyhow!("Failed to open {:?}: {}", path, e))?;

    let f32_err = match ArrayD::<f32>::read_npy(bytes.as_slice()) {
        Ok(arr) => return array_to_tensor(arr, device),
        Err(e) => e,
    };
    if let Ok(arr) = ArrayD::<f64>::read_npy(bytes.as_slice()) {
        return array_to_tensor(arr.mapv(|v| v as f32), device);
    }
    if let Ok(arr) = ArrayD::<i64>::read_npy(bytes.as_slice()) {
        return array_to_tensor(arr.mapv(|v| v as f32), device);
    }
    if let Ok(arr) = ArrayD::<i32>::read_npy(bytes.as_slice()) {
        return array_to_tensor(arr.mapv(|v| v as f32), device);
    }
    anyhow::bail!(
        "Unsupported npy file {:?}, expected f32, f64, i64 or i32 data: {}",
        path,
        f32_err
    )
}

fn array_to_tensor(arr: ArrayD<f32>, device: &Device) -> anyhow::Result<Tensor> {
    let shape: Vec<usize> = arr.shape().to_vec();
    let data: Vec<f32> = arr.into_iter().collect();
    Ok(Tensor::from_vec(data, shape, device)?)
}

/// Convert an image to a [1, H, W, 3] tensor with values in [0, 1]
pub fn image_to_feature_map(img: &DynamicImage, device: &Device) -> candle_core::Result<Tensor> {
    let img = img.to_rgb8();
    let (width, height) = img.dimensions();

    // Raw RGB bytes are already row-major HWC
    let data: Vec<f32> = img.into_raw().iter().map(|&x| x as f32 / 255.0).collect();

    Tensor::from_vec(data, (1, height as usize, width as usize, 3), device)
}

/// Write every [crop_h, crop_w, C] crop as an 8-bit PNG
fn save_crops(crops: &Tensor, dir: &Path) -> anyhow::Result<()> {
    let (n, crop_h, crop_w, channels) = crops.dims4()?;
    if channels != 1 && channels != 3 {
        anyhow::bail!(
            "Can only save crops with 1 or 3 channels, feature map has {}",
            channels
        );
    }
    std::fs::create_dir_all(dir)?;

    let crops = crops.to_device(&Device::Cpu)?.to_dtype(DType::F32)?;
    for i in 0..n {
        let pixels: Vec<u8> = crops
            .get(i)?
            .flatten_all()?
            .to_vec1::<f32>()?
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        let (w, h) = (crop_w as u32, crop_h as u32);
        let img = if channels == 3 {
            image::RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8)
        } else {
            image::GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8)
        };
        let Some(img) = img else {
            anyhow::bail!("Crop {} does not fit a {}x{} image", i, w, h);
        };
        img.save(dir.join(format!("crop_{:04}.png", i)))?;
    }
    println!("Saved {} crops to {:?}", n, dir);
    Ok(())
}

/// Run the pool subcommand
pub fn run(args: &PoolArgs, device: &Device) -> anyhow::Result<()> {
    let config = args.pool_config()?;
    println!("Pooling config:");
    println!("  Mode: {}", config.pooling_mode);
    println!(
        "  Pooled size: {}x{}",
        config.pooled_height, config.pooled_width
    );
    println!("  Padding: {}", config.padding);

    let feature_map = match (&args.feature_map, &args.image) {
        (Some(path), _) => {
            println!("Loading feature map from: {:?}", path);
            load_npy(path, device)?
        }
        (None, Some(path)) => {
            println!("Loading image from: {:?}", path);
            let img = image::ImageReader::open(path)?.decode()?;
            image_to_feature_map(&img, device)?
        }
        (None, None) => anyhow::bail!("Either --feature-map or --image is required"),
    };
    println!("  Feature map shape: {:?}", feature_map.dims());

    // Spatial dims sit in front of the channel dim for both [B, H, W, C] and [H, W, C]
    let dims = feature_map.dims();
    if dims.len() < 3 {
        anyhow::bail!(
            "Feature map must be [B, H, W, C] or [H, W, C], got {:?}",
            dims
        );
    }
    let (map_h, map_w) = (dims[dims.len() - 3], dims[dims.len() - 2]);
    let im_shape = (
        args.im_height.unwrap_or(map_h),
        args.im_width.unwrap_or(map_w),
    );
    println!("  Image shape: {}x{}", im_shape.0, im_shape.1);

    let proposals = load_npy(&args.proposals, device)?;
    println!("  Proposals shape: {:?}", proposals.dims());

    let layer = RoiPoolingLayer::new(config, args.debug)?;
    let output = layer.forward(&proposals, &feature_map, im_shape)?;
    println!("  roi_pool shape: {:?}", output.roi_pool.dims());

    let mut tensors = HashMap::new();
    tensors.insert("roi_pool".to_string(), output.roi_pool.clone());
    tensors.insert("bboxes".to_string(), output.bboxes.clone());
    tensors.insert("batch_ids".to_string(), output.batch_ids.clone());
    if let Some(crops) = &output.crops {
        tensors.insert("crops".to_string(), crops.clone());
    }
    candle_core::safetensors::save(&tensors, &args.output)?;
    println!("Pooled tensors saved to: {:?}", args.output);

    if let Some(dir) = &args.save_crops {
        match &output.crops {
            Some(crops) => save_crops(crops, dir)?,
            None => println!(
                "No crops in {} mode, skipping --save-crops",
                layer.config().pooling_mode
            ),
        }
    }

    Ok(())
}
