//! ROI Pooling Layer
//!
//! Turns variable-sized region proposals into fixed-size feature patches
//! for the second stage of a Faster R-CNN detector.
//!
//! Crop mode (the default):
//! 1. Normalize proposal corners by the image shape
//! 2. Bilinear crop-and-resize every region to twice the pooled size
//! 3. 2x2 max pool with stride 2 down to the pooled size
//!
//! RoI pooling mode quantizes the region onto feature-map cells and takes
//! the maximum inside each of the `pooled_height x pooled_width` bins.
//!
//! Feature maps are channels-last: `[batch, height, width, channels]`.

use candle_core::{DType, Result, Tensor};

use crate::config::{Padding, PoolingMode, RoiPoolConfig};
use crate::crop_and_resize::crop_and_resize;
use crate::debug::print_tensor_stats;
use crate::proposals::{boxes_to_tensor, proposals_from_tensor, Proposal};

/// Fill value for crop samples that fall outside the feature map
const EXTRAPOLATION_VALUE: f64 = 0.0;

/// Result of a forward pass
#[derive(Debug, Clone)]
pub struct RoiPoolOutput {
    /// Pooled features, [num_proposals, pooled_height, pooled_width, channels]
    pub roi_pool: Tensor,
    /// Resized crops before max pooling, [num_proposals, 2 * pooled_height,
    /// 2 * pooled_width, channels]. Only produced in crop mode.
    pub crops: Option<Tensor>,
    /// Normalized [y1, x1, y2, x2] boxes, [num_proposals, 4]
    pub bboxes: Tensor,
    /// Feature-map batch element each crop was taken from, [num_proposals]
    pub batch_ids: Tensor,
}

/// ROI pooling layer
#[derive(Debug, Clone)]
pub struct RoiPoolingLayer {
    config: RoiPoolConfig,
    /// Print tensor statistics of intermediate results
    debug: bool,
}

impl RoiPoolingLayer {
    pub fn new(config: RoiPoolConfig, debug: bool) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, debug })
    }

    pub fn config(&self) -> &RoiPoolConfig {
        &self.config
    }

    /// Pool every proposal out of the feature map.
    ///
    /// # Arguments
    /// * `proposals` - Tensor of shape [N, 5], rows (batch_index, x1, y1, x2, y2)
    ///   in image coordinates
    /// * `feature_map` - Tensor of shape [B, H, W, C] or [H, W, C]
    /// * `im_shape` - Original image (height, width)
    pub fn forward(
        &self,
        proposals: &Tensor,
        feature_map: &Tensor,
        im_shape: (usize, usize),
    ) -> Result<RoiPoolOutput> {
        if im_shape.0 == 0 || im_shape.1 == 0 {
            candle_core::bail!("Image shape must be non-zero, got {:?}", im_shape);
        }
        let feature_map = first_image(feature_map)?;
        let proposals = proposals_from_tensor(proposals)?;
        let device = feature_map.device();

        let boxes: Vec<[f32; 4]> = proposals.iter().map(|p| p.normalized(im_shape)).collect();
        let bboxes = boxes_to_tensor(&boxes, device)?;
        // Faster R-CNN runs one image at a time: every crop comes from element 0
        let batch_ids = Tensor::zeros(proposals.len(), DType::U32, device)?;

        let (roi_pool, crops) = match self.config.pooling_mode {
            PoolingMode::Crop => {
                let crops = crop_and_resize(
                    &feature_map,
                    &boxes,
                    self.config.crop_size(),
                    EXTRAPOLATION_VALUE,
                )?;
                let pooled = max_pool_2x2(&crops, self.config.padding)?;
                (pooled, Some(crops))
            }
            PoolingMode::RoiPooling => {
                let pooled = self.roi_pooling(&feature_map, &proposals, im_shape)?;
                (pooled, None)
            }
        };

        if self.debug {
            println!(
                "ROI pooling: {} proposals, mode={}, pooled={}x{}, padding={}",
                proposals.len(),
                self.config.pooling_mode,
                self.config.pooled_height,
                self.config.pooled_width,
                self.config.padding
            );
            print_tensor_stats(&feature_map, "conv_feature_map")?;
            print_tensor_stats(&bboxes, "bboxes")?;
            if let Some(crops) = &crops {
                print_tensor_stats(crops, "crops")?;
            }
            print_tensor_stats(&roi_pool, "roi_pool")?;
        }

        Ok(RoiPoolOutput {
            roi_pool,
            crops,
            bboxes,
            batch_ids,
        })
    }

    /// Quantized max pooling over feature-map cells
    fn roi_pooling(
        &self,
        feature_map: &Tensor,
        proposals: &[Proposal],
        im_shape: (usize, usize),
    ) -> Result<Tensor> {
        let (height, width, channels) = feature_map.dims3()?;
        let (pooled_h, pooled_w) = (self.config.pooled_height, self.config.pooled_width);
        let feature_map = if feature_map.dtype().is_float() {
            feature_map.clone()
        } else {
            feature_map.to_dtype(DType::F32)?
        };
        if proposals.is_empty() {
            return Tensor::zeros(
                (0, pooled_h, pooled_w, channels),
                feature_map.dtype(),
                feature_map.device(),
            );
        }

        let scale_y = height as f32 / im_shape.0 as f32;
        let scale_x = width as f32 / im_shape.1 as f32;
        let empty_bin = Tensor::zeros(channels, feature_map.dtype(), feature_map.device())?;

        let mut pooled = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            let [x1, y1, x2, y2] = proposal.bbox;
            let rows = quantized_bins(y1 * scale_y, y2 * scale_y, height, pooled_h);
            let cols = quantized_bins(x1 * scale_x, x2 * scale_x, width, pooled_w);

            let mut bins = Vec::with_capacity(pooled_h * pooled_w);
            for &(h0, h1) in &rows {
                for &(w0, w1) in &cols {
                    if h1 <= h0 || w1 <= w0 {
                        bins.push(empty_bin.clone());
                        continue;
                    }
                    let bin = feature_map
                        .narrow(0, h0, h1 - h0)?
                        .narrow(1, w0, w1 - w0)?
                        .max(0)?
                        .max(0)?;
                    bins.push(bin);
                }
            }
            pooled.push(Tensor::stack(&bins, 0)?.reshape((pooled_h, pooled_w, channels))?);
        }
        Tensor::stack(&pooled, 0)
    }
}

/// Drop the batch dimension, keeping the first image.
fn first_image(feature_map: &Tensor) -> Result<Tensor> {
    if feature_map.rank() == 3 {
        return Ok(feature_map.clone());
    }
    let (batch, _, _, _) = feature_map.dims4()?;
    if batch == 0 {
        candle_core::bail!("Feature map has an empty batch: {:?}", feature_map.dims());
    }
    feature_map.get(0)
}

/// 2x2 max pool with stride 2 over a channels-last [N, H, W, C] tensor
pub fn max_pool_2x2(input: &Tensor, padding: Padding) -> Result<Tensor> {
    let (n, h, w, c) = input.dims4()?;
    let (out_h, out_w) = (padding.pooled_len(h), padding.pooled_len(w));
    if n == 0 || out_h == 0 || out_w == 0 {
        return Tensor::zeros((n, out_h, out_w, c), input.dtype(), input.device());
    }

    // [N, H, W, C] -> [N, C, H, W]
    let mut x = input.permute((0, 3, 1, 2))?;
    if padding == Padding::Same {
        // Repeating the edge leaves the max of the partial window unchanged
        if h % 2 == 1 {
            x = x.pad_with_same(2, 0, 1)?;
        }
        if w % 2 == 1 {
            x = x.pad_with_same(3, 0, 1)?;
        }
    }
    let pooled = x.contiguous()?.max_pool2d_with_stride(2, 2)?;
    pooled.permute((0, 2, 3, 1))?.contiguous()
}

/// Split the rounded range [start, end] into `bins` integer cell ranges,
/// each clipped to [0, len).
fn quantized_bins(start: f32, end: f32, len: usize, bins: usize) -> Vec<(usize, usize)> {
    let start = start.round();
    let end = end.round();
    let size = (end - start + 1.0).max(1.0);
    let bin_size = size / bins as f32;
    let limit = len as f32;

    (0..bins)
        .map(|i| {
            let lo = ((i as f32 * bin_size).floor() + start).clamp(0.0, limit);
            let hi = (((i + 1) as f32 * bin_size).ceil() + start).clamp(0.0, limit);
            (lo as usize, hi as usize)
        })
        .collect()
}
