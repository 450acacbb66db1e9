//! Bilinear crop-and-resize
//!
//! Extracts a fixed-size patch for every box from an `[H, W, C]` image (or
//! feature map), sampling off-grid points with bilinear interpolation.
//! Boxes are normalized `[y1, x1, y2, x2]`; a coordinate of 0 maps to the
//! first row/column and 1 to the last, so sample `i` of `n` lands at
//! `y1 * (H - 1) + i * (y2 - y1) * (H - 1) / (n - 1)`.
//!
//! Samples outside the image take `extrapolation_value`.

use candle_core::{DType, Device, Result, Tensor};

/// Sample positions along one spatial axis of a single crop
#[derive(Debug, Clone, PartialEq)]
struct SampleAxis {
    /// Grid index at or below each sample
    lower: Vec<u32>,
    /// Grid index at or above each sample
    upper: Vec<u32>,
    /// Fractional distance from `lower` towards `upper`
    lerp: Vec<f32>,
    /// False for samples outside the image
    valid: Vec<bool>,
}

impl SampleAxis {
    /// Sample `samples` points between normalized `start` and `end` on an
    /// axis of `len` grid cells.
    fn new(start: f32, end: f32, len: usize, samples: usize) -> Self {
        let extent = (len - 1) as f32;
        let scale = if samples > 1 {
            (end - start) * extent / (samples - 1) as f32
        } else {
            0.0
        };

        let mut axis = Self {
            lower: Vec::with_capacity(samples),
            upper: Vec::with_capacity(samples),
            lerp: Vec::with_capacity(samples),
            valid: Vec::with_capacity(samples),
        };
        for i in 0..samples {
            let pos = if samples > 1 {
                start * extent + i as f32 * scale
            } else {
                0.5 * (start + end) * extent
            };
            // Negated comparison so NaN coordinates count as outside
            if !(pos >= 0.0 && pos <= extent) {
                axis.lower.push(0);
                axis.upper.push(0);
                axis.lerp.push(0.0);
                axis.valid.push(false);
                continue;
            }
            let lower = pos.floor();
            axis.lower.push(lower as u32);
            axis.upper.push(pos.ceil() as u32);
            axis.lerp.push(pos - lower);
            axis.valid.push(true);
        }
        axis
    }

    fn len(&self) -> usize {
        self.lerp.len()
    }

    /// Blend the lower and upper neighbours of every sample along `dim`.
    ///
    /// `shape` is the broadcast shape of the per-sample weight tensor.
    fn interpolate(&self, input: &Tensor, dim: usize, shape: &[usize]) -> Result<Tensor> {
        let device = input.device();
        let lower = Tensor::new(self.lower.as_slice(), device)?;
        let upper = Tensor::new(self.upper.as_slice(), device)?;
        let lerp = weights(&self.lerp, shape, input.dtype(), device)?;

        let lo = input.index_select(&lower, dim)?;
        let hi = input.index_select(&upper, dim)?;
        lo.add(&hi.sub(&lo)?.broadcast_mul(&lerp)?)
    }
}

fn weights(values: &[f32], shape: &[usize], dtype: DType, device: &Device) -> Result<Tensor> {
    Tensor::from_slice(values, shape, device)?.to_dtype(dtype)
}

/// Crop `boxes` out of `image` and resize each to `crop_size`.
///
/// # Arguments
/// * `image` - Tensor of shape [H, W, C]
/// * `boxes` - Normalized boxes as [y1, x1, y2, x2]
/// * `crop_size` - Output (height, width) of every crop
/// * `extrapolation_value` - Fill value for samples outside the image
///
/// # Returns
/// Tensor of shape [num_boxes, crop_height, crop_width, C]. Integer inputs
/// are sampled as F32.
pub fn crop_and_resize(
    image: &Tensor,
    boxes: &[[f32; 4]],
    crop_size: (usize, usize),
    extrapolation_value: f64,
) -> Result<Tensor> {
    let (height, width, channels) = image.dims3()?;
    let (crop_h, crop_w) = crop_size;
    if height == 0 || width == 0 {
        candle_core::bail!("Cannot crop from an empty image of shape {:?}", image.dims());
    }
    if crop_h == 0 || crop_w == 0 {
        candle_core::bail!("Crop size must be positive, got {:?}", crop_size);
    }

    let image = if image.dtype().is_float() {
        image.clone()
    } else {
        image.to_dtype(DType::F32)?
    };

    if boxes.is_empty() {
        return Tensor::zeros(
            (0, crop_h, crop_w, channels),
            image.dtype(),
            image.device(),
        );
    }

    let crops = boxes
        .iter()
        .map(|&[y1, x1, y2, x2]| {
            let ys = SampleAxis::new(y1, y2, height, crop_h);
            let xs = SampleAxis::new(x1, x2, width, crop_w);
            crop_one(&image, &ys, &xs, extrapolation_value)
        })
        .collect::<Result<Vec<_>>>()?;

    Tensor::stack(&crops, 0)
}

fn crop_one(image: &Tensor, ys: &SampleAxis, xs: &SampleAxis, extrapolation: f64) -> Result<Tensor> {
    let (crop_h, crop_w) = (ys.len(), xs.len());
    let dtype = image.dtype();
    let device = image.device();

    // [H, W, C] -> [crop_h, W, C] -> [crop_h, crop_w, C]
    let rows = ys.interpolate(image, 0, &[crop_h, 1, 1])?;
    let crop = xs.interpolate(&rows, 1, &[1, crop_w, 1])?;

    // Outside samples read cell 0, which may hold anything: select, never blend
    let inside: Vec<u8> = ys
        .valid
        .iter()
        .flat_map(|&y| xs.valid.iter().map(move |&x| u8::from(y && x)))
        .collect();
    if inside.iter().all(|&v| v == 1) {
        return Ok(crop);
    }
    let mask = Tensor::from_vec(inside, (crop_h, crop_w, 1), device)?
        .broadcast_as(crop.dims())?
        .contiguous()?;
    let fill = Tensor::zeros(crop.dims(), dtype, device)?.affine(0.0, extrapolation)?;

    mask.where_cond(&crop, &fill)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(values: &[f32], h: usize, w: usize) -> Tensor {
        Tensor::from_slice(values, (h, w, 1), &Device::Cpu).unwrap()
    }

    fn crop_values(crops: &Tensor, index: usize) -> Vec<Vec<f32>> {
        crops
            .get(index)
            .unwrap()
            .squeeze(2)
            .unwrap()
            .to_dtype(DType::F32)
            .unwrap()
            .to_vec2()
            .unwrap()
    }

    fn assert_close(actual: &[Vec<f32>], expected: &[&[f32]]) {
        assert_eq!(actual.len(), expected.len(), "row count mismatch");
        for (row, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert_eq!(a.len(), e.len(), "column count mismatch in row {}", row);
            for (col, (a, e)) in a.iter().zip(e.iter()).enumerate() {
                assert!(
                    (a - e).abs() < 1e-5,
                    "value mismatch at ({}, {}): got {}, expected {}",
                    row,
                    col,
                    a,
                    e
                );
            }
        }
    }

    #[test]
    fn test_sample_axis_positions() {
        let axis = SampleAxis::new(0.1, 0.4, 10, 4);
        assert_eq!(axis.lower, vec![0, 1, 2, 3]);
        assert_eq!(axis.upper, vec![1, 2, 3, 4]);
        for (lerp, expected) in axis.lerp.iter().zip([0.9, 0.8, 0.7, 0.6]) {
            assert!((lerp - expected).abs() < 1e-4, "lerp {} != {}", lerp, expected);
        }
        assert_eq!(axis.valid, vec![true; 4]);
    }

    #[test]
    fn test_sample_axis_single_sample_uses_center() {
        let axis = SampleAxis::new(0.0, 1.0, 5, 1);
        assert_eq!(axis.lower, vec![2]);
        assert_eq!(axis.upper, vec![2]);
        assert_eq!(axis.lerp, vec![0.0]);
    }

    #[test]
    fn test_sample_axis_outside_is_invalid() {
        let axis = SampleAxis::new(-1.0, 2.0, 2, 4);
        assert_eq!(axis.valid, vec![false, true, true, false]);
        assert_eq!(axis.lower, vec![0, 0, 1, 0]);
    }

    #[test]
    fn test_full_box_reproduces_image() {
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let image = grid(&values, 4, 4);
        let crops = crop_and_resize(&image, &[[0.0, 0.0, 1.0, 1.0]], (4, 4), 0.0).unwrap();
        assert_eq!(crops.dims(), &[1, 4, 4, 1]);
        let flat: Vec<f32> = crops.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(flat, values);
    }

    #[test]
    fn test_bilinear_midpoints() {
        let image = grid(&[0.0, 1.0, 2.0, 3.0], 2, 2);
        let crops = crop_and_resize(&image, &[[0.0, 0.0, 1.0, 1.0]], (3, 3), 0.0).unwrap();
        assert_close(
            &crop_values(&crops, 0),
            &[&[0.0, 0.5, 1.0], &[1.0, 1.5, 2.0], &[2.0, 2.5, 3.0]],
        );
    }

    #[test]
    fn test_quarter_offset_blend() {
        // Columns 0..=4 hold 1, columns 5..=9 hold 2; sampling starts 0.6
        // of a cell before the boundary.
        let mut values = vec![1.0f32; 10];
        values[5..].fill(2.0);
        let image = grid(&values, 1, 10);
        let crops = crop_and_resize(&image, &[[0.0, 0.4, 0.0, 0.7]], (1, 4), 0.0).unwrap();
        assert_close(&crop_values(&crops, 0), &[&[1.0, 1.5, 2.0, 2.0]]);
    }

    #[test]
    fn test_extrapolation_fills_outside_samples() {
        let image = grid(&[0.0, 1.0, 2.0, 3.0], 2, 2);
        let crops = crop_and_resize(&image, &[[-1.0, -1.0, 2.0, 2.0]], (4, 4), 7.0).unwrap();
        assert_close(
            &crop_values(&crops, 0),
            &[
                &[7.0, 7.0, 7.0, 7.0],
                &[7.0, 0.0, 1.0, 7.0],
                &[7.0, 2.0, 3.0, 7.0],
                &[7.0, 7.0, 7.0, 7.0],
            ],
        );
    }

    #[test]
    fn test_extrapolation_ignores_non_finite_cells() {
        for corner in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let image = grid(&[corner, 1.0, 2.0, 3.0], 2, 2);
            let crops = crop_and_resize(&image, &[[5.0, 5.0, 6.0, 6.0]], (2, 2), 0.0).unwrap();
            assert_close(&crop_values(&crops, 0), &[&[0.0, 0.0], &[0.0, 0.0]]);
        }
    }

    #[test]
    fn test_partially_outside_box_keeps_inside_samples() {
        let image = grid(&[f32::NAN, 1.0, 2.0, 3.0], 2, 2);
        // Rows at -1 (outside) and 1; columns at 1 and 2 (outside)
        let crops = crop_and_resize(&image, &[[-1.0, 1.0, 1.0, 2.0]], (2, 2), -1.0).unwrap();
        assert_close(&crop_values(&crops, 0), &[&[-1.0, -1.0], &[3.0, -1.0]]);
    }

    #[test]
    fn test_channels_are_independent() {
        // Channel 0 counts up, channel 1 is constant
        let data = vec![0.0f32, 5.0, 1.0, 5.0, 2.0, 5.0, 3.0, 5.0];
        let image = Tensor::from_vec(data, (2, 2, 2), &Device::Cpu).unwrap();
        let crops = crop_and_resize(&image, &[[0.0, 0.0, 1.0, 1.0]], (1, 1), 0.0).unwrap();
        assert_eq!(crops.dims(), &[1, 1, 1, 2]);
        let flat: Vec<f32> = crops.flatten_all().unwrap().to_vec1().unwrap();
        assert!((flat[0] - 1.5).abs() < 1e-6);
        assert!((flat[1] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_multiple_boxes_and_integer_input() {
        let image = Tensor::new(&[[[1u32], [2]], [[3], [4]]], &Device::Cpu).unwrap();
        let boxes = [[0.0, 0.0, 0.0, 0.0], [1.0, 1.0, 1.0, 1.0]];
        let crops = crop_and_resize(&image, &boxes, (2, 2), 0.0).unwrap();
        assert_eq!(crops.dims(), &[2, 2, 2, 1]);
        assert_eq!(crops.dtype(), DType::F32);
        assert_close(&crop_values(&crops, 0), &[&[1.0, 1.0], &[1.0, 1.0]]);
        assert_close(&crop_values(&crops, 1), &[&[4.0, 4.0], &[4.0, 4.0]]);
    }

    #[test]
    fn test_no_boxes() {
        let image = Tensor::zeros((4, 4, 3), DType::F32, &Device::Cpu).unwrap();
        let crops = crop_and_resize(&image, &[], (2, 6), 0.0).unwrap();
        assert_eq!(crops.dims(), &[0, 2, 6, 3]);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let image = Tensor::zeros((4, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(crop_and_resize(&image, &[[0.0, 0.0, 1.0, 1.0]], (2, 2), 0.0).is_err());

        let image = Tensor::zeros((4, 4, 1), DType::F32, &Device::Cpu).unwrap();
        assert!(crop_and_resize(&image, &[[0.0, 0.0, 1.0, 1.0]], (0, 2), 0.0).is_err());
    }
}
