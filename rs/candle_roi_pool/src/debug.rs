//! Statistics printed for intermediate tensors when the layer runs in debug mode.

use std::fmt;

use candle_core::{DType, Result, Tensor};

/// Summary of a tensor's values
#[derive(Debug, Clone, PartialEq)]
pub struct TensorStats {
    pub shape: Vec<usize>,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub sum: f32,
    /// NaN or infinite elements; these are left out of the other fields
    pub non_finite: usize,
}

impl TensorStats {
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let data: Vec<f32> = tensor.flatten_all()?.to_dtype(DType::F32)?.to_vec1()?;

        let finite: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
        let non_finite = data.len() - finite.len();
        let min = finite.iter().copied().fold(f32::INFINITY, f32::min);
        let max = finite.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let sum: f32 = finite.iter().sum();
        // No proposals means no elements
        let mean = if finite.is_empty() {
            0.0
        } else {
            sum / finite.len() as f32
        };

        Ok(Self {
            shape,
            min,
            max,
            mean,
            sum,
            non_finite,
        })
    }
}

impl fmt::Display for TensorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shape={:?}, min={:.6}, max={:.6}, mean={:.6}, sum={:.6}",
            self.shape, self.min, self.max, self.mean, self.sum
        )?;
        if self.non_finite > 0 {
            write!(f, ", non_finite={}", self.non_finite)?;
        }
        Ok(())
    }
}

pub fn print_tensor_stats(tensor: &Tensor, name: &str) -> Result<()> {
    let stats = TensorStats::from_tensor(tensor)?;
    println!("  {}: {}", name, stats);
    Ok(())
}
