//! Region proposals
//!
//! This module defines the Proposal struct: one row of the `[N, 5]`
//! proposals tensor fed to the ROI pooling layer.

use std::fmt;

use candle_core::{DType, Device, Result, Tensor};

/// Number of values per proposal row: batch index + 4 corners
pub const PROPOSAL_WIDTH: usize = 5;

/// A single region proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
    /// Leading column of the proposal row
    pub batch_index: f32,

    /// Region in [x1, y1, x2, y2] format (top-left and bottom-right corners).
    /// Coordinates are in pixel space of the original image.
    pub bbox: [f32; 4],
}

impl Proposal {
    pub fn new(batch_index: f32, bbox: [f32; 4]) -> Self {
        Self { batch_index, bbox }
    }

    /// Build a proposal from a `[batch_index, x1, y1, x2, y2]` row
    pub fn from_row(row: &[f32]) -> Result<Self> {
        match row {
            [b, x1, y1, x2, y2] => Ok(Self::new(*b, [*x1, *y1, *x2, *y2])),
            _ => candle_core::bail!(
                "Proposal rows must have {} values, got {}",
                PROPOSAL_WIDTH,
                row.len()
            ),
        }
    }

    pub fn width(&self) -> f32 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> f32 {
        self.bbox[3] - self.bbox[1]
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        let cx = (self.bbox[0] + self.bbox[2]) / 2.0;
        let cy = (self.bbox[1] + self.bbox[3]) / 2.0;
        (cx, cy)
    }

    /// Box as fractions of the image, in [y1, x1, y2, x2] order
    ///
    /// # Arguments
    /// * `im_shape` - Original image (height, width)
    pub fn normalized(&self, im_shape: (usize, usize)) -> [f32; 4] {
        let (im_h, im_w) = (im_shape.0 as f32, im_shape.1 as f32);
        let [x1, y1, x2, y2] = self.bbox;
        [y1 / im_h, x1 / im_w, y2 / im_h, x2 / im_w]
    }
}

impl fmt::Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Proposal {{ batch: {}, bbox: [{:.1}, {:.1}, {:.1}, {:.1}] }}",
            self.batch_index, self.bbox[0], self.bbox[1], self.bbox[2], self.bbox[3]
        )
    }
}

/// Read an `[N, 5]` proposals tensor into proposals
pub fn proposals_from_tensor(proposals: &Tensor) -> Result<Vec<Proposal>> {
    let (_, width) = proposals.dims2()?;
    if width != PROPOSAL_WIDTH {
        candle_core::bail!(
            "Proposals must have shape [N, {}], got {:?}",
            PROPOSAL_WIDTH,
            proposals.dims()
        );
    }
    let rows: Vec<Vec<f32>> = proposals.to_dtype(DType::F32)?.to_vec2()?;
    rows.iter().map(|row| Proposal::from_row(row)).collect()
}

/// Pack `[y1, x1, y2, x2]` boxes into an `[N, 4]` F32 tensor
pub fn boxes_to_tensor(boxes: &[[f32; 4]], device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = boxes.iter().flatten().copied().collect();
    Tensor::from_vec(data, (boxes.len(), 4), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_dimensions() {
        let p = Proposal::new(0.0, [10.0, 20.0, 110.0, 170.0]);
        assert_eq!(p.width(), 100.0);
        assert_eq!(p.height(), 150.0);
        assert_eq!(p.area(), 15000.0);
        assert_eq!(p.center(), (60.0, 95.0));
    }

    #[test]
    fn test_normalized_swaps_to_yx() {
        let p = Proposal::new(0.0, [1.0, 2.0, 4.0, 8.0]);
        assert_eq!(p.normalized((10, 20)), [0.2, 0.05, 0.8, 0.2]);
    }

    #[test]
    fn test_from_tensor() {
        let device = Device::Cpu;
        let t = Tensor::new(&[[0f32, 1., 1., 4., 4.], [3., 6., 6., 9., 9.]], &device).unwrap();
        let proposals = proposals_from_tensor(&t).unwrap();
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[1], Proposal::new(3.0, [6.0, 6.0, 9.0, 9.0]));

        let boxes: Vec<[f32; 4]> = proposals.iter().map(|p| p.normalized((10, 10))).collect();
        let boxes = boxes_to_tensor(&boxes, &device).unwrap();
        assert_eq!(boxes.dims(), &[2, 4]);
        let data: Vec<Vec<f32>> = boxes.to_vec2().unwrap();
        assert!((data[0][0] - 0.1).abs() < 1e-6);
        assert!((data[1][3] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_from_tensor_rejects_bad_shapes() {
        let device = Device::Cpu;
        let four_wide = Tensor::zeros((3, 4), DType::F32, &device).unwrap();
        assert!(proposals_from_tensor(&four_wide).is_err());
        let flat = Tensor::zeros(5, DType::F32, &device).unwrap();
        assert!(proposals_from_tensor(&flat).is_err());
    }

    #[test]
    fn test_from_tensor_accepts_integer_rows() {
        let device = Device::Cpu;
        let t = Tensor::new(&[[1i64, 6, 1, 9, 4]], &device).unwrap();
        let proposals = proposals_from_tensor(&t).unwrap();
        assert_eq!(proposals[0].batch_index, 1.0);
        assert_eq!(proposals[0].bbox, [6.0, 1.0, 9.0, 4.0]);
    }
}
