//! ROI pooling for Faster R-CNN style detectors, built on candle.
//!
//! The layer takes a channels-last feature map, `[N, 5]` region proposals
//! in image coordinates and the image shape, and returns one
//! `pooled_height x pooled_width` patch per proposal.

pub mod config;
pub mod crop_and_resize;
pub mod debug;
pub mod proposals;
pub mod roi_pool;

pub use config::{Padding, PoolingMode, RoiPoolConfig};
pub use proposals::Proposal;
pub use roi_pool::{RoiPoolOutput, RoiPoolingLayer};
