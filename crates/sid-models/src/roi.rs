//! Regions of interest.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

fn default_roi_name() -> String {
    "default".to_string()
}

fn default_active() -> bool {
    true
}

/// Named rectangle in frame pixels used to scope detections spatially.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct RegionOfInterest {
    pub x: u32,
    pub y: u32,
    #[validate(range(min = 1))]
    pub width: u32,
    #[validate(range(min = 1))]
    pub height: u32,
    #[serde(default = "default_roi_name")]
    #[validate(length(min = 1, max = 128))]
    pub name: String,
}

impl RegionOfInterest {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            name: default_roi_name(),
        }
    }

    /// Whether a point lies inside the region, edges included.
    pub fn contains_point(&self, px: f32, py: f32) -> bool {
        let x1 = self.x as f32;
        let y1 = self.y as f32;
        let x2 = x1 + self.width as f32;
        let y2 = y1 + self.height as f32;
        px >= x1 && px <= x2 && py >= y1 && py <= y2
    }
}

/// A region as stored for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoredRoi {
    pub roi_id: String,
    pub user_id: String,
    pub roi: RegionOfInterest,
    #[serde(default = "default_active")]
    pub active: bool,
}
