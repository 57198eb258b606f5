//! Layer placement
//!
//! Screen is always the background, camera always the foreground. The camera
//! fills the canvas on its own and shrinks to a bottom-right inset when the
//! screen is showing.

use crate::config::CompositorConfig;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Screen,
    Camera,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub layer: Layer,
    pub rect: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutPolicy {
    pub width: u32,
    pub height: u32,
    pub inset_divisor: u32,
    pub inset_margin: u32,
}

impl LayoutPolicy {
    pub fn from_config(config: &CompositorConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            inset_divisor: config.inset_divisor.max(1),
            inset_margin: config.inset_margin,
        }
    }

    pub fn full_frame(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Picture-in-picture rect for the camera
    pub fn inset(&self) -> Rect {
        let width = self.width / self.inset_divisor;
        let height = self.height / self.inset_divisor;
        Rect::new(
            self.width.saturating_sub(width + self.inset_margin),
            self.height.saturating_sub(height + self.inset_margin),
            width,
            height,
        )
    }

    /// Draw list, back to front
    pub fn plan(&self, screen: bool, camera: bool) -> Vec<Placement> {
        let mut placements = Vec::with_capacity(2);
        if screen {
            placements.push(Placement {
                layer: Layer::Screen,
                rect: self.full_frame(),
            });
        }
        if camera {
            let rect = if screen { self.inset() } else { self.full_frame() };
            placements.push(Placement {
                layer: Layer::Camera,
                rect,
            });
        }
        placements
    }
}

impl Default for LayoutPolicy {
    fn default() -> Self {
        Self::from_config(&CompositorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_active_is_empty() {
        assert!(LayoutPolicy::default().plan(false, false).is_empty());
    }

    #[test]
    fn test_single_sources_fill_canvas() {
        let policy = LayoutPolicy::default();
        let full = Rect::new(0, 0, 1920, 1080);
        assert_eq!(policy.plan(true, false), vec![Placement { layer: Layer::Screen, rect: full }]);
        assert_eq!(policy.plan(false, true), vec![Placement { layer: Layer::Camera, rect: full }]);
    }

    #[test]
    fn test_camera_inset_over_screen() {
        let plan = LayoutPolicy::default().plan(true, true);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].layer, Layer::Screen);
        assert_eq!(plan[1].layer, Layer::Camera);
        assert_eq!(plan[1].rect, Rect::new(1430, 800, 480, 270));
    }
}
