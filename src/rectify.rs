use anyhow::{Result, anyhow};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};

use crate::geometry::Quad;

/// 把图像中的四边形区域校正为规范尺寸的竖向卡牌图像
pub trait Rectifier: Send + Sync {
    fn size(&self) -> (u32, u32);

    fn rectify(&self, image: &RgbImage, quad: &Quad) -> Result<RgbImage>;
}

pub struct PerspectiveRectifier {
    width: u32,
    height: u32,
}

impl PerspectiveRectifier {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Rectifier for PerspectiveRectifier {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn rectify(&self, image: &RgbImage, quad: &Quad) -> Result<RgbImage> {
        if self.width < 2 || self.height < 2 {
            return Err(anyhow!("无效的规范尺寸: {}x{}", self.width, self.height));
        }
        if quad.area() < 1. || !quad.ordered().is_convex() {
            return Err(anyhow!("四边形退化: {:?}", quad.corners));
        }

        let (w, h) = ((self.width - 1) as f32, (self.height - 1) as f32);
        let from = quad.portrait_corners().map(|p| (p.x as f32, p.y as f32));
        let to = [(0., 0.), (w, 0.), (w, h), (0., h)];
        let projection = Projection::from_control_points(from, to)
            .ok_or_else(|| anyhow!("无法计算透视变换: {:?}", quad.corners))?;

        let mut output = RgbImage::new(self.width, self.height);
        warp_into(image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut output);
        Ok(output)
    }
}
