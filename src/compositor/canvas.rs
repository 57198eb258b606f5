//! RGBA drawing surface

use super::layout::Rect;
use crate::capture::VideoFrame;

/// Fixed-size RGBA8 surface
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Reset every pixel to transparent black
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Stretch `image` into `dest` with nearest-neighbour sampling
    ///
    /// Parts of `dest` outside the canvas are clipped. Frames whose buffer
    /// does not match their declared size are skipped. Returns whether
    /// anything was drawn.
    pub fn draw_image(&mut self, image: &VideoFrame, dest: Rect) -> bool {
        if image.width == 0 || image.height == 0 || dest.width == 0 || dest.height == 0 {
            return false;
        }
        if image.data.len() != image.expected_len() {
            tracing::warn!(
                "Skipping frame with size mismatch: got {}, expected {} ({}x{}x4)",
                image.data.len(),
                image.expected_len(),
                image.width,
                image.height
            );
            return false;
        }
        if dest.x >= self.width || dest.y >= self.height {
            return false;
        }

        let visible_width = dest.width.min(self.width - dest.x);
        let visible_height = dest.height.min(self.height - dest.y);

        // Source column per destination column, computed once per draw
        let columns: Vec<usize> = (0..visible_width)
            .map(|dx| {
                let src_x = (dx as u64 * image.width as u64 / dest.width as u64) as u32;
                src_x.min(image.width - 1) as usize * 4
            })
            .collect();

        let canvas_stride = self.width as usize * 4;
        let image_stride = image.width as usize * 4;
        for dy in 0..visible_height {
            let src_y = ((dy as u64 * image.height as u64 / dest.height as u64) as u32).min(image.height - 1);
            let src_row = &image.data[src_y as usize * image_stride..(src_y as usize + 1) * image_stride];
            let row_start = (dest.y + dy) as usize * canvas_stride + dest.x as usize * 4;
            let dest_row = &mut self.data[row_start..row_start + visible_width as usize * 4];

            for (pixel, &src) in dest_row.chunks_exact_mut(4).zip(&columns) {
                pixel[0] = src_row[src];
                pixel[1] = src_row[src + 1];
                pixel[2] = src_row[src + 2];
                pixel[3] = 255;
            }
        }
        true
    }

    /// Copy of the current surface
    pub fn snapshot(&self, timestamp_ms: f64) -> VideoFrame {
        VideoFrame::new(self.width, self.height, self.data.clone(), timestamp_ms)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2], self.data[idx + 3]])
    }

    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }
}
