//! Vertical compositor: center-crop and scale a frame onto a fixed canvas

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Pixel buffer handed to encoders
pub type PixelBuffer = RgbaImage;

/// Source rectangle selected for the output canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Largest centered rectangle of the target aspect ratio inside the source.
///
/// Wider sources keep their full height and lose width symmetrically; taller
/// sources keep their full width and lose height.
pub fn compute_crop(src_width: u32, src_height: u32, target_width: u32, target_height: u32) -> CropRect {
    if src_width == 0 || src_height == 0 || target_width == 0 || target_height == 0 {
        return CropRect {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        };
    }

    let video_aspect = src_width as f64 / src_height as f64;
    let target_aspect = target_width as f64 / target_height as f64;

    if video_aspect > target_aspect {
        let width = ((src_height as f64 * target_aspect).round() as u32).clamp(1, src_width);
        CropRect {
            x: (src_width - width) / 2,
            y: 0,
            width,
            height: src_height,
        }
    } else {
        let height = ((src_width as f64 / target_aspect).round() as u32).clamp(1, src_height);
        CropRect {
            x: 0,
            y: (src_height - height) / 2,
            width: src_width,
            height,
        }
    }
}

/// Crops and resamples frames to a fixed output size
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    width: u32,
    height: u32,
    filter: FilterType,
}

impl Compositor {
    /// Compositor for a `width` x `height` canvas with bicubic resampling
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            filter: FilterType::CatmullRom,
        }
    }

    /// Override the resampling filter. Nearest-neighbour is not accepted.
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        if filter != FilterType::Nearest {
            self.filter = filter;
        }
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Composite one frame. The result is always exactly `width` x `height`.
    pub fn composite(&self, frame: &RgbaImage) -> PixelBuffer {
        let crop = compute_crop(frame.width(), frame.height(), self.width, self.height);
        if crop.is_empty() {
            return black_canvas(self.width, self.height);
        }

        let view = imageops::crop_imm(frame, crop.x, crop.y, crop.width, crop.height);
        if crop.width == self.width && crop.height == self.height {
            return view.to_image();
        }
        imageops::resize(&*view, self.width, self.height, self.filter)
    }
}

/// Convenience wrapper around [`Compositor::composite`]
pub fn composite(frame: &RgbaImage, target_width: u32, target_height: u32) -> PixelBuffer {
    Compositor::new(target_width, target_height).composite(frame)
}

fn black_canvas(width: u32, height: u32) -> PixelBuffer {
    RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(rgba))
    }

    #[test]
    fn test_crop_wide_source() {
        let crop = compute_crop(1920, 1080, 1080, 1920);
        assert_eq!(crop.height, 1080);
        assert_eq!(crop.width, 608);
        assert_eq!(crop.x, (1920 - 608) / 2);
        assert_eq!(crop.y, 0);
    }

    #[test]
    fn test_crop_square_source() {
        let crop = compute_crop(1000, 1000, 1080, 1920);
        assert_eq!(crop.width, 563);
        assert_eq!(crop.x, 218);
    }

    #[test]
    fn test_crop_tall_source() {
        let crop = compute_crop(720, 1600, 1080, 1920);
        assert_eq!(crop.width, 720);
        assert_eq!(crop.height, 1280);
        assert_eq!(crop.y, 160);
    }

    #[test]
    fn test_crop_exact_aspect_is_identity() {
        let crop = compute_crop(540, 960, 1080, 1920);
        assert_eq!(
            crop,
            CropRect {
                x: 0,
                y: 0,
                width: 540,
                height: 960
            }
        );
    }

    #[test]
    fn test_output_dimensions_for_common_aspects() {
        let compositor = Compositor::new(108, 192);
        for (w, h) in [(320, 180), (200, 200), (180, 320), (1, 500), (500, 1)] {
            let out = compositor.composite(&solid(w, h, [10, 20, 30, 255]));
            assert_eq!(out.dimensions(), (108, 192), "input {w}x{h}");
        }
    }

    #[test]
    fn test_zero_sized_frame_gives_black_canvas() {
        let out = composite(&RgbaImage::new(0, 0), 54, 96);
        assert_eq!(out.dimensions(), (54, 96));
        assert!(out.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
    }

    #[test]
    fn test_center_crop_drops_side_bars() {
        // red | green | red, the vertical crop must keep only green
        let mut frame = solid(160, 90, [255, 0, 0, 255]);
        for x in 40..120 {
            for y in 0..90 {
                frame.put_pixel(x, y, Rgba([0, 255, 0, 255]));
            }
        }
        let out = composite(&frame, 18, 32);
        let corner = out.get_pixel(0, 0);
        let centre = out.get_pixel(9, 16);
        assert!(corner[1] > 200 && corner[0] < 50, "{corner:?}");
        assert!(centre[1] > 200 && centre[0] < 50, "{centre:?}");
    }

    #[test]
    fn test_resize_reads_from_cropped_region() {
        // blue | yellow split at the centre; crop starts at x=109, width 101
        let mut frame = solid(320, 180, [0, 0, 255, 255]);
        for x in 160..320 {
            for y in 0..180 {
                frame.put_pixel(x, y, Rgba([255, 255, 0, 255]));
            }
        }
        let out = Compositor::new(108, 192).composite(&frame);
        assert_eq!(out.dimensions(), (108, 192));
        let left = out.get_pixel(2, 96);
        let right = out.get_pixel(105, 96);
        assert!(left[2] > 200 && left[0] < 50, "{left:?}");
        assert!(right[0] > 200 && right[2] < 50, "{right:?}");
    }

    #[test]
    fn test_nearest_filter_is_refused() {
        let compositor = Compositor::new(10, 10).with_filter(FilterType::Nearest);
        assert_eq!(compositor.filter, FilterType::CatmullRom);
    }
}
