//! Draws detections over their frame.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::DetectionSet;

const THICKNESS: u32 = 2;

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
];

pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Copy the frame and outline every detection in its class colour.
pub fn annotate(set: &DetectionSet) -> RgbImage {
    let mut image = set.frame().to_image();
    let (frame_w, frame_h) = image.dimensions();

    for detection in set.detections() {
        let b = detection.bbox.clamped(frame_w, frame_h);
        let color = class_color(detection.class_id);
        for inset in 0..THICKNESS {
            let x = b.x1.round() as i32 + inset as i32;
            let y = b.y1.round() as i32 + inset as i32;
            let w = (b.width().round() as u32).saturating_sub(2 * inset);
            let h = (b.height().round() as u32).saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            draw_hollow_rect_mut(&mut image, Rect::at(x, y).of_size(w, h), color);
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use crate::frame::Frame;
    use anyhow::Result;

    fn black_frame() -> Result<Frame> {
        Frame::from_rgb(vec![0; 20 * 20 * 3], 20, 20, 1)
    }

    #[test]
    fn outlines_detection_without_filling_it() -> Result<()> {
        let set = DetectionSet::new(
            black_frame()?,
            vec![Detection {
                class_id: 6,
                label: "neutrophil".to_string(),
                bbox: BoundingBox {
                    x1: 2.0,
                    y1: 2.0,
                    x2: 12.0,
                    y2: 12.0,
                },
                confidence: 0.9,
            }],
        );
        let image = annotate(&set);
        assert_eq!(*image.get_pixel(2, 2), class_color(6));
        assert_eq!(*image.get_pixel(3, 3), class_color(6));
        assert_eq!(*image.get_pixel(7, 7), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(15, 15), Rgb([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn empty_set_leaves_frame_untouched() -> Result<()> {
        let frame = black_frame()?;
        let image = annotate(&DetectionSet::new(frame.clone(), Vec::new()));
        assert_eq!(image.into_raw(), frame.pixels());
        Ok(())
    }
}
