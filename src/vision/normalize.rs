use image::{imageops, RgbImage};

use crate::vision::frame::Frame;

/// Turns a frame upright and cuts or pads it to the detector's input size.
pub fn normalize(frame: &Frame, width: u32, height: u32) -> RgbImage {
    let upright = rotate(frame.image(), frame.rotation_degrees());
    let cropped = center_crop(&upright, width, height);
    letterbox(cropped, width, height)
}

fn rotate(image: &RgbImage, degrees: u32) -> RgbImage {
    match degrees {
        90 => imageops::rotate90(image),
        180 => imageops::rotate180(image),
        270 => imageops::rotate270(image),
        _ => image.clone(),
    }
}

/// Cuts the centered `width` x `height` region; a smaller image is kept whole along that axis.
pub fn center_crop(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let x = image.width().saturating_sub(width) / 2;
    let y = image.height().saturating_sub(height) / 2;
    let crop_width = width.min(image.width());
    let crop_height = height.min(image.height());

    imageops::crop_imm(image, x, y, crop_width, crop_height).to_image()
}

/// Centers `image` on a black canvas of the given size.
pub fn letterbox(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image;
    }

    let mut canvas = RgbImage::new(width, height);
    let x = (width.saturating_sub(image.width()) / 2) as i64;
    let y = (height.saturating_sub(image.height()) / 2) as i64;
    imageops::overlay(&mut canvas, &image, x, y);
    canvas
}
