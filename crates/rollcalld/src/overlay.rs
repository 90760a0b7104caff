//! Frame annotation: a box and name banner per face plus the wall clock.

use chrono::NaiveDateTime;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use rollcall_core::Detection;

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const CLOCK_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const TEXT_SCALE: u32 = 2;
const PAD: u32 = 4;

/// Draw every detection and the timestamp onto `frame`.
pub fn annotate(frame: &mut RgbImage, detections: &[Detection], now: NaiveDateTime) {
    for detection in detections {
        let color = if detection.is_known() {
            KNOWN_COLOR
        } else {
            UNKNOWN_COLOR
        };
        let Some((x, y, w, h)) = detection.bbox.crop_rect(0.0, frame.width(), frame.height()) else {
            continue;
        };

        draw_hollow_rect_mut(frame, Rect::at(x as i32, y as i32).of_size(w, h), color);

        // Name banner along the bottom edge of the box.
        let banner_h = GLYPH_H * TEXT_SCALE + 2 * PAD;
        let banner_y = (y + h).saturating_sub(banner_h) as i32;
        draw_filled_rect_mut(frame, Rect::at(x as i32, banner_y).of_size(w, banner_h), color);
        draw_text(
            frame,
            x as i32 + PAD as i32,
            banner_y + PAD as i32,
            TEXT_SCALE,
            TEXT_COLOR,
            &detection.label(),
        );
    }

    let stamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let width = text_width(&stamp, TEXT_SCALE) + 2 * PAD;
    let height = GLYPH_H * TEXT_SCALE + 2 * PAD;
    draw_filled_rect_mut(frame, Rect::at(0, 0).of_size(width, height), CLOCK_BACKGROUND);
    draw_text(frame, PAD as i32, PAD as i32, TEXT_SCALE, TEXT_COLOR, &stamp);
}

/// Pixel width of `text` at `scale`, one column of spacing per glyph.
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * (GLYPH_W + 1) * scale
}

/// Render `text` with the built-in 5x7 font. Pixels outside the frame are clipped.
pub fn draw_text(frame: &mut RgbImage, x: i32, y: i32, scale: u32, color: Rgb<u8>, text: &str) {
    let advance = ((GLYPH_W + 1) * scale) as i32;
    for (i, c) in text.chars().enumerate() {
        let origin_x = x + i as i32 * advance;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                let px = origin_x + (col * scale) as i32;
                let py = y + (row as u32 * scale) as i32;
                draw_filled_rect_mut(frame, Rect::at(px, py).of_size(scale, scale), color);
            }
        }
    }
}

/// Row bitmaps, most significant of the low five bits is the leftmost column.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '\'' => [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        ' ' => [0x00; 7],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{BoundingBox, Identity, MatchStrategy};

    fn detection(identity: Option<&str>, x: f32, y: f32) -> Detection {
        Detection {
            bbox: BoundingBox {
                x,
                y,
                width: 120.0,
                height: 140.0,
                confidence: 0.9,
            },
            identity: identity.map(|l| Identity::from_label(l).unwrap()),
            distance: 0.2,
            strategy: MatchStrategy::Primary,
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-01-01 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_known_and_unknown_colors() {
        let mut frame = RgbImage::new(640, 480);
        let faces = [detection(Some("Alice_Doe"), 100.0, 100.0), detection(None, 400.0, 200.0)];
        annotate(&mut frame, &faces, noon());

        // Top-left corner of each box outline.
        assert_eq!(*frame.get_pixel(100, 100), KNOWN_COLOR);
        assert_eq!(*frame.get_pixel(400, 200), UNKNOWN_COLOR);
        // Banner fills the bottom of the box.
        assert_eq!(*frame.get_pixel(101, 238), KNOWN_COLOR);
    }

    #[test]
    fn test_clock_is_drawn_top_left() {
        let mut frame = RgbImage::new(640, 480);
        annotate(&mut frame, &[], noon());
        let lit = (0..GLYPH_H * TEXT_SCALE + 2 * PAD)
            .flat_map(|y| (0..text_width("2024-01-01 12:00:00", TEXT_SCALE)).map(move |x| (x, y)))
            .filter(|&(x, y)| *frame.get_pixel(x, y) == TEXT_COLOR)
            .count();
        assert!(lit > 0);
    }

    #[test]
    fn test_faces_at_frame_edge_are_clipped() {
        let mut frame = RgbImage::new(160, 120);
        let faces = [detection(Some("Bob_Smith"), 100.0, 60.0), detection(None, -50.0, -50.0)];
        annotate(&mut frame, &faces, noon());
        assert_eq!(*frame.get_pixel(100, 60), KNOWN_COLOR);
    }

    #[test]
    fn test_unknown_glyph_falls_back() {
        assert_eq!(glyph('é'), glyph('?'));
        assert_eq!(glyph('a'), glyph('A'));
        assert_eq!(glyph(' '), [0; 7]);
    }

    #[test]
    fn test_draw_text_sets_pixels() {
        let mut frame = RgbImage::new(20, 20);
        draw_text(&mut frame, 0, 0, 1, TEXT_COLOR, "I");
        // Top row of 'I' is 0x0E: columns 1..=3.
        assert_eq!(*frame.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*frame.get_pixel(1, 0), TEXT_COLOR);
        assert_eq!(*frame.get_pixel(3, 0), TEXT_COLOR);
        assert_eq!(*frame.get_pixel(4, 0), Rgb([0, 0, 0]));
    }
}
