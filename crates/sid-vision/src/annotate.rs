//! Draws detection boxes and labels onto a copy of a frame.

use image::{Rgb, RgbImage};
use sid_models::{BoundingBox, DetectionRecord};

/// Box colour for people that raised an alert.
pub const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Box colour for recognized people.
pub const CLEAR_COLOR: Rgb<u8> = Rgb([45, 255, 90]);

const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const LABEL_PADDING: u32 = 2;

/// Render every record onto a copy of `frame`. The input is never modified.
pub fn annotate(frame: &RgbImage, records: &[DetectionRecord]) -> RgbImage {
    let mut canvas = frame.clone();
    let scale = if frame.width() >= 640 { 2 } else { 1 };

    for record in records {
        let color = if record.alert { ALERT_COLOR } else { CLEAR_COLOR };
        draw_box(&mut canvas, &record.bbox, color);
        draw_label(&mut canvas, &record.bbox, &record.annotation_label(), color, scale);
    }
    canvas
}

fn fill_rect(canvas: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    let (w, h) = (canvas.width() as i64, canvas.height() as i64);
    let (x0, x1) = (x0.max(0), x1.min(w));
    let (y0, y1) = (y0.max(0), y1.min(h));
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let b = bbox.clamp(canvas.width(), canvas.height());
    if !b.is_valid() {
        return;
    }
    let (x1, y1) = (b.x1.floor() as i64, b.y1.floor() as i64);
    let (x2, y2) = (b.x2.ceil() as i64, b.y2.ceil() as i64);
    let t = BOX_THICKNESS as i64;

    fill_rect(canvas, x1, y1, x2, y1 + t, color);
    fill_rect(canvas, x1, y2 - t, x2, y2, color);
    fill_rect(canvas, x1, y1, x1 + t, y2, color);
    fill_rect(canvas, x2 - t, y1, x2, y2, color);
}

fn draw_label(canvas: &mut RgbImage, bbox: &BoundingBox, text: &str, color: Rgb<u8>, scale: u32) {
    let b = bbox.clamp(canvas.width(), canvas.height());
    if !b.is_valid() {
        return;
    }

    let chars = text.chars().count() as u32;
    let tab_w = chars * (GLYPH_W + 1) * scale + LABEL_PADDING * 2;
    let tab_h = GLYPH_H * scale + LABEL_PADDING * 2;

    let x = b.x1.floor() as i64;
    let top = b.y1.floor() as i64;
    // Inside the box when there is no room above it
    let y = if top >= tab_h as i64 { top - tab_h as i64 } else { top };

    fill_rect(canvas, x, y, x + tab_w as i64, y + tab_h as i64, color);

    let mut pen_x = x + LABEL_PADDING as i64;
    let pen_y = y + LABEL_PADDING as i64;
    for ch in text.chars() {
        draw_glyph(canvas, pen_x, pen_y, glyph(ch), scale);
        pen_x += ((GLYPH_W + 1) * scale) as i64;
    }
}

fn draw_glyph(canvas: &mut RgbImage, x: i64, y: i64, rows: [u8; 7], scale: u32) {
    let s = scale as i64;
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_W {
            if bits & (1 << (GLYPH_W - 1 - col)) != 0 {
                let px = x + col as i64 * s;
                let py = y + row as i64 * s;
                fill_rect(canvas, px, py, px + s, py + s, LABEL_TEXT_COLOR);
            }
        }
    }
}

/// 5x7 bitmap glyphs; letters render as capitals.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
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
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ' ' => [0x00; 7],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}
