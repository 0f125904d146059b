//! Rendering coverage maps to PNG and the HTML viewer.
//!
//! The grid is 60 columns (one per 2 minutes) by 30 rows (one cell per
//! 2 seconds within the column), so an hour reads top to bottom, left
//! to right. Duplicated cells get a darker shade of their kind's color.

use image::{Rgba, RgbaImage};
use std::io::Cursor;

use segments::SegmentKind;

use crate::coverage::{Cell, CoverageMap};

const CELL_PX: u32 = 8;
const COLS: u32 = 60;
const ROWS: u32 = 30;

const HOLE: Rgba<u8> = Rgba([40, 40, 40, 255]);
const FULL: Rgba<u8> = Rgba([0, 180, 0, 255]);
const SUSPECT: Rgba<u8> = Rgba([220, 180, 0, 255]);
const PARTIAL: Rgba<u8> = Rgba([220, 100, 0, 255]);

fn cell_color(cell: &Cell) -> Rgba<u8> {
    let base = match cell.best {
        None => return HOLE,
        Some(SegmentKind::Full) => FULL,
        Some(SegmentKind::Suspect) => SUSPECT,
        Some(SegmentKind::Partial) => PARTIAL,
    };
    if cell.duplicated {
        // Darken so duplicated coverage stands out from clean coverage.
        Rgba([base[0] / 2, base[1] / 2, base[2] / 2, 255])
    } else {
        base
    }
}

pub fn render_png(map: &CoverageMap) -> anyhow::Result<Vec<u8>> {
    let mut img = RgbaImage::from_pixel(COLS * CELL_PX, ROWS * CELL_PX, HOLE);

    for (index, cell) in map.cells.iter().enumerate() {
        let col = (index as u32) / ROWS;
        let row = (index as u32) % ROWS;
        let color = cell_color(cell);
        for dx in 0..CELL_PX {
            for dy in 0..CELL_PX {
                img.put_pixel(col * CELL_PX + dx, row * CELL_PX + dy, color);
            }
        }
    }

    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img).write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub fn render_index(channel: &str, quality: &str, hours: &[String]) -> String {
    let mut rows = String::new();
    // Newest first, the hour an operator is usually looking for.
    for hour in hours.iter().rev() {
        rows.push_str(&format!(
            "    <tr><td>{hour}</td><td><img src=\"{hour}.png\" alt=\"{hour}\"></td></tr>\n"
        ));
    }
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n\
         <meta charset=\"utf-8\">\n\
         <meta http-equiv=\"refresh\" content=\"60\">\n\
         <title>Coverage: {channel}/{quality}</title>\n\
         <style>body{{background:#111;color:#eee;font-family:monospace}}\
         td{{padding:4px;vertical-align:top}}</style>\n\
         </head>\n<body>\n\
         <h1>{channel}/{quality}</h1>\n\
         <p>green: full &middot; yellow: suspect &middot; orange: partial \
         &middot; dark: missing &middot; dimmed: duplicates</p>\n\
         <table>\n{rows}</table>\n</body>\n</html>\n"
    )
}
