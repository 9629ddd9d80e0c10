/// Block usage map visualization

use crate::error::Result;
use crate::filesystem::{FileSystem, FileSystemType};
use crate::volume::Volume;
use std::fmt::Write;

/// ANSI color codes for the usage map
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_WHITE: &str = "\x1b[97m";
    pub const DARK_WHITE: &str = "\x1b[37m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
}

const BLOCK_FREE: &str = "\u{2591}"; // ░ - Light shade (free)
const BLOCK_USED: &str = "\u{2593}"; // ▓ - Dark shade (in-use)

/// Widest map drawn before several units share one cell
const MAX_COLUMNS: usize = 70;

/// Render a usage map as text
///
/// Units are laid out column by column, `rows` units per column, with unit 0
/// at the bottom left. When there are more units than fit in
/// [`MAX_COLUMNS`] columns, each cell covers several consecutive units and is
/// drawn yellow when only some of them are in use.
pub fn render_usage_map(usage: &[bool], rows: usize, color: bool) -> String {
    let mut out = String::new();
    if usage.is_empty() || rows == 0 {
        return out;
    }

    let per_cell = usage.len().div_ceil(rows * MAX_COLUMNS).max(1);
    let cells = usage.len().div_ceil(per_cell);
    let columns = cells.div_ceil(rows);

    for row in (0..rows).rev() {
        let _ = write!(out, "{:>2} ", row);
        for col in 0..columns {
            let start = (col * rows + row) * per_cell;
            if start >= usage.len() {
                out.push(' ');
                continue;
            }
            let span = &usage[start..(start + per_cell).min(usage.len())];
            let used = span.iter().filter(|u| **u).count();
            let (block, shade) = match used {
                0 => (BLOCK_FREE, colors::DARK_WHITE),
                n if n == span.len() => (BLOCK_USED, colors::BRIGHT_WHITE),
                _ => (BLOCK_USED, colors::BRIGHT_YELLOW),
            };
            if color {
                let _ = write!(out, "{}{}{}", shade, block, colors::RESET);
            } else {
                out.push_str(block);
            }
        }
        out.push('\n');
    }

    // Column axis, labelled every 5 columns
    out.push_str("   ");
    let mut col = 0;
    while col < columns {
        if col % 5 == 0 {
            let label = col.to_string();
            let fits = label.len().min(columns - col);
            out.push_str(&label[..fits]);
            col += fits;
        } else {
            out.push(' ');
            col += 1;
        }
    }
    out.push('\n');
    out
}

/// Print the usage map of a mounted volume
pub fn draw_usage_map(volume: &Volume) -> Result<()> {
    let usage = volume.usage()?;
    let info = volume.info()?;
    // DOS maps one track per column; block volumes use 8 blocks per column
    let (rows, unit) = match info.fs_type {
        FileSystemType::Dos33 => (16, "sector"),
        _ => (8, "block"),
    };

    println!("=== Usage Map: {} ({}) ===", info.volume_name, info.fs_type);
    println!(
        "Legend: {}{} In Use{} {}{} Free{} {}{} Partly used{}",
        colors::BRIGHT_WHITE, BLOCK_USED, colors::RESET,
        colors::DARK_WHITE, BLOCK_FREE, colors::RESET,
        colors::BRIGHT_YELLOW, BLOCK_USED, colors::RESET
    );
    println!();
    print!("{}", render_usage_map(&usage, rows, true));
    println!("{} of {} {}s free", info.free_blocks, info.total_blocks, unit);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_map() {
        let usage = [true, false, true, true, false, false];
        let map = render_usage_map(&usage, 2, false);
        let lines: Vec<&str> = map.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], " 1 ░▓░");
        assert_eq!(lines[1], " 0 ▓▓░");
        assert_eq!(lines[2], "   0  ");
    }

    #[test]
    fn test_scaled_map() {
        // 65535 blocks do not fit one per cell
        let usage = vec![false; 65535];
        let map = render_usage_map(&usage, 8, false);
        let first = map.lines().next().unwrap();
        assert!(first.chars().count() <= 3 + MAX_COLUMNS);
    }

    #[test]
    fn test_partial_cells() {
        let mut usage = vec![false; 8 * MAX_COLUMNS * 2];
        usage[0] = true;
        let map = render_usage_map(&usage, 8, true);
        assert!(map.contains(colors::BRIGHT_YELLOW));
    }

    #[test]
    fn test_empty() {
        assert!(render_usage_map(&[], 8, false).is_empty());
    }
}
