//! Text rendering for directory listings

use crate::remote::{Filelist, RemoteEntry};
use crate::rrf::TIME_FORMAT;
use chrono::Local;
use std::fmt::Write;

const KILOBYTE: u64 = 1 << 10;
const MEGABYTE: u64 = 1 << 20;
const GIGABYTE: u64 = 1 << 30;
const TERABYTE: u64 = 1 << 40;
const PADDED_WIDTH: usize = 5;

const DIR_MARKER: &str = "[d]";
const FILE_MARKER: &str = "[f]";
const SIZE_PLACEHOLDER: &str = "         -";
const SIZE_PLACEHOLDER_HR: &str = "     -";

/// Render a byte count like `  512B`, `  1.5K` or `   12M`
///
/// The unit yielding the smallest value of at least one is chosen.
pub fn human_readable_size(bytes: u64) -> String {
    let (unit, divisor) = match bytes {
        0 => return format!("{:>width$}", 0, width = PADDED_WIDTH + 1),
        b if b >= TERABYTE => ("T", TERABYTE),
        b if b >= GIGABYTE => ("G", GIGABYTE),
        b if b >= MEGABYTE => ("M", MEGABYTE),
        b if b >= KILOBYTE => ("K", KILOBYTE),
        _ => ("B", 1),
    };

    let value = bytes as f64 / divisor as f64;
    let mut result = format!("{:>width$.1}", value, width = PADDED_WIDTH);
    if let Some(whole) = result.strip_suffix(".0") {
        result = format!("  {}", whole);
    }
    result + unit
}

/// Formatter for `ls` output
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingFormat {
    pub human_readable: bool,
}

impl ListingFormat {
    fn size(&self, size: u64) -> String {
        if self.human_readable {
            human_readable_size(size)
        } else {
            format!("{:>10}", size)
        }
    }

    fn entry_size(&self, entry: &RemoteEntry) -> String {
        match (entry.is_dir, self.human_readable) {
            (true, true) => SIZE_PLACEHOLDER_HR.to_string(),
            (true, false) => SIZE_PLACEHOLDER.to_string(),
            (false, _) => self.size(entry.size),
        }
    }

    /// Render one directory level: a total line followed by one line per entry
    pub fn render(&self, list: &Filelist) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "total {}", self.size(list.total_size()));
        for entry in &list.files {
            let marker = if entry.is_dir { DIR_MARKER } else { FILE_MARKER };
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}",
                marker,
                self.entry_size(entry),
                entry.modified_at.with_timezone(&Local).format(TIME_FORMAT),
                entry.name
            );
        }
        out
    }

    /// Render a listing and, depth-first, all of its subdirectory listings
    pub fn render_tree(&self, list: &Filelist) -> String {
        let mut out = self.render(list);
        for sub in &list.subdirs {
            let _ = write!(out, "\n{}:\n", sub.dir);
            out.push_str(&self.render_tree(sub));
        }
        out
    }
}
