//! Plain-text table of the seed courses.

use std::fmt::Write as _;

use ilmsdump_core::ilms::Course;

const HEADERS: [&str; 4] = ["id", "serial", "is_admin", "name"];

/// Terminal columns taken by `c`: two for East Asian wide and fullwidth
/// characters, zero for combining marks.
fn char_width(c: char) -> usize {
    match u32::from(c) {
        0x0300..=0x036F | 0x200B..=0x200F => 0,
        0x1100..=0x115F
        | 0x2E80..=0x303E
        | 0x3041..=0x33FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xA000..=0xA4CF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
        | 0x20000..=0x3FFFD => 2,
        _ => 1,
    }
}

/// Terminal columns taken by `s`.
pub(crate) fn display_width(s: &str) -> usize {
    s.chars().map(char_width).sum()
}

/// Renders courses as aligned columns separated by two spaces, with a header
/// and a dashed rule. The last column is not padded.
pub(crate) fn render(courses: &[Course]) -> String {
    let mut rows: Vec<[String; 4]> = vec![HEADERS.map(str::to_string)];
    rows.extend(courses.iter().map(|course| {
        [
            course.id.to_string(),
            course.serial.clone(),
            course.is_admin.to_string(),
            course.name.clone(),
        ]
    }));

    let mut widths = [0usize; 4];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(cell));
        }
    }

    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        push_row(&mut out, row, &widths);
        if i == 0 {
            let rule = widths.map(|width| "-".repeat(width));
            out.push_str(&rule.join("  "));
            out.push('\n');
        }
    }
    out
}

fn push_row(out: &mut String, row: &[String; 4], widths: &[usize; 4]) {
    for (j, (cell, width)) in row.iter().zip(widths).enumerate() {
        if j > 0 {
            out.push_str("  ");
        }
        out.push_str(cell);
        if j + 1 < row.len() {
            let _ = write!(out, "{:pad$}", "", pad = width - display_width(cell));
        }
    }
    out.push('\n');
}
