//! Box-drawn tables for `status` and byte formatting for usage reports

use std::io::{IsTerminal, Write};

/// Placeholder for cells whose value could not be recovered.
pub const MISSING: &str = "-";

pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    widths: Vec<usize>,
    use_color: bool,
}

impl TableBuilder {
    #[must_use]
    pub fn new(headers: &[&str]) -> Self {
        let use_color = std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal();
        Self {
            headers: headers.iter().map(ToString::to_string).collect(),
            rows: Vec::new(),
            widths: headers.iter().map(|h| h.chars().count()).collect(),
            use_color,
        }
    }

    /// Append a row. Short rows are padded with [`MISSING`], extra cells dropped.
    pub fn add_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row: Vec<String> = cells
            .into_iter()
            .map(Into::into)
            .take(self.headers.len())
            .collect();
        row.resize(self.headers.len(), MISSING.to_string());
        for (width, cell) in self.widths.iter_mut().zip(&row) {
            *width = (*width).max(cell.chars().count());
        }
        self.rows.push(row);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        self.border(out, '┌', '┬', '┐')?;
        self.line(out, &self.headers, true)?;
        self.border(out, '├', '┼', '┤')?;
        for row in &self.rows {
            self.line(out, row, false)?;
        }
        self.border(out, '└', '┴', '┘')
    }

    fn border<W: Write>(&self, out: &mut W, left: char, mid: char, right: char) -> std::io::Result<()> {
        let segments: Vec<String> = self.widths.iter().map(|w| "─".repeat(w + 2)).collect();
        writeln!(out, "{left}{}{right}", segments.join(&mid.to_string()))
    }

    fn line<W: Write>(&self, out: &mut W, cells: &[String], header: bool) -> std::io::Result<()> {
        write!(out, "│")?;
        for (cell, width) in cells.iter().zip(&self.widths) {
            let pad = width - cell.chars().count();
            if header && self.use_color {
                write!(out, " \x1b[1;36m{cell}\x1b[0m{} │", " ".repeat(pad))?;
            } else {
                write!(out, " {cell}{} │", " ".repeat(pad))?;
            }
        }
        writeln!(out)
    }
}

/// Human-readable size with binary units.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(headers: &[&str]) -> TableBuilder {
        let mut table = TableBuilder::new(headers);
        table.use_color = false;
        table
    }

    fn rendered(table: &TableBuilder) -> String {
        let mut out = Vec::new();
        table.render(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn rows_share_one_width() {
        let mut table = plain(&["PID", "SQL"]);
        table.add_row(["41", "localhost:26257"]);
        table.add_row(["123456", "localhost:26357"]);

        let text = rendered(&table);
        let widths: Vec<usize> = text.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]), "{text}");
        assert!(text.contains("123456"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn short_rows_are_padded() {
        let mut table = plain(&["Node", "Console", "Store"]);
        table.add_row(["1"]);

        let text = rendered(&table);
        let data = text.lines().nth(3).unwrap();
        assert_eq!(data.matches(MISSING).count(), 2, "{data}");
    }

    #[test]
    fn empty_table_still_has_frame() {
        let table = plain(&["PID"]);
        assert!(table.is_empty());
        assert_eq!(rendered(&table).lines().count(), 4);
    }

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2_560), "2.50 KB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
        assert_eq!(format_bytes(50 * 1_073_741_824), "50.00 GB");
    }
}
