use std::borrow::Cow;
use std::fmt::Write as _;

/// Renders an aligned plain-text table. Numeric cells are right-aligned,
/// everything else left-aligned.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers
        .iter()
        .map(|h| h.chars().count())
        .collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(sanitize_cell(cell).chars().count());
        }
    }
    for width in &mut widths {
        *width = (*width).max(3);
    }

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths, false));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths, false));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths, true));
    }
    output
}

pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_row(values: &[String], widths: &[usize], align_numbers: bool) -> String {
    let mut cells = Vec::with_capacity(widths.len());
    for (idx, width) in widths.iter().enumerate() {
        let value = values.get(idx).map(String::as_str).unwrap_or("");
        let sanitized = sanitize_cell(value);
        let cell = if align_numbers && is_numeric(&sanitized) {
            format!("{sanitized:>width$}")
        } else {
            format!("{sanitized:<width$}")
        };
        cells.push(cell);
    }
    cells.join("  ").trim_end().to_string()
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.parse::<f64>().is_ok()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_cells_are_right_aligned() {
        let rows = vec![
            vec!["West".to_string(), "725457.82".to_string()],
            vec!["South".to_string(), "9.5".to_string()],
        ];
        let rendered = render_table(&["region", "total_revenue"], &rows);
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "region  total_revenue");
        assert_eq!(lines[1], "------  -------------");
        assert_eq!(lines[2], "West        725457.82");
        assert_eq!(lines[3], "South             9.5");
    }

    #[test]
    fn control_characters_are_flattened() {
        let rows = vec![vec!["line1\nline2".to_string()]];
        let rendered = render_table(&["note"], &rows);
        assert_eq!(rendered.lines().nth(2), Some("line1 line2"));
    }
}
