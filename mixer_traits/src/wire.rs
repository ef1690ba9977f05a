//! Line format shared by both ends of the rig link.
//!
//! Lines are ASCII, comma-delimited and newline-terminated. Integral fields are
//! written as plain integers. Floating-point fields use the shortest
//! round-trip representation and always carry a fractional part, so `5.0`
//! stays `5.0` on the wire and `0.25` stays `0.25`.

/// Field delimiter.
pub const DELIMITER: char = ',';
/// Line terminator.
pub const TERMINATOR: char = '\n';

/// Format a floating-point field.
pub fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// Join already-formatted fields and append the terminator.
pub fn join_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, f) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(f.as_ref());
    }
    out.push(TERMINATOR);
    out
}

/// Split a received line into trimmed fields. Trailing `\r`/`\n` are ignored.
pub fn split_line(line: &str) -> Vec<&str> {
    line.trim_end_matches(['\r', '\n'])
        .split(DELIMITER)
        .map(str::trim)
        .collect()
}

/// Parse an integral field. Rejects signs on unsigned values and fractions.
pub fn parse_uint(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Parse a floating-point field; non-finite values are rejected.
pub fn parse_float(field: &str) -> Option<f64> {
    let v: f64 = field.parse().ok()?;
    v.is_finite().then_some(v)
}
