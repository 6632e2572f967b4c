//! One number per line, as written for golden references and denominators.

use anyhow::{Context, Result, bail};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Parses one decimal integer or float per non-blank line.
pub fn parse_values(text: &str) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<f64>() {
            Ok(v) => values.push(v),
            Err(_) => bail!("line {}: `{}` is not a number", n + 1, line),
        }
    }
    Ok(values)
}

pub fn load_values<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read value list {}", path.display()))?;
    parse_values(&text).with_context(|| format!("Malformed value list {}", path.display()))
}

pub fn write_values<W: Write, T: std::fmt::Display>(mut out: W, values: &[T]) -> Result<()> {
    for v in values {
        writeln!(out, "{}", v)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_integers_and_floats() {
        let values = parse_values("16256\n\n1.5e2\n  -3 \n").unwrap();
        assert_eq!(values, vec![16256.0, 150.0, -3.0]);
    }

    #[test]
    fn reports_bad_line() {
        let err = parse_values("1\nabc\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn written_list_reads_back() {
        let mut buf = Vec::new();
        write_values(&mut buf, &[12.25f64, 7.0]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "12.25\n7\n");
        assert_eq!(parse_values(&text).unwrap(), vec![12.25, 7.0]);
    }
}
