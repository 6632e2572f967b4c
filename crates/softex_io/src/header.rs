//! Parser for the C headers produced by the golden model.
//!
//! Only `#define` directives are interpreted. Other preprocessor lines
//! (include guards, `#endif`) and anything outside a directive are skipped.
//! A define either has no value (a guard), a single integer, or a
//! brace-enclosed list of integers, usually spread over several lines
//! joined with a trailing backslash.

use anyhow::{Context, Result, anyhow, bail};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, hex_digit1, multispace0, space0, space1},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// The value of one `#define`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Define {
    Flag,
    Int(i64),
    List(Vec<i64>),
}

/// All defines of a header, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    defines: BTreeMap<String, Define>,
}

impl Header {
    pub fn get(&self, name: &str) -> Option<&Define> {
        self.defines.get(name)
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.defines.get(name) {
            Some(Define::Int(v)) => Ok(*v),
            Some(other) => bail!("`{}` is not an integer define: {:?}", name, other),
            None => bail!("missing `#define {}`", name),
        }
    }

    pub fn list(&self, name: &str) -> Result<&[i64]> {
        match self.defines.get(name) {
            Some(Define::List(v)) => Ok(v),
            Some(other) => bail!("`{}` is not a list define: {:?}", name, other),
            None => bail!("missing `#define {}`", name),
        }
    }

    pub fn len(&self) -> usize {
        self.defines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn number(input: &str) -> IResult<&str, i64> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |h| {
            i64::from_str_radix(h, 16)
        }),
        map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>),
    ))(input)
}

fn list(input: &str) -> IResult<&str, Vec<i64>> {
    delimited(
        pair(char('{'), multispace0),
        terminated(
            separated_list0(delimited(multispace0, char(','), multispace0), number),
            pair(multispace0, opt(pair(char(','), multispace0))),
        ),
        char('}'),
    )(input)
}

fn define(input: &str) -> IResult<&str, (&str, Define)> {
    let (input, _) = tuple((char('#'), space0, tag("define"), space1))(input)?;
    let (input, name) = identifier(input)?;
    let (input, value) = opt(preceded(
        space1,
        alt((map(list, Define::List), map(number, Define::Int))),
    ))(input)?;
    Ok((input, (name, value.unwrap_or(Define::Flag))))
}

/// Parses header text into its defines.
pub fn parse_header(text: &str) -> Result<Header> {
    // A backslash before the newline continues the directive.
    let joined = text.replace("\\\r\n", " ").replace("\\\n", " ");
    let mut header = Header::default();

    for line in joined.lines() {
        let line = line.trim();
        if !line.starts_with('#') {
            continue;
        }
        let directive = line[1..].trim_start();
        if !directive.starts_with("define") {
            continue;
        }

        let (_, (name, value)) = all_consuming(terminated(define, space0))(line)
            .map_err(|e| anyhow!("malformed directive `{}`: {}", truncate(line), e))?;
        header.defines.insert(name.to_string(), value);
    }
    Ok(header)
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(48) {
        Some((i, _)) => &line[..i],
        None => line,
    }
}

pub fn load_header<P: AsRef<Path>>(path: P) -> Result<Header> {
    let path = path.as_ref();
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_header(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Raw score vectors as stored in `scores.h`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSet {
    /// Elements per vector.
    pub length: u32,
    /// Bytes per element.
    pub fmt_width: u32,
    pub vectors: u32,
    /// `length * vectors` raw element encodings, vector after vector.
    pub raw: Vec<u32>,
}

impl ScoreSet {
    pub fn from_header(header: &Header) -> Result<Self> {
        let length = positive(header, "LENGTH")?;
        let fmt_width = positive(header, "FMT_WIDTH")?;
        // Single-vector headers from older generators omit N_VECTORS.
        let vectors = match header.get("N_VECTORS") {
            Some(_) => positive(header, "N_VECTORS")?,
            None => 1,
        };
        let raw = words(header.list("SCORES")?, fmt_width)?;

        let expected = length as usize * vectors as usize;
        if raw.len() != expected {
            bail!(
                "SCORES holds {} elements, expected {} ({} vectors of {})",
                raw.len(),
                expected,
                vectors,
                length
            );
        }
        Ok(Self {
            length,
            fmt_width,
            vectors,
            raw,
        })
    }

    pub fn vector(&self, index: usize) -> &[u32] {
        let len = self.length as usize;
        &self.raw[index * len..(index + 1) * len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> {
        self.raw.chunks(self.length as usize)
    }
}

pub fn load_scores<P: AsRef<Path>>(path: P) -> Result<ScoreSet> {
    let header = load_header(&path)?;
    ScoreSet::from_header(&header)
        .with_context(|| format!("Bad score header {}", path.as_ref().display()))
}

/// Reads the `GOLDEN` reference list of a golden header.
pub fn golden_from_header(header: &Header, fmt_width: u32) -> Result<Vec<u32>> {
    words(header.list("GOLDEN")?, fmt_width)
}

pub fn load_golden<P: AsRef<Path>>(path: P, fmt_width: u32) -> Result<Vec<u32>> {
    let header = load_header(&path)?;
    golden_from_header(&header, fmt_width)
        .with_context(|| format!("Bad golden header {}", path.as_ref().display()))
}

fn positive(header: &Header, name: &str) -> Result<u32> {
    let v = header.int(name)?;
    match u32::try_from(v) {
        Ok(v) if v > 0 => Ok(v),
        _ => bail!("`{}` must be a positive 32-bit value, got {}", name, v),
    }
}

fn words(values: &[i64], fmt_width: u32) -> Result<Vec<u32>> {
    let limit: i64 = match fmt_width {
        1 => 0xFF,
        2 => 0xFFFF,
        4 => 0xFFFF_FFFF,
        w => bail!("unsupported element width {} bytes", w),
    };
    values
        .iter()
        .map(|&v| {
            if (0..=limit).contains(&v) {
                Ok(v as u32)
            } else {
                Err(anyhow!("value {:#x} does not fit {} bytes", v, fmt_width))
            }
        })
        .collect()
}

fn write_list(out: &mut String, name: &str, values: &[u32]) {
    let _ = writeln!(out, "#define {} {{    \\", name);
    for v in values {
        let _ = writeln!(out, "   0x{:x},    \\", v);
    }
    out.push_str("}\n\n");
}

/// Renders `scores.h` in the golden model's layout.
pub fn render_scores(set: &ScoreSet) -> String {
    let mut out = String::from("#ifndef __SFM_SCORES__\n#define __SFM_SCORES__\n\n");
    let _ = writeln!(out, "#define LENGTH  {}\n", set.length);
    let _ = writeln!(out, "#define FMT_WIDTH  {}\n", set.fmt_width);
    let _ = writeln!(out, "#define N_VECTORS  {}\n", set.vectors);
    write_list(&mut out, "SCORES", &set.raw);
    out.push_str("#endif");
    out
}

/// Renders `golden.h` in the golden model's layout.
pub fn render_golden(golden: &[u32]) -> String {
    let mut out = String::from("#ifndef __SFM_GOLDEN__\n#define __SFM_GOLDEN__\n\n");
    write_list(&mut out, "GOLDEN", golden);
    out.push_str("#endif");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCORES_H: &str = "#ifndef __SFM_SCORES__
#define __SFM_SCORES__

#define LENGTH  3

#define FMT_WIDTH  2

#define N_VECTORS  2

#define SCORES {    \\
   0x3f80,    \\
   0x4000,    \\
   0x4040,    \\
   0x0,    \\
   0x42fe,    \\
   0x4116,    \\
}

#endif";

    #[test]
    fn parses_generated_score_header() {
        let header = parse_header(SCORES_H).unwrap();
        assert_eq!(header.get("__SFM_SCORES__"), Some(&Define::Flag));
        assert_eq!(header.int("LENGTH").unwrap(), 3);

        let set = ScoreSet::from_header(&header).unwrap();
        assert_eq!(set.vectors, 2);
        assert_eq!(set.vector(0), &[0x3f80, 0x4000, 0x4040]);
        assert_eq!(set.vector(1), &[0x0, 0x42fe, 0x4116]);
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn rendered_header_parses_back() {
        let set = ScoreSet {
            length: 2,
            fmt_width: 2,
            vectors: 1,
            raw: vec![0x3c00, 0xbf80],
        };
        let text = render_scores(&set);
        assert!(text.contains("#define SCORES {    \\\n   0x3c00,    \\\n"));
        let back = ScoreSet::from_header(&parse_header(&text).unwrap()).unwrap();
        assert_eq!(back, set);

        let golden = parse_header(&render_golden(&[1, 2, 3])).unwrap();
        assert_eq!(golden_from_header(&golden, 2).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn list_on_one_line_without_trailing_comma() {
        let header = parse_header("#define GOLDEN { 1, 0x2,3 }\n#define X -4").unwrap();
        assert_eq!(header.list("GOLDEN").unwrap(), &[1, 2, 3]);
        assert_eq!(header.int("X").unwrap(), -4);
        assert_eq!(Header::default().len(), 0);
    }

    #[test]
    fn element_count_must_match() {
        let text = SCORES_H.replace("N_VECTORS  2", "N_VECTORS  3");
        let err = ScoreSet::from_header(&parse_header(&text).unwrap()).unwrap_err();
        assert!(err.to_string().contains("expected 9"));
    }

    #[test]
    fn missing_vector_count_means_one() {
        let text = "#define LENGTH 2\n#define FMT_WIDTH 1\n#define SCORES { 0x7f, 0x80 }";
        let set = ScoreSet::from_header(&parse_header(text).unwrap()).unwrap();
        assert_eq!(set.vectors, 1);
    }

    #[test]
    fn rejects_values_wider_than_format() {
        let text = "#define LENGTH 1\n#define FMT_WIDTH 1\n#define SCORES { 0x100 }";
        assert!(ScoreSet::from_header(&parse_header(text).unwrap()).is_err());
    }

    #[test]
    fn malformed_define_is_an_error() {
        assert!(parse_header("#define LENGTH { 1, 2").is_err());
        assert!(parse_header("#define LENGTH 12abc").is_err());
    }

    #[test]
    fn other_directives_are_ignored() {
        let header = parse_header("#include <stdint.h>\nint x;\n#endif\n").unwrap();
        assert!(header.is_empty());
    }
}
