//! Bakes the benchmark vectors into the firmware image.
//!
//! Scores come from the header named by `SOFTEX_SCORES` (as written by
//! `softex_host gen`), or from a built-in ramp. The expected outputs come
//! from `SOFTEX_GOLDEN` when set and are computed here otherwise.

use anyhow::{Result, bail};
use half::bf16;
use softex_io::header;
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

const RAMP_LENGTH: u32 = 256;
const RAMP_VECTORS: u32 = 2;

fn ramp() -> (u32, u32, Vec<u32>) {
    let raw = (0..RAMP_VECTORS)
        .flat_map(|v| {
            (0..RAMP_LENGTH).map(move |i| {
                let score = (i as f32 * 0.0625) - v as f32;
                bf16::from_f32(score).to_bits() as u32
            })
        })
        .collect();
    (RAMP_LENGTH, RAMP_VECTORS, raw)
}

fn golden(length: u32, raw: &[u32]) -> Vec<u32> {
    raw.chunks(length as usize)
        .flat_map(|vector| {
            let scores: Vec<f64> = vector
                .iter()
                .map(|&r| bf16::from_bits(r as u16).to_f64())
                .collect();
            let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let sum: f64 = scores.iter().map(|s| (s - max).exp()).sum();
            scores
                .into_iter()
                .map(move |s| bf16::from_f64((s - max).exp() / sum).to_bits() as u32)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn write_array(out: &mut String, name: &str, values: &[u32]) -> Result<()> {
    writeln!(out, "pub const {}: [u16; {}] = [", name, values.len())?;
    for row in values.chunks(8) {
        out.push_str("   ");
        for v in row {
            write!(out, " {:#06x},", v)?;
        }
        out.push('\n');
    }
    out.push_str("];\n");
    Ok(())
}

fn main() -> Result<()> {
    println!("cargo:rerun-if-env-changed=SOFTEX_SCORES");
    println!("cargo:rerun-if-env-changed=SOFTEX_GOLDEN");
    println!("cargo:rerun-if-changed=link.x");

    let (length, vectors, raw) = match env::var_os("SOFTEX_SCORES") {
        Some(path) => {
            let path = PathBuf::from(path);
            println!("cargo:rerun-if-changed={}", path.display());
            let set = header::load_scores(&path)?;
            if set.fmt_width != 2 {
                bail!("firmware benchmark needs bf16 scores, {} has {}-byte elements", path.display(), set.fmt_width);
            }
            (set.length, set.vectors, set.raw)
        }
        None => ramp(),
    };

    let expected = match env::var_os("SOFTEX_GOLDEN") {
        Some(path) => {
            let path = PathBuf::from(path);
            println!("cargo:rerun-if-changed={}", path.display());
            header::load_golden(&path, 2)?
        }
        None => golden(length, &raw),
    };
    if expected.len() != raw.len() {
        bail!("{} golden values for {} scores", expected.len(), raw.len());
    }

    let mut out = String::new();
    writeln!(out, "pub const LENGTH: u32 = {};", length)?;
    writeln!(out, "pub const N_VECTORS: usize = {};", vectors)?;
    write_array(&mut out, "SCORES", &raw)?;
    write_array(&mut out, "GOLDEN", &expected)?;

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    fs::write(out_dir.join("bench_data.rs"), out)?;

    let manifest = env::var("CARGO_MANIFEST_DIR")?;
    println!("cargo:rustc-link-search={}", manifest);
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    Ok(())
}
