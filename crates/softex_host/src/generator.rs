//! Test data generator for softmax benchmarks.
//!
//! Produces score vectors and their references in the files the cluster
//! programs and the `run` command consume: `scores.h` with the raw scores,
//! `golden.h` with the expected outputs, and two value lists with the raw
//! expected outputs and the per-vector denominators.

use crate::element;
use crate::golden;
use anyhow::{Context, Result};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use softex_core::format::ElementFormat;
use softex_io::header::{self, ScoreSet};
use softex_io::values;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

/// How score values are drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreShape {
    /// Independent uniform samples in `[0, range)`.
    Uniform { range: f64 },
    /// `0, step, 2 * step, ...`.
    Monotonic { step: f64 },
}

/// Draws one vector of `length` encoded scores.
pub fn generate_scores<R: Rng>(
    rng: &mut R,
    length: u32,
    shape: ScoreShape,
    format: ElementFormat,
) -> Vec<u32> {
    (0..length)
        .map(|i| {
            let value = match shape {
                ScoreShape::Uniform { range } if range > 0.0 => rng.gen_range(0.0..range),
                ScoreShape::Uniform { .. } => 0.0,
                ScoreShape::Monotonic { step } => i as f64 * step,
            };
            element::encode_score(value, format)
        })
        .collect()
}

pub struct GenerateOptions {
    pub length: u32,
    pub vectors: u32,
    pub shape: ScoreShape,
    pub input_format: ElementFormat,
    pub output_format: ElementFormat,
    pub seed: Option<u64>,
}

/// Everything written by [`write_dataset`].
pub struct Dataset {
    pub scores: ScoreSet,
    pub golden: Vec<u32>,
    pub denominators: Vec<f64>,
}

pub fn build_dataset(options: &GenerateOptions) -> Dataset {
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut raw = Vec::with_capacity((options.length * options.vectors) as usize);
    let mut golden = Vec::with_capacity(raw.capacity());
    let mut denominators = Vec::with_capacity(options.vectors as usize);

    for _ in 0..options.vectors {
        let scores = generate_scores(&mut rng, options.length, options.shape, options.input_format);
        // Reference from the stored scores, not the pre-rounding samples.
        let values: Vec<f64> = scores
            .iter()
            .map(|&r| element::score_value(r, options.input_format) as f64)
            .collect();
        let (probs, denominator) = golden::softmax(&values);

        golden.extend(
            probs
                .iter()
                .map(|&p| element::encode_probability(p, options.output_format)),
        );
        raw.extend(scores);
        denominators.push(denominator);
    }

    Dataset {
        scores: ScoreSet {
            length: options.length,
            fmt_width: options.input_format.width_bytes(),
            vectors: options.vectors,
            raw,
        },
        golden,
        denominators,
    }
}

/// Writes the dataset's four files into `dir`.
pub fn write_dataset(dir: &Path, dataset: &Dataset) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    fs::write(dir.join("scores.h"), header::render_scores(&dataset.scores))?;
    fs::write(dir.join("golden.h"), header::render_golden(&dataset.golden))?;
    values::write_values(
        BufWriter::new(File::create(dir.join("golden_sum.txt"))?),
        &dataset.denominators,
    )?;
    values::write_values(
        BufWriter::new(File::create(dir.join("golden.txt"))?),
        &dataset.golden,
    )?;
    Ok(())
}

pub fn generate(dir: &Path, options: &GenerateOptions) -> Result<()> {
    println!(
        "Generating {} vectors of {} scores ({:?})...",
        options.vectors, options.length, options.shape
    );
    let dataset = build_dataset(options);
    write_dataset(dir, &dataset)?;
    println!("Wrote {}", dir.display());
    Ok(())
}
