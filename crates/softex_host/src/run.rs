use crate::bench::{self, RunOptions, Workload};
use crate::element;
use anyhow::{Result, bail};
use softex_core::format::ElementFormat;
use softex_io::header;
use std::path::Path;

/// Runs the vectors of a score header through the model and reports
/// accuracy against the reference and, if given, a golden header.
pub fn run_benchmark(
    scores_path: &Path,
    golden_path: Option<&Path>,
    input_format: Option<ElementFormat>,
    mut options: RunOptions,
    tolerance: u32,
) -> Result<()> {
    println!("Loading scores from {}...", scores_path.display());
    let set = header::load_scores(scores_path)?;
    options.driver.input_format = match input_format {
        Some(format) => format,
        None => default_input_format(set.fmt_width)?,
    };
    let workload = Workload::from_scores(&set, options.driver.input_format)?;
    println!(
        "Loaded {} vectors of {} elements ({} bytes each).",
        set.vectors, set.length, set.fmt_width
    );

    println!("Running ({:?}, {:?} wait)...", options.mode, options.backend);
    let outcome = bench::execute(&workload, &options)?;

    let seconds = outcome.elapsed.as_secs_f64();
    let elements = outcome.model.elements as f64;
    println!("Results");
    println!("Time: {:.4} s", seconds);
    println!("Simulated throughput: {:.2} elements/s", elements / seconds.max(1e-9));
    println!(
        "Jobs: {} ({} configuration), waits: {}, busy acquires: {}",
        outcome.dispatch.jobs,
        outcome.dispatch.configuration_jobs,
        outcome.dispatch.waits,
        outcome.model.busy_acquires
    );
    println!(
        "Groups: {}, denominators: {:?}",
        outcome.summary.groups,
        &outcome.denominators[..outcome.denominators.len().min(4)]
    );
    outcome.errors.print_report();

    if let Some(path) = golden_path {
        let golden = header::load_golden(path, options.driver.output_format.width_bytes())?;
        let produced: Vec<u32> = outcome.outputs.concat();
        if golden.len() != produced.len() {
            bail!(
                "golden header holds {} elements, run produced {}",
                golden.len(),
                produced.len()
            );
        }
        let off = count_mismatches(&produced, &golden, tolerance);
        println!("Golden header: {}/{} within {} LSB", golden.len() - off, golden.len(), tolerance);
        if off > 0 {
            bail!("{} elements differ from {}", off, path.display());
        }
    }

    for v in &outcome.violations {
        println!("VIOLATION: {}", v);
    }
    if !outcome.passed(tolerance) {
        bail!(
            "run failed: {} violations, max {} LSB from reference",
            outcome.violations.len(),
            outcome.errors.max_ulp
        );
    }
    Ok(())
}

fn count_mismatches(produced: &[u32], golden: &[u32], tolerance: u32) -> usize {
    produced
        .iter()
        .zip(golden)
        .filter(|&(&a, &b)| element::ulp_distance(a, b) > tolerance)
        .count()
}

/// Picks the score format implied by a header's element width.
pub fn default_input_format(fmt_width: u32) -> Result<ElementFormat> {
    Ok(match fmt_width {
        2 => ElementFormat::Bf16,
        1 => ElementFormat::int(8, true)?,
        w => bail!("no default format for {}-byte elements; pass --input-format", w),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatches_respect_tolerance() {
        assert_eq!(count_mismatches(&[10, 11, 20], &[10, 12, 10], 1), 1);
        assert_eq!(count_mismatches(&[10, 11, 20], &[10, 12, 10], 10), 0);
    }

    #[test]
    fn header_width_picks_format() {
        assert_eq!(default_input_format(2).unwrap(), ElementFormat::Bf16);
        assert!(default_input_format(1).unwrap().is_int());
        assert!(default_input_format(4).is_err());
    }
}
