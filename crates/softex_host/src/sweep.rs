use crate::bench::{self, RunOptions, Workload};
use crate::generator::{ScoreShape, generate_scores};
use crate::stats::ErrorStats;
use anyhow::{Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::time::Instant;

/// One point of the parameter grid.
#[derive(Debug, Clone, Copy)]
struct Point {
    depth: usize,
    vectors: usize,
    length: u32,
}

struct Row {
    point: Point,
    jobs: u64,
    waits: u64,
    busy: u64,
    errors: ErrorStats,
    violations: usize,
    passed: bool,
}

fn grid(slot_count: usize, vector_counts: &[usize], lengths: &[u32]) -> Vec<Point> {
    let mut points = Vec::new();
    for depth in 1..=slot_count {
        for &vectors in vector_counts {
            for &length in lengths {
                points.push(Point {
                    depth,
                    vectors,
                    length,
                });
            }
        }
    }
    points
}

fn run_point(point: Point, base: &RunOptions, seed: u64, tolerance: u32) -> Result<Row> {
    let mut options = *base;
    options.driver.depth = point.depth;

    // Every depth sees the same data for a given shape.
    let mut rng = StdRng::seed_from_u64(seed ^ ((point.vectors as u64) << 32) ^ point.length as u64);
    let shape = ScoreShape::Uniform { range: 32.0 };
    let workload = Workload {
        length: point.length,
        vectors: (0..point.vectors)
            .map(|_| generate_scores(&mut rng, point.length, shape, options.driver.input_format))
            .collect(),
    };

    let outcome = bench::execute(&workload, &options)?;
    Ok(Row {
        point,
        jobs: outcome.dispatch.jobs,
        waits: outcome.dispatch.waits,
        busy: outcome.model.busy_acquires,
        errors: outcome.errors,
        violations: outcome.violations.len(),
        passed: outcome.passed(tolerance),
    })
}

/// Runs every depth against every vector count and length in parallel.
pub fn run_sweep(
    base: RunOptions,
    vector_counts: &[usize],
    lengths: &[u32],
    seed: u64,
    tolerance: u32,
) -> Result<()> {
    let points = grid(base.driver.slot_count, vector_counts, lengths);
    println!("Sweeping {} configurations (Parallel - Rayon)...", points.len());
    let start = Instant::now();

    let rows: Vec<Row> = points
        .par_iter()
        .map(|&point| run_point(point, &base, seed, tolerance))
        .collect::<Result<_>>()?;

    println!(
        "{:>5} {:>7} {:>7} {:>6} {:>6} {:>6} {:>4} {:>5}",
        "depth", "vectors", "length", "jobs", "waits", "busy", "lsb", "ok"
    );
    for row in &rows {
        println!(
            "{:>5} {:>7} {:>7} {:>6} {:>6} {:>6} {:>4} {:>5}",
            row.point.depth,
            row.point.vectors,
            row.point.length,
            row.jobs,
            row.waits,
            row.busy,
            row.errors.max_ulp,
            if row.passed { "yes" } else { "NO" }
        );
    }
    println!("Time: {:.4} s", start.elapsed().as_secs_f64());

    let mut total = ErrorStats::new();
    for row in &rows {
        total.merge(&row.errors);
    }
    total.print_report();

    let failed: Vec<&Row> = rows.iter().filter(|r| !r.passed).collect();
    if let Some(first) = failed.first() {
        bail!(
            "{} of {} configurations failed (first: {:?}, {} violations)",
            failed.len(),
            rows.len(),
            first.point,
            first.violations
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use softex_core::config::DriverConfig;

    #[test]
    fn grid_covers_every_depth() {
        let points = grid(3, &[1, 4], &[8, 64]);
        assert_eq!(points.len(), 12);
        assert_eq!(points.iter().filter(|p| p.depth == 3).count(), 4);
    }

    #[test]
    fn depth_does_not_change_the_work() {
        let base = RunOptions {
            driver: DriverConfig {
                slot_count: 4,
                ..DriverConfig::default()
            },
            queue_depth: 4,
            ..RunOptions::default()
        };
        let point = |depth| Point {
            depth,
            vectors: 8,
            length: 32,
        };
        let shallow = run_point(point(1), &base, 11, 2).unwrap();
        let deep = run_point(point(4), &base, 11, 2).unwrap();

        assert!(shallow.passed && deep.passed);
        assert_eq!(shallow.jobs, deep.jobs);
        assert_eq!(shallow.waits, shallow.jobs);
        assert_eq!(deep.waits, deep.jobs);
    }

    #[test]
    fn small_sweep_passes() {
        run_sweep(RunOptions::default(), &[1, 3], &[7, 40], 5, 2).unwrap();
    }
}
