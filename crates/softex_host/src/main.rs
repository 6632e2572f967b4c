mod arena;
mod bench;
mod element;
mod generator;
mod golden;
mod model;
mod run;
mod stats;
mod sweep;
mod trace;

use anyhow::Result;
use bench::{Backend, Mode, RunOptions};
use clap::{Args, Parser, Subcommand};
use generator::{GenerateOptions, ScoreShape};
use softex_core::chunk::SplitPolicy;
use softex_core::config::DriverConfig;
use softex_core::format::ElementFormat;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser)]
struct Cli {
    /// Log level, may be "off", "trace", "debug", "info" or "error".
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Element format: "bf16", "uN" or "iN".
#[derive(Debug, Clone, Copy)]
struct FormatArg(ElementFormat);

impl FromStr for FormatArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        if s == "bf16" {
            return Ok(Self(ElementFormat::Bf16));
        }
        let (signed, bits) = match s.split_at_checked(1) {
            Some(("u", bits)) => (false, bits),
            Some(("i", bits)) => (true, bits),
            _ => return Err(format!("unknown format `{s}`, expected bf16, uN or iN")),
        };
        let bits: u8 = bits.parse().map_err(|_| format!("bad width in `{s}`"))?;
        ElementFormat::int(bits, signed)
            .map(Self)
            .map_err(|e| e.to_string())
    }
}

/// Split policy: "never", "always" or a byte threshold.
#[derive(Debug, Clone, Copy)]
struct SplitArg(SplitPolicy);

impl FromStr for SplitArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self(SplitPolicy::Never)),
            "always" => Ok(Self(SplitPolicy::Always)),
            bytes => bytes
                .parse()
                .map(|b| Self(SplitPolicy::Above(b)))
                .map_err(|_| format!("expected never, always or a byte count, got `{bytes}`")),
        }
    }
}

#[derive(Args)]
struct DriverArgs {
    /// Hardware accumulation slots.
    #[arg(long, default_value_t = 2)]
    slots: usize,
    /// Vectors in flight per group.
    #[arg(long, default_value_t = 2)]
    depth: usize,
    #[arg(long, default_value = "always")]
    split: SplitArg,
    /// Jobs the model accepts before ACQUIRE reports busy.
    #[arg(long, default_value_t = 2)]
    queue_depth: usize,
    #[arg(long, value_enum, default_value_t = Mode::Pipelined)]
    mode: Mode,
    #[arg(long, value_enum, default_value_t = Backend::Event)]
    wait: Backend,
    /// Reserve a cache area after the scores.
    #[arg(long)]
    cache: bool,
    #[arg(long, default_value = "bf16")]
    output_format: FormatArg,
}

impl DriverArgs {
    fn options(&self, input_format: ElementFormat) -> RunOptions {
        RunOptions {
            driver: DriverConfig {
                slot_count: self.slots,
                depth: self.depth,
                split: self.split.0,
                input_format,
                output_format: self.output_format.0,
            },
            queue_depth: self.queue_depth,
            mode: self.mode,
            backend: self.wait,
            cache: self.cache,
            record_trace: false,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Writes scores.h, golden.h, golden.txt and golden_sum.txt.
    Gen {
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long, default_value_t = 1024)]
        length: u32,
        #[arg(long, default_value_t = 1)]
        vectors: u32,
        /// Upper bound of uniformly drawn scores.
        #[arg(long, default_value_t = 128.0)]
        range: f64,
        /// Emit a ramp instead of random scores.
        #[arg(long)]
        monotonic: bool,
        #[arg(long, default_value_t = 1.0)]
        step: f64,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value = "bf16")]
        input_format: FormatArg,
        #[arg(long, default_value = "bf16")]
        output_format: FormatArg,
    },
    /// Runs a score header through the driver and the model.
    Run {
        #[arg(short, long)]
        scores: PathBuf,
        #[arg(short, long)]
        golden: Option<PathBuf>,
        /// Defaults to bf16 for 2-byte and i8 for 1-byte headers.
        #[arg(long)]
        input_format: Option<FormatArg>,
        /// Accepted distance from the reference, in output LSBs.
        #[arg(long, default_value_t = 2)]
        tolerance: u32,
        #[command(flatten)]
        driver: DriverArgs,
    },
    /// Prints the register accesses of a small run.
    Trace {
        #[arg(long, default_value_t = 3)]
        vectors: usize,
        #[arg(long, default_value_t = 16)]
        length: u32,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value = "bf16")]
        input_format: FormatArg,
        #[command(flatten)]
        driver: DriverArgs,
    },
    /// Runs every depth against a grid of workloads.
    Sweep {
        #[arg(long, value_delimiter = ',', default_value = "1,2,5,8")]
        vectors: Vec<usize>,
        #[arg(long, value_delimiter = ',', default_value = "1,63,256,1000")]
        lengths: Vec<u32>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 2)]
        tolerance: u32,
        #[arg(long, default_value = "bf16")]
        input_format: FormatArg,
        #[command(flatten)]
        driver: DriverArgs,
    },
}

fn init_log(log: Option<&str>) -> Result<()> {
    use log::LevelFilter;
    use simple_logger::SimpleLogger;

    let level = log
        .and_then(|log| match log.to_lowercase().as_str() {
            "off" | "none" => Some(LevelFilter::Off),
            "all" | "trace" => Some(LevelFilter::Trace),
            "debug" => Some(LevelFilter::Debug),
            "info" => Some(LevelFilter::Info),
            "error" => Some(LevelFilter::Error),
            _ => None,
        })
        .unwrap_or(LevelFilter::Warn);

    SimpleLogger::new().with_level(level).init()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log(cli.log.as_deref())?;

    match cli.command {
        Commands::Gen {
            out,
            length,
            vectors,
            range,
            monotonic,
            step,
            seed,
            input_format,
            output_format,
        } => {
            let shape = if monotonic {
                ScoreShape::Monotonic { step }
            } else {
                ScoreShape::Uniform { range }
            };
            generator::generate(
                &out,
                &GenerateOptions {
                    length,
                    vectors,
                    shape,
                    input_format: input_format.0,
                    output_format: output_format.0,
                    seed,
                },
            )?;
        }
        Commands::Run {
            scores,
            golden,
            input_format,
            tolerance,
            driver,
        } => {
            // The input format is settled once the header is loaded.
            let options = driver.options(ElementFormat::Bf16);
            run::run_benchmark(
                &scores,
                golden.as_deref(),
                input_format.map(|f| f.0),
                options,
                tolerance,
            )?;
        }
        Commands::Trace {
            vectors,
            length,
            seed,
            input_format,
            driver,
        } => {
            trace::print_trace(vectors, length, driver.options(input_format.0), seed)?;
        }
        Commands::Sweep {
            vectors,
            lengths,
            seed,
            tolerance,
            input_format,
            driver,
        } => {
            sweep::run_sweep(driver.options(input_format.0), &vectors, &lengths, seed, tolerance)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_arguments() {
        assert_eq!(FormatArg::from_str("BF16").unwrap().0, ElementFormat::Bf16);
        assert_eq!(
            FormatArg::from_str("i8").unwrap().0,
            ElementFormat::int(8, true).unwrap()
        );
        assert!(FormatArg::from_str("u0").is_err());
        assert!(FormatArg::from_str("f32").is_err());
        assert!(FormatArg::from_str("").is_err());
    }

    #[test]
    fn split_arguments() {
        assert_eq!(SplitArg::from_str("never").unwrap().0, SplitPolicy::Never);
        assert_eq!(SplitArg::from_str("512").unwrap().0, SplitPolicy::Above(512));
        assert!(SplitArg::from_str("sometimes").is_err());
    }

    #[test]
    fn cli_parses() {
        let cli = Cli::try_parse_from([
            "softex_host", "--log", "debug", "run", "-s", "scores.h", "--depth", "1", "--wait",
            "spin", "--split", "never",
        ])
        .unwrap();
        assert_eq!(cli.log.as_deref(), Some("debug"));
        match cli.command {
            Commands::Run { driver, .. } => {
                let options = driver.options(ElementFormat::Bf16);
                assert_eq!(options.driver.depth, 1);
                assert_eq!(options.backend, Backend::Spin);
                assert_eq!(options.driver.split, SplitPolicy::Never);
            }
            _ => panic!("expected run"),
        }
    }
}
