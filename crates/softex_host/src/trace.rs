//! Register-level trace of a run, one line per bus access.

use crate::bench::{self, RunOptions, Workload};
use crate::generator::{ScoreShape, generate_scores};
use crate::model::BusAccess;
use anyhow::{Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use softex_common::cmd;
use softex_core::regs::Register;

const FLAG_NAMES: [(u32, &str); 8] = [
    (cmd::ACC_ONLY, "ACC_ONLY"),
    (cmd::DIV_ONLY, "DIV_ONLY"),
    (cmd::ACQUIRE_SLOT, "ACQUIRE_SLOT"),
    (cmd::LAST, "LAST"),
    (cmd::SET_CACHE_ADDR, "SET_CACHE_ADDR"),
    (cmd::NO_OP, "NO_OP"),
    (cmd::INT_INPUT, "INT_INPUT"),
    (cmd::INT_OUTPUT, "INT_OUTPUT"),
];

/// Human-readable form of a command word.
pub fn describe_command(word: u32) -> String {
    let names: Vec<&str> = FLAG_NAMES
        .iter()
        .filter(|(bit, _)| word & bit != 0)
        .map(|&(_, name)| name)
        .collect();
    let flags = if names.is_empty() {
        "FULL".to_string()
    } else {
        names.join("|")
    };
    format!("{} slot{}", flags, word >> cmd::SLOT_SHIFT)
}

fn format_access(access: &BusAccess) -> Option<String> {
    match *access {
        BusAccess::Write(Register::Commands, word) => Some(format!(
            "W {:<16} {:#010x}  {}",
            "COMMANDS",
            word,
            describe_command(word)
        )),
        BusAccess::Write(Register::Trigger, _) => Some("W TRIGGER\n".to_string()),
        BusAccess::Write(reg, value) => Some(format!("W {:<16} {:#010x}", format!("{reg:?}"), value)),
        // Polling reads would drown the trace.
        BusAccess::Read(Register::Acquire, v) if v as i32 >= 0 => {
            Some(format!("R {:<16} {}", "ACQUIRE", v))
        }
        BusAccess::Read(..) => None,
    }
}

pub fn print_trace(vectors: usize, length: u32, mut options: RunOptions, seed: u64) -> Result<()> {
    if vectors == 0 || length == 0 {
        bail!("trace needs at least one non-empty vector");
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let format = options.driver.input_format;
    let workload = Workload {
        length,
        vectors: (0..vectors)
            .map(|_| generate_scores(&mut rng, length, ScoreShape::Uniform { range: 8.0 }, format))
            .collect(),
    };

    options.record_trace = true;
    let outcome = bench::execute(&workload, &options)?;

    for line in outcome.trace.iter().filter_map(format_access) {
        println!("{}", line);
    }
    println!(
        "{} jobs, {} waits, {} busy acquires",
        outcome.dispatch.jobs, outcome.dispatch.waits, outcome.model.busy_acquires
    );
    for v in &outcome.violations {
        println!("VIOLATION: {}", v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_descriptions() {
        assert_eq!(describe_command(0x0001_000D), "ACC_ONLY|ACQUIRE_SLOT|LAST slot1");
        assert_eq!(describe_command(0x30), "SET_CACHE_ADDR|NO_OP slot0");
        assert_eq!(describe_command(0xC0), "INT_INPUT|INT_OUTPUT slot0");
        assert_eq!(describe_command(0), "FULL slot0");
    }

    #[test]
    fn busy_polls_are_hidden() {
        assert_eq!(format_access(&BusAccess::Read(Register::Acquire, u32::MAX)), None);
        assert_eq!(format_access(&BusAccess::Read(Register::Finished, 3)), None);
        assert_eq!(
            format_access(&BusAccess::Write(Register::TotLen, 64)).unwrap(),
            "W TotLen           0x00000040"
        );
    }
}
