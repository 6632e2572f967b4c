//! I/O utilities for softmax benchmark data.
//!
//! Reads and writes the files exchanged with the golden model: C headers
//! holding raw score and reference vectors, and plain value lists holding
//! per-element references and per-vector softmax denominators.

/// Parser and writer for golden-model C headers.
///
/// Understands the `#define NAME VALUE` directives the golden model emits,
/// including brace-enclosed value lists spread over `\` continuation lines,
/// and turns them into typed score and reference sets.
pub mod header;

/// Line-oriented numeric value lists.
pub mod values;
