//! Accuracy statistics against the reference softmax.
//!
//! Tracks absolute error and distance in output LSBs between model outputs
//! and the double-precision reference rounded to the output format.

/// Buckets of the LSB-distance histogram; the last one collects the tail.
const BUCKETS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStats {
    pub count: u64,
    pub max_abs: f64,
    pub sum_abs: f64,
    pub max_ulp: u32,
    pub buckets: [u64; BUCKETS],
}

impl Default for ErrorStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            max_abs: 0.0,
            sum_abs: 0.0,
            max_ulp: 0,
            buckets: [0; BUCKETS],
        }
    }

    /// Records one output element.
    pub fn update(&mut self, abs_err: f64, ulp: u32) {
        self.max_abs = self.max_abs.max(abs_err);
        self.sum_abs += abs_err;
        self.max_ulp = self.max_ulp.max(ulp);
        self.count += 1;
        self.buckets[(ulp as usize).min(BUCKETS - 1)] += 1;
    }

    pub fn merge(&mut self, other: &ErrorStats) {
        self.count += other.count;
        self.max_abs = self.max_abs.max(other.max_abs);
        self.sum_abs += other.sum_abs;
        self.max_ulp = self.max_ulp.max(other.max_ulp);
        for (a, b) in self.buckets.iter_mut().zip(other.buckets) {
            *a += b;
        }
    }

    pub fn mean_abs(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_abs / self.count as f64
        }
    }

    /// Whether every element is within `ulp` LSBs of the reference.
    pub fn within(&self, ulp: u32) -> bool {
        self.max_ulp <= ulp
    }

    pub fn print_report(&self) {
        println!("\nAccuracy");
        println!("Elements: {}", self.count);
        println!("Abs err:  mean {:.3e}, max {:.3e}", self.mean_abs(), self.max_abs);
        println!("Max LSB:  {}", self.max_ulp);

        println!("Distribution (LSBs from reference):");
        for (i, &count) in self.buckets.iter().enumerate() {
            if count > 0 {
                let tail = if i == BUCKETS - 1 { "+" } else { "" };
                println!("[{:2}{:1}]: {}", i, tail, count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_bucket_collects_large_distances() {
        let mut stats = ErrorStats::new();
        stats.update(0.0, 0);
        stats.update(1e-3, 1);
        stats.update(5e-2, 40);

        assert_eq!(stats.buckets[0], 1);
        assert_eq!(stats.buckets[1], 1);
        assert_eq!(stats.buckets[BUCKETS - 1], 1);
        assert_eq!(stats.max_ulp, 40);
        assert!(!stats.within(2));
    }

    #[test]
    fn merge_combines_counts() {
        let mut a = ErrorStats::new();
        a.update(0.5, 1);
        let mut b = ErrorStats::new();
        b.update(0.25, 0);
        b.update(0.25, 0);

        a.merge(&b);
        assert_eq!(a.count, 3);
        assert_eq!(a.mean_abs(), 1.0 / 3.0);
        assert!(a.within(1));
    }
}
