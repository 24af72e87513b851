use nutype::nutype;

#[nutype(
    derive(Debug, Clone, Copy, PartialEq),
    validate(greater_or_equal = 2)
)]
pub struct WindowSize(usize);

/// Bounded sample window: a ring that keeps the last `capacity` values and
/// the dispersion statistics adaptive sampling feeds on.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    buffer:   Vec<f64>,
    cursor:   usize,
    capacity: usize,
    last:     Option<f64>,
}

impl SlidingWindow {
    pub fn new(size: WindowSize) -> Self {
        let capacity = size.into_inner();
        Self {
            buffer: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
            last: None,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(value);
        } else {
            self.buffer[self.cursor] = value;
            self.cursor = (self.cursor + 1) % self.capacity;
        }
        self.last = Some(value);
    }

    pub fn len(&self) -> usize { self.buffer.len() }

    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    pub fn latest(&self) -> Option<f64> { self.last }

    pub fn mean(&self) -> f64 {
        if self.buffer.is_empty() {
            return 0.0;
        }
        self.buffer.iter().sum::<f64>() / self.buffer.len() as f64
    }

    /// Population variance; 0 until two samples are in.
    pub fn variance(&self) -> f64 {
        if self.buffer.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        self.buffer.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
            / self.buffer.len() as f64
    }

    /// Scale-free dispersion, `variance / mean²`; 0 when the mean
    /// vanishes. This is the estimate used for latency-style metrics.
    pub fn normalized_variance(&self) -> f64 {
        let mean = self.mean();
        if mean.abs() < f64::EPSILON {
            return 0.0;
        }
        self.variance() / (mean * mean)
    }
}
