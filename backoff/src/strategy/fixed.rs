use std::time::Duration;

/// A Fixed Interval strategy which repeats itself every X duration. It never runs out on its
/// own, bound it with `take(retries)`.
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    interval: Duration,
}

impl Interval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }
}

impl Iterator for Interval {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_millis_repeats() {
        let mut interval = Interval::from_millis(1);
        assert_eq!(interval.next(), Some(Duration::from_millis(1)));
        assert_eq!(interval.next(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn take_bounds_retries() {
        let retries: Vec<Duration> = Interval::from_secs(1).take(3).collect();
        assert_eq!(retries, vec![Duration::from_secs(1); 3]);
    }
}
