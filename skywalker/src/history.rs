//! Bounded history of committed moves and their measured centroids
//!
//! Samples are recorded after every committed move has settled. When the
//! history is full the oldest sample is evicted, so model building always sees
//! the most recent window of the relay's response.

use std::collections::vec_deque::Iter;
use std::collections::VecDeque;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Mirror pitches and the centroids measured at them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub alpha_1: f64,
    pub alpha_2: f64,
    /// Centroid on imager 1 (pixels)
    pub centroid_1: f64,
    /// Centroid on imager 2 (pixels)
    pub centroid_2: f64,
}

impl HistorySample {
    pub fn new(alphas: (f64, f64), centroids: (f64, f64)) -> Self {
        Self {
            alpha_1: alphas.0,
            alpha_2: alphas.1,
            centroid_1: centroids.0,
            centroid_2: centroids.1,
        }
    }

    pub fn alphas(&self) -> Vector2<f64> {
        Vector2::new(self.alpha_1, self.alpha_2)
    }

    pub fn centroids(&self) -> Vector2<f64> {
        Vector2::new(self.centroid_1, self.centroid_2)
    }
}

/// Fixed-capacity sample history that evicts the oldest sample when full
#[derive(Debug, Clone)]
pub struct History {
    samples: VecDeque<HistorySample>,
    capacity: usize,
}

impl History {
    /// # Panics
    /// Panics if capacity is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "History capacity must be greater than 0");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: HistorySample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest
    pub fn iter(&self) -> Iter<'_, HistorySample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&HistorySample> {
        self.samples.back()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a HistorySample;
    type IntoIter = Iter<'a, HistorySample>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> HistorySample {
        HistorySample::new((i as f64, 0.0), (0.0, 0.0))
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.push(sample(i));
        }
        assert_eq!(history.len(), 3);
        let kept: Vec<f64> = history.iter().map(|s| s.alpha_1).collect();
        assert_eq!(kept, vec![2.0, 3.0, 4.0]);
        assert_eq!(history.latest().unwrap().alpha_1, 4.0);
    }

    #[test]
    fn test_clear() {
        let mut history = History::new(2);
        history.push(sample(0));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 2);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _ = History::new(0);
    }

    #[test]
    fn test_vector_accessors() {
        let s = HistorySample::new((0.0014, 0.0015), (690.0, 700.0));
        assert_eq!(s.alphas(), Vector2::new(0.0014, 0.0015));
        assert_eq!(s.centroids(), Vector2::new(690.0, 700.0));
    }
}
