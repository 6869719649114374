use std::collections::VecDeque;

use gimbal_messages::Orientation;

/// Number of samples kept per trace.
pub const HISTORY_LEN: usize = 200;

/// Smallest symmetric axis range in degrees.
const MIN_RANGE: f32 = 20.0;
const RANGE_MARGIN: f32 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    /// Sample counter of the session, used as the time axis.
    pub index: u64,
    pub orientation: Orientation,
}

/// Most recent orientations, oldest first.
#[derive(Debug, Clone)]
pub struct Trace {
    capacity: usize,
    points: VecDeque<TracePoint>,
}

impl Trace {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, index: u64, orientation: Orientation) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(TracePoint { index, orientation });
    }

    pub fn latest(&self) -> Option<&TracePoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TracePoint> + ExactSizeIterator {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Symmetric range `[-r, r]` that fits every angle with some margin.
    pub fn auto_range(&self) -> f32 {
        self.points
            .iter()
            .flat_map(|point| point.orientation.to_array())
            .map(|angle| angle.abs() * RANGE_MARGIN)
            .fold(MIN_RANGE, f32::max)
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new(HISTORY_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let mut trace = Trace::default();
        for i in 0..250 {
            trace.push(i, Orientation::new(i as f32, 0.0, 0.0));
        }

        assert_eq!(trace.len(), HISTORY_LEN);
        assert_eq!(trace.iter().next().map(|point| point.index), Some(50));
        assert_eq!(trace.latest().map(|point| point.index), Some(249));
    }

    #[test]
    fn auto_range_has_floor_and_margin() {
        let mut trace = Trace::default();
        assert_eq!(trace.auto_range(), MIN_RANGE);

        trace.push(0, Orientation::new(5.0, -10.0, 2.0));
        assert_eq!(trace.auto_range(), MIN_RANGE);

        trace.push(1, Orientation::new(40.0, -100.0, 2.0));
        assert!((trace.auto_range() - 110.0).abs() < 1e-3);
    }

    #[test]
    fn clear_empties() {
        let mut trace = Trace::new(3);
        trace.push(0, Orientation::default());
        trace.clear();
        assert!(trace.is_empty());
        assert!(trace.latest().is_none());
    }
}
