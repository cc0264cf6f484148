//! Ordered work list of task units owned by one task instance.
//!
//! Only the poll loop drains and re-inserts, so there is no locking here.

use crate::task::{RangeTaskUnit, TaskUnit};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    units: VecDeque<TaskUnit>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a queue; metadata units are moved to the head.
    pub fn from_units(units: impl IntoIterator<Item = TaskUnit>) -> Self {
        let mut queue = Self::new();
        for unit in units {
            if unit.is_metadata() {
                queue.push_front(unit);
            } else {
                queue.push_back(unit);
            }
        }
        queue
    }

    pub fn pop_front(&mut self) -> Option<TaskUnit> {
        self.units.pop_front()
    }

    pub fn push_front(&mut self, unit: TaskUnit) {
        self.units.push_front(unit);
    }

    pub fn push_back(&mut self, unit: TaskUnit) {
        self.units.push_back(unit);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskUnit> {
        self.units.iter()
    }

    pub fn range_units(&self) -> impl Iterator<Item = &RangeTaskUnit> {
        self.units.iter().filter_map(TaskUnit::as_range)
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }
}
