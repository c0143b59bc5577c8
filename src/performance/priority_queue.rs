//! Banded priority queue used by the task queue

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::PerfError;

/// Task priority. Lower numeric value is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }

    fn band(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = PerfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" | "0" => Ok(TaskPriority::Critical),
            "high" | "1" => Ok(TaskPriority::High),
            "normal" | "2" => Ok(TaskPriority::Normal),
            "low" | "3" => Ok(TaskPriority::Low),
            other => Err(PerfError::invalid_argument(
                "priority",
                format!("unknown task priority '{}'", other),
            )),
        }
    }
}

/// FIFO within a priority band, bands served from `Critical` to `Low`
#[derive(Debug)]
pub struct PriorityQueue<T> {
    bands: [VecDeque<T>; 4],
    total_size: usize,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            bands: [VecDeque::new(), VecDeque::new(), VecDeque::new(), VecDeque::new()],
            total_size: 0,
        }
    }

    pub fn push(&mut self, priority: TaskPriority, item: T) {
        self.bands[priority.band()].push_back(item);
        self.total_size += 1;
    }

    pub fn pop(&mut self) -> Option<T> {
        for band in self.bands.iter_mut() {
            if let Some(item) = band.pop_front() {
                self.total_size = self.total_size.saturating_sub(1);
                return Some(item);
            }
        }
        None
    }

    /// Remove the first item matching `predicate`, searching every band
    pub fn remove_first<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        for band in self.bands.iter_mut() {
            if let Some(index) = band.iter().position(&mut predicate) {
                let item = band.remove(index);
                if item.is_some() {
                    self.total_size = self.total_size.saturating_sub(1);
                }
                return item;
            }
        }
        None
    }

    /// Drain every queued item in service order
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.total_size);
        for band in self.bands.iter_mut() {
            items.extend(band.drain(..));
        }
        self.total_size = 0;
        items
    }

    pub fn len(&self) -> usize {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    pub fn len_for(&self, priority: TaskPriority) -> usize {
        self.bands[priority.band()].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let mut queue = PriorityQueue::new();
        queue.push(TaskPriority::Low, "low");
        queue.push(TaskPriority::Normal, "normal");
        queue.push(TaskPriority::Critical, "critical");
        queue.push(TaskPriority::High, "high");

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.pop(), Some("critical"));
        assert_eq!(queue.pop(), Some("high"));
        assert_eq!(queue.pop(), Some("normal"));
        assert_eq!(queue.pop(), Some("low"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_within_band() {
        let mut queue = PriorityQueue::new();
        for i in 0..5 {
            queue.push(TaskPriority::Normal, i);
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_first() {
        let mut queue = PriorityQueue::new();
        queue.push(TaskPriority::High, 1);
        queue.push(TaskPriority::Low, 2);
        queue.push(TaskPriority::Low, 3);

        assert_eq!(queue.remove_first(|v| *v == 3), Some(3));
        assert_eq!(queue.remove_first(|v| *v == 42), None);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.len_for(TaskPriority::Low), 1);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        assert_eq!("0".parse::<TaskPriority>().unwrap(), TaskPriority::Critical);
        assert!("urgent".parse::<TaskPriority>().is_err());
        assert!(TaskPriority::Critical < TaskPriority::Low);
    }
}
