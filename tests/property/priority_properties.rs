//! Property-based tests for priority ordering

use proptest::prelude::*;
use perflayer::performance::PriorityQueue;
use perflayer::TaskPriority;

fn arb_priority() -> impl Strategy<Value = TaskPriority> {
    prop::sample::select(TaskPriority::ALL.to_vec())
}

proptest! {
    #[test]
    fn prop_pop_order_is_priority_then_submission(
        priorities in prop::collection::vec(arb_priority(), 0..100),
    ) {
        let mut queue = PriorityQueue::new();
        for (index, priority) in priorities.iter().enumerate() {
            queue.push(*priority, (*priority, index));
        }
        prop_assert_eq!(queue.len(), priorities.len());

        let mut popped = Vec::new();
        while let Some(item) = queue.pop() {
            popped.push(item);
        }

        let mut expected: Vec<(TaskPriority, usize)> = priorities
            .iter()
            .copied()
            .enumerate()
            .map(|(index, priority)| (priority, index))
            .collect();
        expected.sort();
        prop_assert_eq!(popped, expected);
    }

    #[test]
    fn prop_priority_names_parse_back(priority in arb_priority()) {
        prop_assert_eq!(priority.as_str().parse::<TaskPriority>().unwrap(), priority);
        prop_assert_eq!((priority as u8).to_string().parse::<TaskPriority>().unwrap(), priority);
    }
}
