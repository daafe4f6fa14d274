use chrono::{Duration, NaiveDate};

use crate::entry::Resolution;
use crate::models::{Deadline, EntryStatus};
use crate::tree::Forest;

/// Nodes due between `today` and `today + within_days`, soonest first.
/// Already-completed leaves are included so the listing matches the tree.
pub fn upcoming_deadlines(
    forest: &Forest,
    resolution: &Resolution,
    today: NaiveDate,
    within_days: i64,
) -> Vec<Deadline> {
    let horizon = window_end(today, within_days);
    let mut deadlines: Vec<Deadline> = forest
        .preorder()
        .iter()
        .filter_map(|&position| {
            let node = &forest.get(position).node;
            let due_date = node.due_date?;
            if due_date < today || due_date > horizon {
                return None;
            }
            let status = resolution
                .leaf(position)
                .map(|outcome| outcome.status())
                .unwrap_or(EntryStatus::Pending);
            Some(Deadline {
                node_id: node.id,
                name: node.name.clone(),
                input_type: node.input_type,
                due_date,
                days_left: (due_date - today).num_days(),
                status,
            })
        })
        .collect();

    deadlines.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.name.cmp(&b.name)));
    deadlines
}

/// Last day of the window. Saturates at the latest representable date.
pub fn window_end(today: NaiveDate, within_days: i64) -> NaiveDate {
    Duration::try_days(within_days.max(0))
        .and_then(|span| today.checked_add_signed(span))
        .unwrap_or(NaiveDate::MAX)
}
