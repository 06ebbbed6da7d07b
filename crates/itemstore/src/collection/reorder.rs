//! Grouped reordering over a view subset of the sequence.
//!
//! A view is any subset of the collection (e.g. the items of one group). The
//! view is always taken in full-sequence order; ids missing from the
//! collection are dropped. A reorder computes a new order for the view and
//! writes it back into the sequence slots the view occupied, so items outside
//! the view never move.

use fnv::FnvHashSet;

use super::data::CollectionData;
use super::item::ItemId;

/// Direction of a grouped move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
    Top,
    Bottom,
}

/// A view resolved against the current sequence.
struct ResolvedView {
    /// Sequence positions occupied by the view, ascending.
    slots: Vec<usize>,
    /// Ids at those positions.
    ids: Vec<ItemId>,
    /// Selected ids that are part of the view.
    selected: FnvHashSet<ItemId>,
}

impl ResolvedView {
    fn new(data: &CollectionData, view: &[ItemId], selection: &[ItemId]) -> Self {
        let members: FnvHashSet<ItemId> = view.iter().copied().collect();
        let (slots, ids): (Vec<usize>, Vec<ItemId>) = data
            .ids()
            .iter()
            .enumerate()
            .filter(|(_, id)| members.contains(*id))
            .map(|(slot, id)| (slot, *id))
            .unzip();
        let selected = selection
            .iter()
            .copied()
            .filter(|id| members.contains(id) && data.get(*id).is_some())
            .collect();
        Self {
            slots,
            ids,
            selected,
        }
    }

    fn is_selected(&self, id: ItemId) -> bool {
        self.selected.contains(&id)
    }

    /// True if some selected item has an unselected item above it.
    fn can_move_up(&self) -> bool {
        let mut seen_unselected = false;
        for id in &self.ids {
            if self.is_selected(*id) {
                if seen_unselected {
                    return true;
                }
            } else {
                seen_unselected = true;
            }
        }
        false
    }

    /// True if some selected item has an unselected item below it.
    fn can_move_down(&self) -> bool {
        let mut seen_unselected = false;
        for id in self.ids.iter().rev() {
            if self.is_selected(*id) {
                if seen_unselected {
                    return true;
                }
            } else {
                seen_unselected = true;
            }
        }
        false
    }

    fn reordered(&self, direction: MoveDirection) -> Vec<ItemId> {
        let mut ids = self.ids.clone();
        match direction {
            MoveDirection::Up => {
                for i in 1..ids.len() {
                    if self.is_selected(ids[i]) && !self.is_selected(ids[i - 1]) {
                        ids.swap(i - 1, i);
                    }
                }
            }
            MoveDirection::Down => {
                for i in (0..ids.len().saturating_sub(1)).rev() {
                    if self.is_selected(ids[i]) && !self.is_selected(ids[i + 1]) {
                        ids.swap(i, i + 1);
                    }
                }
            }
            MoveDirection::Top => {
                let (mut selected, rest): (Vec<ItemId>, Vec<ItemId>) =
                    ids.into_iter().partition(|id| self.is_selected(*id));
                selected.extend(rest);
                ids = selected;
            }
            MoveDirection::Bottom => {
                let (selected, mut rest): (Vec<ItemId>, Vec<ItemId>) =
                    ids.into_iter().partition(|id| self.is_selected(*id));
                rest.extend(selected);
                ids = rest;
            }
        }
        ids
    }
}

pub fn can_move(
    data: &CollectionData,
    view: &[ItemId],
    selection: &[ItemId],
    direction: MoveDirection,
) -> bool {
    let resolved = ResolvedView::new(data, view, selection);
    match direction {
        MoveDirection::Up | MoveDirection::Top => resolved.can_move_up(),
        MoveDirection::Down | MoveDirection::Bottom => resolved.can_move_down(),
    }
}

/// Applies a grouped move. Returns false, leaving the sequence untouched,
/// when the move is not legal.
pub fn apply_move(
    data: &mut CollectionData,
    view: &[ItemId],
    selection: &[ItemId],
    direction: MoveDirection,
) -> bool {
    let resolved = ResolvedView::new(data, view, selection);
    let legal = match direction {
        MoveDirection::Up | MoveDirection::Top => resolved.can_move_up(),
        MoveDirection::Down | MoveDirection::Bottom => resolved.can_move_down(),
    };
    if !legal {
        return false;
    }
    let reordered = resolved.reordered(direction);
    data.write_slots(&resolved.slots, &reordered);
    true
}
