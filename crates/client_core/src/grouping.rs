use std::{cmp::Ordering, collections::HashMap};

use shared::domain::{InvoiceLine, ItemId, ItemRef};

/// The lines of one shipment that share an item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemGroup<L> {
    pub item: ItemRef,
    pub lines: Vec<L>,
}

impl<L> ItemGroup<L> {
    pub fn key(&self) -> &str {
        self.item.id.as_str()
    }

    pub fn first_line(&self) -> Option<&L> {
        self.lines.first()
    }
}

/// Groups lines by item. Groups come back ordered by item name, then code,
/// then id; lines keep their input order within a group.
pub fn group_by_item(lines: &[InvoiceLine]) -> Vec<ItemGroup<InvoiceLine>> {
    let mut index: HashMap<&ItemId, usize> = HashMap::new();
    let mut groups: Vec<ItemGroup<InvoiceLine>> = Vec::new();

    for line in lines {
        match index.get(&line.item.id) {
            Some(&position) => groups[position].lines.push(line.clone()),
            None => {
                index.insert(&line.item.id, groups.len());
                groups.push(ItemGroup {
                    item: line.item.clone(),
                    lines: vec![line.clone()],
                });
            }
        }
    }

    groups.sort_by(|a, b| {
        a.item
            .name
            .cmp(&b.item.name)
            .then_with(|| a.item.code.cmp(&b.item.code))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    groups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSortKey {
    #[default]
    ItemName,
    ItemCode,
    Batch,
    ExpiryDate,
    PackSize,
    NumberOfPacks,
}

impl LineSortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "item_name" | "name" => Some(Self::ItemName),
            "item_code" | "code" => Some(Self::ItemCode),
            "batch" => Some(Self::Batch),
            "expiry_date" | "expiry" => Some(Self::ExpiryDate),
            "pack_size" => Some(Self::PackSize),
            "number_of_packs" | "packs" => Some(Self::NumberOfPacks),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortBy {
    pub key: LineSortKey,
    pub desc: bool,
}

impl SortBy {
    pub fn ascending(key: LineSortKey) -> Self {
        Self { key, desc: false }
    }

    pub fn descending(key: LineSortKey) -> Self {
        Self { key, desc: true }
    }

    fn compare(self, a: &InvoiceLine, b: &InvoiceLine) -> Ordering {
        let ordering = match self.key {
            LineSortKey::ItemName => a.item.name.cmp(&b.item.name),
            LineSortKey::ItemCode => a.item.code.cmp(&b.item.code),
            LineSortKey::Batch => a.detail.batch().cmp(&b.detail.batch()),
            LineSortKey::ExpiryDate => a.detail.expiry_date().cmp(&b.detail.expiry_date()),
            LineSortKey::PackSize => a.detail.pack_size().cmp(&b.detail.pack_size()),
            LineSortKey::NumberOfPacks => {
                match (a.detail.number_of_packs(), b.detail.number_of_packs()) {
                    (Some(x), Some(y)) => x.total_cmp(&y),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        };
        if self.desc {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Stable sort; lines that compare equal keep their relative order.
pub fn sort_lines(lines: &mut [InvoiceLine], sort: SortBy) {
    lines.sort_by(|a, b| sort.compare(a, b));
}

/// Orders groups by their first line. Empty groups sink to the end.
pub fn sort_groups(groups: &mut [ItemGroup<InvoiceLine>], sort: SortBy) {
    groups.sort_by(|a, b| match (a.first_line(), b.first_line()) {
        (Some(x), Some(y)) => sort.compare(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Result of stepping to the item after the one being edited.
#[derive(Debug, Clone, PartialEq)]
pub struct NextItem<L> {
    pub next: Option<L>,
    pub disabled: bool,
}

/// Finds the group for `current` and returns the first line of the group
/// after it. Stepping is disabled when `current` is unknown, is the last
/// group, or the following group has no lines.
pub fn next_item<L: Clone>(groups: &[ItemGroup<L>], current: &ItemId) -> NextItem<L> {
    let next = groups
        .iter()
        .position(|group| &group.item.id == current)
        .and_then(|position| groups.get(position + 1))
        .and_then(|group| group.first_line().cloned());

    NextItem {
        disabled: next.is_none(),
        next,
    }
}

#[cfg(test)]
#[path = "tests/grouping_tests.rs"]
mod tests;
