use std::collections::{HashMap, HashSet};

use crate::{cache::Row, grouping::ItemGroup};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowState {
    pub is_selected: bool,
}

/// Which rows the user has ticked, keyed by row id (or item id when the
/// screen shows grouped items). Mutations read it but never write it.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    rows: HashMap<String, RowState>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the row and returns its new state.
    pub fn toggle(&mut self, key: &str) -> bool {
        let state = self.rows.entry(key.to_string()).or_default();
        state.is_selected = !state.is_selected;
        state.is_selected
    }

    pub fn select(&mut self, key: impl Into<String>) {
        self.rows.entry(key.into()).or_default().is_selected = true;
    }

    pub fn deselect(&mut self, key: &str) {
        if let Some(state) = self.rows.get_mut(key) {
            state.is_selected = false;
        }
    }

    pub fn select_all<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        for key in keys {
            self.select(key);
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn row_state(&self, key: &str) -> Option<RowState> {
        self.rows.get(key).copied()
    }

    pub fn is_selected(&self, key: &str) -> bool {
        self.rows.get(key).is_some_and(|state| state.is_selected)
    }

    /// Selected keys in sorted order.
    pub fn selected_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .rows
            .iter()
            .filter(|(_, state)| state.is_selected)
            .map(|(key, _)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn selected_count(&self) -> usize {
        self.rows.values().filter(|state| state.is_selected).count()
    }

    /// Drops entries for rows that are no longer shown.
    pub fn retain_present(&mut self, present: &HashSet<&str>) {
        self.rows.retain(|key, _| present.contains(key.as_str()));
    }
}

/// The rows a screen currently shows, either one per line or one per item.
#[derive(Debug)]
pub enum RowsView<'a, R> {
    Flat(&'a [R]),
    Grouped(&'a [ItemGroup<R>]),
}

impl<R> Clone for RowsView<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for RowsView<'_, R> {}

/// Resolves the selection against the view. Selected groups expand into all
/// of their lines.
pub fn selected_rows<R: Row>(view: RowsView<'_, R>, selection: &SelectionState) -> Vec<R> {
    match view {
        RowsView::Flat(rows) => rows
            .iter()
            .filter(|row| selection.is_selected(row.id()))
            .cloned()
            .collect(),
        RowsView::Grouped(groups) => groups
            .iter()
            .filter(|group| selection.is_selected(group.key()))
            .flat_map(|group| group.lines.iter().cloned())
            .collect(),
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
