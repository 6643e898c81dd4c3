//! Two-level test hierarchy and an ordered in-memory store.

use std::convert::Infallible;

use crate::{Action, HierarchyNode, Leafless, LevelStore};

/// Top-level test node.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub key: String,
    pub value: String,
    pub action: Action,
    pub children: Vec<SubItem>,
}

/// Leaf test node.
#[derive(Clone, Debug, PartialEq)]
pub struct SubItem {
    pub key: String,
    pub value: String,
    pub action: Action,
}

pub fn item(key: &str, value: &str) -> Item {
    item_with(key, value, Vec::new())
}

pub fn item_with(key: &str, value: &str, children: Vec<SubItem>) -> Item {
    Item {
        key: key.to_string(),
        value: value.to_string(),
        action: Action::Unspecified,
        children,
    }
}

pub fn sub(key: &str, value: &str) -> SubItem {
    SubItem {
        key: key.to_string(),
        value: value.to_string(),
        action: Action::Unspecified,
    }
}

impl HierarchyNode for Item {
    type Child = SubItem;

    fn with_key(key: &str) -> Self {
        item(key, "")
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn action(&self) -> Action {
        self.action
    }

    fn set_action(&mut self, action: Action) {
        self.action = action;
    }

    fn children(&self) -> &[Self::Child] {
        &self.children
    }

    fn set_children(&mut self, children: Vec<Self::Child>) {
        self.children = children;
    }
}

impl HierarchyNode for SubItem {
    type Child = Leafless;

    fn with_key(key: &str) -> Self {
        sub(key, "")
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn action(&self) -> Action {
        self.action
    }

    fn set_action(&mut self, action: Action) {
        self.action = action;
    }

    fn children(&self) -> &[Self::Child] {
        &[]
    }

    fn set_children(&mut self, _children: Vec<Self::Child>) {}
}

type Row = (String, String, Vec<(String, String)>);

/// Insertion-ordered two-level store.
#[derive(Debug, Default)]
pub struct ItemStore {
    rows: Vec<Row>,
    /// When set, the next `update` matching `.0` re-keys the record to `.1`.
    pub rekey_on_update: Option<(String, String)>,
}

/// Build a store holding the given snapshot.
pub fn store_from(items: &[Item]) -> ItemStore {
    let rows = items
        .iter()
        .map(|i| {
            (
                i.key.clone(),
                i.value.clone(),
                i.children
                    .iter()
                    .map(|c| (c.key.clone(), c.value.clone()))
                    .collect(),
            )
        })
        .collect();
    ItemStore {
        rows,
        rekey_on_update: None,
    }
}

/// Read the store back as a snapshot (actions all `Unspecified`).
pub fn snapshot(store: &ItemStore) -> Vec<Item> {
    store
        .rows
        .iter()
        .map(|(key, value, children)| {
            item_with(
                key,
                value,
                children.iter().map(|(k, v)| sub(k, v)).collect(),
            )
        })
        .collect()
}

impl LevelStore<Item> for ItemStore {
    type Error = Infallible;

    fn create(&mut self, node: &Item) -> Result<String, Self::Error> {
        self.rows.retain(|(key, _, _)| key != &node.key);
        self.rows.push((node.key.clone(), node.value.clone(), Vec::new()));
        Ok(node.key.clone())
    }

    fn update(&mut self, node: &Item) -> Result<String, Self::Error> {
        let new_key = match self.rekey_on_update.take() {
            Some((from, to)) if from == node.key => to,
            other => {
                self.rekey_on_update = other;
                node.key.clone()
            }
        };
        if let Some(row) = self.rows.iter_mut().find(|(key, _, _)| key == &node.key) {
            row.0 = new_key.clone();
            row.1 = node.value.clone();
        } else {
            self.rows.push((new_key.clone(), node.value.clone(), Vec::new()));
        }
        Ok(new_key)
    }

    fn delete(&mut self, key: &str) -> Result<(), Self::Error> {
        self.rows.retain(|(row_key, _, _)| row_key != key);
        Ok(())
    }

    fn child_store<'a>(
        &'a mut self,
        key: &str,
    ) -> Option<Box<dyn LevelStore<SubItem, Error = Self::Error> + 'a>> {
        match self.rows.iter_mut().find(|(row_key, _, _)| row_key == key) {
            Some(row) => Some(Box::new(SubStore { rows: &mut row.2 })),
            None => None,
        }
    }
}

struct SubStore<'a> {
    rows: &'a mut Vec<(String, String)>,
}

impl LevelStore<SubItem> for SubStore<'_> {
    type Error = Infallible;

    fn create(&mut self, node: &SubItem) -> Result<String, Self::Error> {
        self.rows.retain(|(key, _)| key != &node.key);
        self.rows.push((node.key.clone(), node.value.clone()));
        Ok(node.key.clone())
    }

    fn update(&mut self, node: &SubItem) -> Result<String, Self::Error> {
        if let Some(row) = self.rows.iter_mut().find(|(key, _)| key == &node.key) {
            row.1 = node.value.clone();
        } else {
            self.rows.push((node.key.clone(), node.value.clone()));
        }
        Ok(node.key.clone())
    }

    fn delete(&mut self, key: &str) -> Result<(), Self::Error> {
        self.rows.retain(|(row_key, _)| row_key != key);
        Ok(())
    }

    fn child_store<'a>(
        &'a mut self,
        _key: &str,
    ) -> Option<Box<dyn LevelStore<Leafless, Error = Self::Error> + 'a>> {
        None
    }
}
