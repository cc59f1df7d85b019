//! Ordered collections addressable by name.

use std::collections::HashMap;
use std::sync::Arc;

/// Anything held by a [`NamedVec`].
pub trait Named {
    /// The unique name of this item within its collection.
    fn name(&self) -> &str;
}

/// An insertion-ordered collection with name lookup.
///
/// Items keep their insertion index forever, so positional ids handed out at
/// insertion time stay valid. Names are unique; inserting a duplicate name is
/// rejected.
#[derive(Clone, Debug, Default)]
pub struct NamedVec<T> {
    items: Vec<T>,
    index: HashMap<Arc<str>, usize>,
}

impl<T: Named> NamedVec<T> {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the collection holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends an item, returning its index, or `None` if the name is taken.
    pub fn push(&mut self, item: T) -> Option<usize> {
        let name: Arc<str> = item.name().into();
        if self.index.contains_key(&name) {
            return None;
        }
        let at = self.items.len();
        self.index.insert(name, at);
        self.items.push(item);
        Some(at)
    }

    /// Looks up an item by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&i| &self.items[i])
    }

    /// Looks up an item's index by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the item at an index.
    #[must_use]
    pub fn get_at(&self, at: usize) -> Option<&T> {
        self.items.get(at)
    }

    /// Returns the item at an index, mutably.
    pub fn get_at_mut(&mut self, at: usize) -> Option<&mut T> {
        self.items.get_mut(at)
    }

    /// Returns true if an item with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates items in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &'a NamedVec<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> std::ops::Index<usize> for NamedVec<T> {
    type Output = T;

    fn index(&self, at: usize) -> &T {
        &self.items[at]
    }
}

impl<T> std::ops::IndexMut<usize> for NamedVec<T> {
    fn index_mut(&mut self, at: usize) -> &mut T {
        &mut self.items[at]
    }
}
