//! Persistent sorted set.
//!
//! [`SortedSet`] is an immutable AVL tree ordered by an injected comparator.
//! `insert` and `remove` copy only the path from the root to the touched node
//! and share every other subtree with the previous version, so older versions
//! stay valid and can be handed to readers without locking.
//!
//! Every node records the size of its subtree, which gives O(log n)
//! positional lookups ([`SortedSet::index_of`]).

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Comparator shared by every version of a set.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

type Link<T> = Option<Arc<Node<T>>>;

struct Node<T> {
    item: T,
    left: Link<T>,
    right: Link<T>,
    height: u8,
    size: usize,
}

fn height<T>(link: &Link<T>) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

fn size<T>(link: &Link<T>) -> usize {
    link.as_ref().map_or(0, |n| n.size)
}

fn make<T>(item: T, left: Link<T>, right: Link<T>) -> Arc<Node<T>> {
    Arc::new(Node {
        height: 1 + height(&left).max(height(&right)),
        size: 1 + size(&left) + size(&right),
        item,
        left,
        right,
    })
}

/// Rebuild a node whose subtrees differ in height by at most two.
fn balance<T: Clone>(item: T, left: Link<T>, right: Link<T>) -> Arc<Node<T>> {
    let (hl, hr) = (height(&left), height(&right));
    if hl > hr + 1 {
        if let Some(l) = &left {
            if height(&l.left) >= height(&l.right) {
                return make(
                    l.item.clone(),
                    l.left.clone(),
                    Some(make(item, l.right.clone(), right)),
                );
            }
            if let Some(lr) = &l.right {
                return make(
                    lr.item.clone(),
                    Some(make(l.item.clone(), l.left.clone(), lr.left.clone())),
                    Some(make(item, lr.right.clone(), right)),
                );
            }
        }
    } else if hr > hl + 1 {
        if let Some(r) = &right {
            if height(&r.right) >= height(&r.left) {
                return make(
                    r.item.clone(),
                    Some(make(item, left, r.left.clone())),
                    r.right.clone(),
                );
            }
            if let Some(rl) = &r.left {
                return make(
                    rl.item.clone(),
                    Some(make(item, left, rl.left.clone())),
                    Some(make(r.item.clone(), rl.right.clone(), r.right.clone())),
                );
            }
        }
    }
    make(item, left, right)
}

fn insert_node<T: Clone>(link: &Link<T>, item: T, cmp: &Comparator<T>) -> Arc<Node<T>> {
    match link {
        None => make(item, None, None),
        Some(n) => match cmp(&item, &n.item) {
            Ordering::Less => balance(
                n.item.clone(),
                Some(insert_node(&n.left, item, cmp)),
                n.right.clone(),
            ),
            Ordering::Greater => balance(
                n.item.clone(),
                n.left.clone(),
                Some(insert_node(&n.right, item, cmp)),
            ),
            Ordering::Equal => make(item, n.left.clone(), n.right.clone()),
        },
    }
}

fn remove_min<T: Clone>(node: &Arc<Node<T>>) -> (T, Link<T>) {
    match &node.left {
        None => (node.item.clone(), node.right.clone()),
        Some(l) => {
            let (min, left) = remove_min(l);
            (
                min,
                Some(balance(node.item.clone(), left, node.right.clone())),
            )
        }
    }
}

/// Returns `None` when `item` is absent so callers can keep the old root.
fn remove_node<T: Clone>(link: &Link<T>, item: &T, cmp: &Comparator<T>) -> Option<Link<T>> {
    let n = link.as_ref()?;
    match cmp(item, &n.item) {
        Ordering::Less => remove_node(&n.left, item, cmp)
            .map(|left| Some(balance(n.item.clone(), left, n.right.clone()))),
        Ordering::Greater => remove_node(&n.right, item, cmp)
            .map(|right| Some(balance(n.item.clone(), n.left.clone(), right))),
        Ordering::Equal => Some(match (&n.left, &n.right) {
            (None, right) => right.clone(),
            (left, None) => left.clone(),
            (left, Some(right)) => {
                let (successor, rest) = remove_min(right);
                Some(balance(successor, left.clone(), rest))
            }
        }),
    }
}

/// An immutable ordered set with structural sharing between versions.
pub struct SortedSet<T> {
    root: Link<T>,
    cmp: Comparator<T>,
}

impl<T> Clone for SortedSet<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            cmp: Arc::clone(&self.cmp),
        }
    }
}

impl<T: Ord + Clone + 'static> Default for SortedSet<T> {
    fn default() -> Self {
        Self::natural()
    }
}

impl<T: Clone> SortedSet<T> {
    /// An empty set ordered by `cmp`.
    pub fn new(cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        Self::with_comparator(Arc::new(cmp))
    }

    /// An empty set sharing an existing comparator.
    pub fn with_comparator(cmp: Comparator<T>) -> Self {
        Self { root: None, cmp }
    }

    /// An empty set ordered by `T`'s own ordering.
    pub fn natural() -> Self
    where
        T: Ord + 'static,
    {
        Self::new(T::cmp)
    }

    pub fn comparator(&self) -> &Comparator<T> {
        &self.cmp
    }

    pub fn len(&self) -> usize {
        size(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// A new version containing `item`, replacing any equal element.
    #[must_use]
    pub fn insert(&self, item: T) -> Self {
        Self {
            root: Some(insert_node(&self.root, item, &self.cmp)),
            cmp: Arc::clone(&self.cmp),
        }
    }

    /// A new version without `item`. Removing an absent item shares the root.
    #[must_use]
    pub fn remove(&self, item: &T) -> Self {
        match remove_node(&self.root, item, &self.cmp) {
            Some(root) => Self {
                root,
                cmp: Arc::clone(&self.cmp),
            },
            None => self.clone(),
        }
    }

    /// Find an element with a probe that reports how the element compares to
    /// the target (`Less` means the element sorts before it).
    pub fn seek(&self, probe: impl Fn(&T) -> Ordering) -> Option<&T> {
        let mut link = &self.root;
        while let Some(n) = link {
            match probe(&n.item) {
                Ordering::Less => link = &n.right,
                Ordering::Greater => link = &n.left,
                Ordering::Equal => return Some(&n.item),
            }
        }
        None
    }

    pub fn get(&self, item: &T) -> Option<&T> {
        self.seek(|candidate| (self.cmp)(candidate, item))
    }

    pub fn contains(&self, item: &T) -> bool {
        self.get(item).is_some()
    }

    /// Position of `item` in iteration order.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        let mut link = &self.root;
        let mut skipped = 0;
        while let Some(n) = link {
            match (self.cmp)(item, &n.item) {
                Ordering::Less => link = &n.left,
                Ordering::Greater => {
                    skipped += size(&n.left) + 1;
                    link = &n.right;
                }
                Ordering::Equal => return Some(skipped + size(&n.left)),
            }
        }
        None
    }

    pub fn first(&self) -> Option<&T> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<&T> {
        let mut node = self.root.as_ref()?;
        while let Some(right) = &node.right {
            node = right;
        }
        Some(&node.item)
    }

    /// The smallest element that is not less than `item`.
    pub fn first_after_or_equal(&self, item: &T) -> Option<&T> {
        self.iter_from(item).next()
    }

    /// In-order iteration over the whole set.
    pub fn iter(&self) -> Iter<'_, T> {
        let mut iter = Iter { stack: Vec::new() };
        iter.push_left(&self.root);
        iter
    }

    /// In-order iteration starting at the first element `>= start`.
    pub fn iter_from(&self, start: &T) -> Iter<'_, T> {
        let mut stack = Vec::new();
        let mut link = &self.root;
        while let Some(n) = link {
            if (self.cmp)(&n.item, start) == Ordering::Less {
                link = &n.right;
            } else {
                stack.push(&**n);
                link = &n.left;
            }
        }
        Iter { stack }
    }

    /// Visit every element in `[low, high)`.
    pub fn for_each_in_range(&self, low: &T, high: &T, mut f: impl FnMut(&T)) {
        for item in self.iter_from(low) {
            if (self.cmp)(item, high) != Ordering::Less {
                break;
            }
            f(item);
        }
    }

    /// Visit elements from `start` onwards until `f` returns false.
    pub fn for_each_while(&self, start: &T, mut f: impl FnMut(&T) -> bool) {
        for item in self.iter_from(start) {
            if !f(item) {
                break;
            }
        }
    }
}

/// In-order iterator over a [`SortedSet`].
pub struct Iter<'a, T> {
    stack: Vec<&'a Node<T>>,
}

impl<'a, T> Iter<'a, T> {
    fn push_left(&mut self, mut link: &'a Link<T>) {
        while let Some(n) = link {
            self.stack.push(n);
            link = &n.left;
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(&node.right);
        Some(&node.item)
    }
}

impl<'a, T: Clone> IntoIterator for &'a SortedSet<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for SortedSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Clone + PartialEq> PartialEq for SortedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}
