//! Chunks: the unit of transfer between pulls

use std::ops::Deref;

/// An immutable, finite, ordered batch of elements
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chunk<A> {
    items: Vec<A>,
}

impl<A> Default for Chunk<A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<A> Chunk<A> {
    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    pub fn single(item: A) -> Self {
        Self { items: vec![item] }
    }

    pub fn from_vec(items: Vec<A>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[A] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<A> {
        self.items
    }

    pub fn map<B, F>(self, f: F) -> Chunk<B>
    where
        F: FnMut(A) -> B,
    {
        Chunk {
            items: self.items.into_iter().map(f).collect(),
        }
    }

    pub fn filter<F>(self, mut pred: F) -> Chunk<A>
    where
        F: FnMut(&A) -> bool,
    {
        Chunk {
            items: self.items.into_iter().filter(|a| pred(a)).collect(),
        }
    }

    pub fn filter_map<B, F>(self, f: F) -> Chunk<B>
    where
        F: FnMut(A) -> Option<B>,
    {
        Chunk {
            items: self.items.into_iter().filter_map(f).collect(),
        }
    }

    /// Keep the first `n` elements
    pub fn take(mut self, n: usize) -> Chunk<A> {
        self.items.truncate(n);
        self
    }

    /// Split into the first `n` elements and the rest
    pub fn split_at(mut self, n: usize) -> (Chunk<A>, Chunk<A>) {
        let rest = self.items.split_off(n.min(self.items.len()));
        (self, Chunk { items: rest })
    }

    pub fn concat(mut self, other: Chunk<A>) -> Chunk<A> {
        self.items.extend(other.items);
        self
    }
}

impl<A> Deref for Chunk<A> {
    type Target = [A];

    fn deref(&self) -> &[A] {
        &self.items
    }
}

impl<A> From<Vec<A>> for Chunk<A> {
    fn from(items: Vec<A>) -> Self {
        Self { items }
    }
}

impl<A> FromIterator<A> for Chunk<A> {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<A> IntoIterator for Chunk<A> {
    type Item = A;
    type IntoIter = std::vec::IntoIter<A>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, A> IntoIterator for &'a Chunk<A> {
    type Item = &'a A;
    type IntoIter = std::slice::Iter<'a, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
