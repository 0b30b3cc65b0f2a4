// bitset.rs - Component membership bitset
//
// Mirrors a signature as one bit per component id so that membership and
// superset tests never touch the sorted type list.

use crate::ecs::ComponentTypeId;

const WORD_BITS: usize = 64;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    pub fn from_ids(ids: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        let mut bits = Self::new();
        for id in ids {
            bits.insert(id);
        }
        bits
    }

    pub fn insert(&mut self, id: ComponentTypeId) {
        let (word, bit) = locate(id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << bit;
    }

    pub fn remove(&mut self, id: ComponentTypeId) {
        let (word, bit) = locate(id);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1u64 << bit);
        }
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }

    #[inline]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        let (word, bit) = locate(id);
        self.words.get(word).is_some_and(|w| w & (1u64 << bit) != 0)
    }

    /// True if every bit set in `other` is also set in `self`.
    pub fn contains_all(&self, other: &BitSet) -> bool {
        other.words.iter().enumerate().all(|(i, &w)| {
            let mine = self.words.get(i).copied().unwrap_or(0);
            mine & w == w
        })
    }

    /// True if `self` and `other` share at least one bit.
    pub fn intersects(&self, other: &BitSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[inline]
fn locate(id: ComponentTypeId) -> (usize, u32) {
    let id = id as usize;
    (id / WORD_BITS, (id % WORD_BITS) as u32)
}
