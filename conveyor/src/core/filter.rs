//! Keep/drop predicates evaluated before an item advances.

use std::sync::Arc;

/// A shared keep/drop test over an item. `true` keeps the item.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// An ordered chain of predicates.
///
/// A chain accepts an item iff every predicate returns `true` for it; an empty
/// chain accepts everything. Predicates are shared by all workers of a stage
/// and must not mutate pipeline state.
pub struct FilterChain<T> {
    predicates: Vec<Predicate<T>>,
}

impl<T> FilterChain<T> {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    /// Appends a predicate.
    pub fn push<F>(&mut self, predicate: F)
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
    }

    /// Appends a predicate, builder style.
    #[must_use]
    pub fn with<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.push(predicate);
        self
    }

    /// Appends every predicate of `other`, keeping their order.
    #[must_use]
    pub fn concat(mut self, other: Self) -> Self {
        self.predicates.extend(other.predicates);
        self
    }

    /// Returns true if `item` passes every predicate.
    pub fn accept(&self, item: &T) -> bool {
        self.predicates.iter().all(|predicate| predicate(item))
    }

    /// Returns the number of predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Returns true if the chain has no predicates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl<T> Default for FilterChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for FilterChain<T> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
        }
    }
}

impl<T> Extend<Predicate<T>> for FilterChain<T> {
    fn extend<I: IntoIterator<Item = Predicate<T>>>(&mut self, iter: I) {
        self.predicates.extend(iter);
    }
}

impl<T> FromIterator<Predicate<T>> for FilterChain<T> {
    fn from_iter<I: IntoIterator<Item = Predicate<T>>>(iter: I) -> Self {
        Self {
            predicates: iter.into_iter().collect(),
        }
    }
}

impl<T> std::fmt::Debug for FilterChain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_even(x: &i32) -> bool {
        x % 2 == 0
    }

    fn is_positive(x: &i32) -> bool {
        *x > 0
    }

    #[test]
    fn test_empty_chain_accepts_everything() {
        let chain = FilterChain::<i32>::new();
        assert!(chain.is_empty());
        assert!(chain.accept(&-7));
        assert!(chain.accept(&0));
    }

    #[test]
    fn test_chain_is_conjunction() {
        let chain = FilterChain::new().with(is_even).with(is_positive);

        for x in -6..=6 {
            assert_eq!(chain.accept(&x), is_even(&x) && is_positive(&x), "x = {x}");
        }
    }

    #[test]
    fn test_single_rejecting_predicate_drops() {
        let chain = FilterChain::new().with(|_: &i32| true).with(|_: &i32| false);
        assert!(!chain.accept(&1));
    }

    #[test]
    fn test_concat_preserves_order_and_length() {
        let a = FilterChain::new().with(is_even);
        let b = FilterChain::new().with(is_positive).with(|x: &i32| *x < 100);

        let chain = a.concat(b);
        assert_eq!(chain.len(), 3);
        assert!(chain.accept(&42));
        assert!(!chain.accept(&102));
    }

    #[test]
    fn test_from_iterator() {
        let predicates: Vec<Predicate<i32>> = vec![Arc::new(is_even), Arc::new(is_positive)];
        let chain: FilterChain<i32> = predicates.into_iter().collect();
        assert_eq!(chain.len(), 2);
        assert!(!chain.accept(&-2));
    }

    #[test]
    fn test_clone_shares_predicates() {
        let chain = FilterChain::new().with(is_even);
        let cloned = chain.clone();
        assert!(cloned.accept(&4));
        assert!(!cloned.accept(&5));
    }
}
