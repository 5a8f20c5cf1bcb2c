//! Terminal operators.
//!
//! Each operator consumes a [`ReceiveChannel`] under a guard and returns an
//! accumulated value. Operators that can answer before the stream ends
//! (`first`, `any`, `element_at`, ...) simply return; the guard then cancels
//! whatever the producer would still have generated.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::error::{Error, Result};
use crate::producer::ReceiveChannel;

impl<T> ReceiveChannel<T> {
    /// Collect every element into a vector
    pub async fn to_vec(self) -> Result<Vec<T>> {
        self.fold(Vec::new(), |mut items, item| {
            items.push(item);
            items
        })
        .await
    }

    /// Collect every element into a set
    pub async fn to_set(self) -> Result<HashSet<T>>
    where
        T: Eq + Hash,
    {
        self.fold(HashSet::new(), |mut items, item| {
            items.insert(item);
            items
        })
        .await
    }

    /// Number of elements
    pub async fn count(self) -> Result<usize> {
        self.fold(0, |count, _| count + 1).await
    }

    /// Number of elements matching the predicate
    pub async fn count_where<F>(self, mut predicate: F) -> Result<usize>
    where
        F: FnMut(&T) -> bool,
    {
        self.fold(0, |count, item| count + usize::from(predicate(&item)))
            .await
    }

    /// Accumulate from `init` with `f`
    pub async fn fold<A, F>(self, init: A, mut f: F) -> Result<A>
    where
        F: FnMut(A, T) -> A,
    {
        let mut guard = self.guard();
        let mut acc = init;
        while let Some(item) = guard.receive().await? {
            acc = f(acc, item);
        }
        Ok(acc)
    }

    /// Accumulate starting from the first element.
    ///
    /// Fails with [`Error::NoSuchElement`] on an empty channel.
    pub async fn reduce<F>(self, mut f: F) -> Result<T>
    where
        F: FnMut(T, T) -> T,
    {
        let mut guard = self.guard();
        let Some(mut acc) = guard.receive().await? else {
            return Err(Error::NoSuchElement("reduce on an empty channel"));
        };
        while let Some(item) = guard.receive().await? {
            acc = f(acc, item);
        }
        Ok(acc)
    }

    /// The first element; the rest is never generated
    pub async fn first(self) -> Result<T> {
        self.first_or_none()
            .await?
            .ok_or(Error::NoSuchElement("channel is empty"))
    }

    /// The first element, or `None` on an empty channel
    pub async fn first_or_none(self) -> Result<Option<T>> {
        let mut guard = self.guard();
        guard.receive().await
    }

    /// The first element matching the predicate
    pub async fn first_where<F>(self, mut predicate: F) -> Result<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut guard = self.guard();
        while let Some(item) = guard.receive().await? {
            if predicate(&item) {
                return Ok(item);
            }
        }
        Err(Error::NoSuchElement("no element matches the predicate"))
    }

    /// The last element
    pub async fn last(self) -> Result<T> {
        self.fold(None, |_, item| Some(item))
            .await?
            .ok_or(Error::NoSuchElement("channel is empty"))
    }

    /// The only element.
    ///
    /// Fails with [`Error::NoSuchElement`] when empty and with
    /// [`Error::MultipleElements`] as soon as a second element shows up.
    pub async fn single(self) -> Result<T> {
        let mut guard = self.guard();
        let Some(item) = guard.receive().await? else {
            return Err(Error::NoSuchElement("channel is empty"));
        };
        match guard.receive().await? {
            Some(_) => Err(Error::MultipleElements),
            None => Ok(item),
        }
    }

    /// The element at `index`
    pub async fn element_at(self, index: usize) -> Result<T> {
        let mut guard = self.guard();
        let mut position = 0;
        while let Some(item) = guard.receive().await? {
            if position == index {
                return Ok(item);
            }
            position += 1;
        }
        Err(Error::IndexOutOfBounds {
            index,
            len: position,
        })
    }

    /// Position of the first element equal to `target`
    pub async fn index_of(self, target: &T) -> Result<Option<usize>>
    where
        T: PartialEq,
    {
        let mut guard = self.guard();
        let mut position = 0;
        while let Some(item) = guard.receive().await? {
            if item == *target {
                return Ok(Some(position));
            }
            position += 1;
        }
        Ok(None)
    }

    /// True if any element matches
    pub async fn any<F>(self, mut predicate: F) -> Result<bool>
    where
        F: FnMut(&T) -> bool,
    {
        let mut guard = self.guard();
        while let Some(item) = guard.receive().await? {
            if predicate(&item) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// True if every element matches
    pub async fn all<F>(self, mut predicate: F) -> Result<bool>
    where
        F: FnMut(&T) -> bool,
    {
        Ok(!self.any(|item| !predicate(item)).await?)
    }

    /// True if no element matches
    pub async fn none<F>(self, predicate: F) -> Result<bool>
    where
        F: FnMut(&T) -> bool,
    {
        Ok(!self.any(predicate).await?)
    }

    /// Build a map from key/value pairs; later keys win
    pub async fn associate<K, V, F>(self, mut f: F) -> Result<HashMap<K, V>>
    where
        K: Eq + Hash,
        F: FnMut(T) -> (K, V),
    {
        self.fold(HashMap::new(), |mut map, item| {
            let (key, value) = f(item);
            map.insert(key, value);
            map
        })
        .await
    }

    /// Index elements by key; later elements win
    pub async fn associate_by<K, F>(self, mut key: F) -> Result<HashMap<K, T>>
    where
        K: Eq + Hash,
        F: FnMut(&T) -> K,
    {
        self.associate(|item| (key(&item), item)).await
    }

    /// Group elements by key, keeping arrival order inside each group
    pub async fn group_by<K, F>(self, mut key: F) -> Result<HashMap<K, Vec<T>>>
    where
        K: Eq + Hash,
        F: FnMut(&T) -> K,
    {
        self.fold(HashMap::new(), |mut groups: HashMap<K, Vec<T>>, item| {
            groups.entry(key(&item)).or_default().push(item);
            groups
        })
        .await
    }

    /// The first element with the smallest key
    pub async fn min_by_key<K, F>(self, mut key: F) -> Result<Option<T>>
    where
        K: Ord,
        F: FnMut(&T) -> K,
    {
        self.fold(None, |best: Option<(K, T)>, item| {
            let k = key(&item);
            match best {
                Some((best_key, best_item)) if best_key <= k => Some((best_key, best_item)),
                _ => Some((k, item)),
            }
        })
        .await
        .map(|best| best.map(|(_, item)| item))
    }

    /// The last element with the largest key
    pub async fn max_by_key<K, F>(self, mut key: F) -> Result<Option<T>>
    where
        K: Ord,
        F: FnMut(&T) -> K,
    {
        self.fold(None, |best: Option<(K, T)>, item| {
            let k = key(&item);
            match best {
                Some((best_key, best_item)) if best_key > k => Some((best_key, best_item)),
                _ => Some((k, item)),
            }
        })
        .await
        .map(|best| best.map(|(_, item)| item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{produce, ProducerState};
    use crate::sources::{from_iter, iterate, range};
    use crate::traits::ProducerExt;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_first_where_stops_generation() {
        let generated = Arc::new(Mutex::new(Vec::new()));
        let log = generated.clone();
        let source = produce(move |scope| async move {
            for x in [1, 3, 5, 6, 7] {
                log.lock().unwrap().push(x);
                scope.send(x).await?;
            }
            Ok(())
        });
        let handle = source.handle().clone();

        let found = source.first_where(|x| x % 2 == 0).await.unwrap();

        assert_eq!(found, 6);
        assert_eq!(handle.wait().await, ProducerState::Cancelled);
        assert_eq!(*generated.lock().unwrap(), vec![1, 3, 5, 6]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_take_stays_on_demand_across_threads() {
        for _ in 0..100 {
            let generated = Arc::new(Mutex::new(0u32));
            let counter = generated.clone();
            let source = iterate(0u32, move |n| {
                *counter.lock().unwrap() += 1;
                n + 1
            });

            let first = source.map(|n| n * 2).first().await.unwrap();

            assert_eq!(first, 0);
            // The successor of the delivered element is computed, nothing more.
            assert!(*generated.lock().unwrap() <= 2);
        }
    }

    #[tokio::test]
    async fn test_fold_and_reduce() {
        assert_eq!(range(1..5).fold(0, |acc, x| acc + x).await.unwrap(), 10);
        assert_eq!(range(1..5).reduce(|a, b| a * b).await.unwrap(), 24);
        assert!(matches!(
            range(0..0).reduce(|a, b| a + b).await,
            Err(Error::NoSuchElement(_))
        ));
    }

    #[tokio::test]
    async fn test_counting() {
        assert_eq!(range(0..10).count().await.unwrap(), 10);
        assert_eq!(range(0..10).count_where(|x| x % 3 == 0).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_single() {
        assert_eq!(from_iter(vec!['a']).single().await.unwrap(), 'a');
        assert!(matches!(
            from_iter(Vec::<char>::new()).single().await,
            Err(Error::NoSuchElement(_))
        ));

        let many = iterate(0u32, |n| n + 1);
        let handle = many.handle().clone();
        assert!(matches!(many.single().await, Err(Error::MultipleElements)));
        assert_eq!(handle.wait().await, ProducerState::Cancelled);
    }

    #[tokio::test]
    async fn test_element_at_and_index_of() {
        assert_eq!(range(10..20).element_at(3).await.unwrap(), 13);
        assert!(matches!(
            range(0..3).element_at(5).await,
            Err(Error::IndexOutOfBounds { index: 5, len: 3 })
        ));
        assert_eq!(range(10..20).index_of(&15).await.unwrap(), Some(5));
        assert_eq!(range(10..20).index_of(&42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_predicates() {
        assert!(iterate(1u64, |n| n * 2).any(|n| *n > 1000).await.unwrap());
        assert!(range(0..10).all(|n| *n < 10).await.unwrap());
        assert!(!range(0..10).all(|n| n % 2 == 0).await.unwrap());
        assert!(range(0..10).none(|n| *n > 100).await.unwrap());
    }

    #[tokio::test]
    async fn test_first_and_last() {
        assert_eq!(range(4..9).first().await.unwrap(), 4);
        assert_eq!(range(4..9).last().await.unwrap(), 8);
        assert_eq!(range(0..0).first_or_none().await.unwrap(), None);
        assert!(matches!(range(0..0).last().await, Err(Error::NoSuchElement(_))));
    }

    #[tokio::test]
    async fn test_grouping() {
        let words = vec!["ant", "bee", "cat", "bear", "cow"];

        let by_initial = from_iter(words.clone())
            .group_by(|w| w.chars().next().unwrap_or_default())
            .await
            .unwrap();
        assert_eq!(by_initial[&'b'], vec!["bee", "bear"]);
        assert_eq!(by_initial[&'c'], vec!["cat", "cow"]);

        let lengths = from_iter(words.clone())
            .associate(|w| (w, w.len()))
            .await
            .unwrap();
        assert_eq!(lengths["bear"], 4);

        let by_len = from_iter(words).associate_by(|w| w.len()).await.unwrap();
        assert_eq!(by_len[&3], "cow");
        assert_eq!(by_len[&4], "bear");
    }

    #[tokio::test]
    async fn test_min_max_and_set() {
        let values = vec![5, 1, 9, 1, 9];
        assert_eq!(
            from_iter(values.clone()).min_by_key(|x| *x).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            from_iter(values.clone()).max_by_key(|x| *x).await.unwrap(),
            Some(9)
        );
        assert_eq!(from_iter(values).to_set().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_terminal_surfaces_producer_failure() {
        let source = produce(|scope| async move {
            scope.send(1).await?;
            Err(Error::custom("disk full"))
        });
        let err = source.count().await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }
}
