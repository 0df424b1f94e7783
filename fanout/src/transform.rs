//! Parallel map and flat-map over collections.
//!
//! Every element becomes one work unit of a [`Batch`]. Results land in
//! pre-sized output slots:
//!
//! - sequences and ordered collections use one slot per input index, so
//!   output order always matches input order;
//! - `HashMap` and `HashSet` outputs are filled under a mutex that is held
//!   only for the insert. When two elements map to the same key, one of them
//!   wins and which one is not specified.
//!
//! An empty input returns an empty collection without launching any work.
//! When the batch fails, the partial output is dropped and only the error is
//! returned.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use crate::batch::Batch;
use crate::context::Context;
use crate::error::{BoxError, Error};
use crate::executor::{Task, task};

impl Batch<'_> {
    /// Runs `f` on every element; slot `i` receives the result for input `i`.
    async fn map_indexed<T, R, F, Fut>(&self, input: Vec<T>, f: F) -> Result<Vec<R>, Error>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let slots: Arc<Vec<Mutex<Option<R>>>> = Arc::new(input.iter().map(|_| Mutex::new(None)).collect());
        let f = Arc::new(f);
        let units: Vec<Task> = input
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let slots = Arc::clone(&slots);
                let f = Arc::clone(&f);
                task(move |ctx| async move {
                    let value = (*f)(ctx, item).await?;
                    // Each index is owned by exactly one unit.
                    *slots[index].lock() = Some(value);
                    Ok(())
                })
            })
            .collect();

        self.run(units).await?;

        let slots = Arc::into_inner(slots).ok_or(Error::Incomplete)?;
        slots
            .into_iter()
            .map(Mutex::into_inner)
            .collect::<Option<Vec<R>>>()
            .ok_or(Error::Incomplete)
    }

    /// Runs `f` on every element and folds each result into `C` under a lock.
    async fn fill_locked<I, O, C, F, Fut>(
        &self,
        input: Vec<I>,
        f: F,
        merge: fn(&mut C, O),
    ) -> Result<C, Error>
    where
        I: Send + 'static,
        O: Send + 'static,
        C: Default + Send + 'static,
        F: Fn(Context, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, BoxError>> + Send + 'static,
    {
        if input.is_empty() {
            return Ok(C::default());
        }

        let output = Arc::new(Mutex::new(C::default()));
        let f = Arc::new(f);
        let units: Vec<Task> = input
            .into_iter()
            .map(|item| {
                let output = Arc::clone(&output);
                let f = Arc::clone(&f);
                task(move |ctx| async move {
                    let value = (*f)(ctx, item).await?;
                    merge(&mut output.lock(), value);
                    Ok(())
                })
            })
            .collect();

        self.run(units).await?;

        Arc::into_inner(output)
            .map(Mutex::into_inner)
            .ok_or(Error::Incomplete)
    }

    /// Maps every element of `input`, preserving order.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn map_vec<T, R, F, Fut>(&self, input: Vec<T>, f: F) -> Result<Vec<R>, Error>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        self.map_indexed(input, f).await
    }

    /// Maps every element to a sequence and concatenates them in input order.
    ///
    /// Returns an empty, unallocated vector when every produced sequence is empty.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn flat_map_vec<T, R, F, Fut>(&self, input: Vec<T>, f: F) -> Result<Vec<R>, Error>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<R>, BoxError>> + Send + 'static,
    {
        let nested = self.map_indexed(input, f).await?;
        let total: usize = nested.iter().map(Vec::len).sum();
        if total == 0 {
            return Ok(Vec::new());
        }
        let mut flat = Vec::with_capacity(total);
        for chunk in nested {
            flat.extend(chunk);
        }
        Ok(flat)
    }

    /// Runs `f` on every element for its side effects.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any call fails, panics, or is canceled.
    pub async fn for_each_vec<T, F, Fut>(&self, input: Vec<T>, f: F) -> Result<(), Error>
    where
        T: Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        if input.is_empty() {
            return Ok(());
        }
        let f = Arc::new(f);
        let units: Vec<Task> = input
            .into_iter()
            .map(|item| {
                let f = Arc::clone(&f);
                task(move |ctx| (*f)(ctx, item))
            })
            .collect();
        self.run(units).await
    }

    /// Maps every entry of a `HashMap` to a new key and value.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn map_hash_map<K, V, K2, V2, F, Fut>(
        &self,
        input: HashMap<K, V>,
        f: F,
    ) -> Result<HashMap<K2, V2>, Error>
    where
        K: Send + 'static,
        V: Send + 'static,
        K2: Eq + Hash + Send + 'static,
        V2: Send + 'static,
        F: Fn(Context, K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(K2, V2), BoxError>> + Send + 'static,
    {
        self.fill_locked(
            input.into_iter().collect(),
            move |ctx, (key, value): (K, V)| f(ctx, key, value),
            |out: &mut HashMap<K2, V2>, (key, value): (K2, V2)| {
                out.insert(key, value);
            },
        )
        .await
    }

    /// Maps every entry of a `HashMap` to a map and merges the results.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn flat_map_hash_map<K, V, K2, V2, F, Fut>(
        &self,
        input: HashMap<K, V>,
        f: F,
    ) -> Result<HashMap<K2, V2>, Error>
    where
        K: Send + 'static,
        V: Send + 'static,
        K2: Eq + Hash + Send + 'static,
        V2: Send + 'static,
        F: Fn(Context, K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<K2, V2>, BoxError>> + Send + 'static,
    {
        let merged = self
            .fill_locked(
                input.into_iter().collect(),
                move |ctx, (key, value): (K, V)| f(ctx, key, value),
                |out: &mut HashMap<K2, V2>, part: HashMap<K2, V2>| out.extend(part),
            )
            .await?;
        Ok(if merged.is_empty() { HashMap::new() } else { merged })
    }

    /// Maps every entry of an `IndexMap`, keeping the input's entry order.
    ///
    /// If two entries map to the same key, the later entry's value is kept
    /// at the position where the key first appeared.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn map_index_map<K, V, K2, V2, F, Fut>(
        &self,
        input: IndexMap<K, V>,
        f: F,
    ) -> Result<IndexMap<K2, V2>, Error>
    where
        K: Send + 'static,
        V: Send + 'static,
        K2: Eq + Hash + Send + 'static,
        V2: Send + 'static,
        F: Fn(Context, K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(K2, V2), BoxError>> + Send + 'static,
    {
        let pairs = self
            .map_indexed(
                input.into_iter().collect(),
                move |ctx, (key, value): (K, V)| f(ctx, key, value),
            )
            .await?;
        Ok(pairs.into_iter().collect())
    }

    /// Maps every entry of an `IndexMap` to a map and replays them in input order.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn flat_map_index_map<K, V, K2, V2, F, Fut>(
        &self,
        input: IndexMap<K, V>,
        f: F,
    ) -> Result<IndexMap<K2, V2>, Error>
    where
        K: Send + 'static,
        V: Send + 'static,
        K2: Eq + Hash + Send + 'static,
        V2: Send + 'static,
        F: Fn(Context, K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<IndexMap<K2, V2>, BoxError>> + Send + 'static,
    {
        let parts = self
            .map_indexed(
                input.into_iter().collect(),
                move |ctx, (key, value): (K, V)| f(ctx, key, value),
            )
            .await?;
        let total: usize = parts.iter().map(IndexMap::len).sum();
        if total == 0 {
            return Ok(IndexMap::new());
        }
        let mut merged = IndexMap::with_capacity(total);
        for part in parts {
            merged.extend(part);
        }
        Ok(merged)
    }

    /// Maps every element of a `HashSet`.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn map_hash_set<T, R, F, Fut>(&self, input: HashSet<T>, f: F) -> Result<HashSet<R>, Error>
    where
        T: Send + 'static,
        R: Eq + Hash + Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        self.fill_locked(input.into_iter().collect(), f, |out: &mut HashSet<R>, value: R| {
            out.insert(value);
        })
        .await
    }

    /// Maps every element of a `HashSet` to a set and unions the results.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn flat_map_hash_set<T, R, F, Fut>(&self, input: HashSet<T>, f: F) -> Result<HashSet<R>, Error>
    where
        T: Send + 'static,
        R: Eq + Hash + Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashSet<R>, BoxError>> + Send + 'static,
    {
        let merged = self
            .fill_locked(input.into_iter().collect(), f, |out: &mut HashSet<R>, part: HashSet<R>| {
                out.extend(part);
            })
            .await?;
        Ok(if merged.is_empty() { HashSet::new() } else { merged })
    }

    /// Maps every element of an `IndexSet`, keeping first-occurrence order.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn map_index_set<T, R, F, Fut>(&self, input: IndexSet<T>, f: F) -> Result<IndexSet<R>, Error>
    where
        T: Send + 'static,
        R: Eq + Hash + Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        let values = self.map_indexed(input.into_iter().collect(), f).await?;
        Ok(values.into_iter().collect())
    }

    /// Maps every element of an `IndexSet` to a set and replays them in input order.
    ///
    /// # Errors
    ///
    /// Returns the batch error if any transform fails, panics, or is canceled.
    pub async fn flat_map_index_set<T, R, F, Fut>(
        &self,
        input: IndexSet<T>,
        f: F,
    ) -> Result<IndexSet<R>, Error>
    where
        T: Send + 'static,
        R: Eq + Hash + Send + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<IndexSet<R>, BoxError>> + Send + 'static,
    {
        let parts = self.map_indexed(input.into_iter().collect(), f).await?;
        let total: usize = parts.iter().map(IndexSet::len).sum();
        if total == 0 {
            return Ok(IndexSet::new());
        }
        let mut merged = IndexSet::with_capacity(total);
        for part in parts {
            merged.extend(part);
        }
        Ok(merged)
    }
}

/// [`Batch::map_vec`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn map_vec<T, R, F, Fut>(bound: usize, input: Vec<T>, f: F) -> Result<Vec<R>, Error>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    Batch::new(bound).map_vec(input, f).await
}

/// [`Batch::flat_map_vec`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn flat_map_vec<T, R, F, Fut>(bound: usize, input: Vec<T>, f: F) -> Result<Vec<R>, Error>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<R>, BoxError>> + Send + 'static,
{
    Batch::new(bound).flat_map_vec(input, f).await
}

/// [`Batch::for_each_vec`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any call fails, panics, or is canceled.
pub async fn for_each_vec<T, F, Fut>(bound: usize, input: Vec<T>, f: F) -> Result<(), Error>
where
    T: Send + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Batch::new(bound).for_each_vec(input, f).await
}

/// [`Batch::map_hash_map`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn map_hash_map<K, V, K2, V2, F, Fut>(
    bound: usize,
    input: HashMap<K, V>,
    f: F,
) -> Result<HashMap<K2, V2>, Error>
where
    K: Send + 'static,
    V: Send + 'static,
    K2: Eq + Hash + Send + 'static,
    V2: Send + 'static,
    F: Fn(Context, K, V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(K2, V2), BoxError>> + Send + 'static,
{
    Batch::new(bound).map_hash_map(input, f).await
}

/// [`Batch::flat_map_hash_map`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn flat_map_hash_map<K, V, K2, V2, F, Fut>(
    bound: usize,
    input: HashMap<K, V>,
    f: F,
) -> Result<HashMap<K2, V2>, Error>
where
    K: Send + 'static,
    V: Send + 'static,
    K2: Eq + Hash + Send + 'static,
    V2: Send + 'static,
    F: Fn(Context, K, V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<K2, V2>, BoxError>> + Send + 'static,
{
    Batch::new(bound).flat_map_hash_map(input, f).await
}

/// [`Batch::map_index_map`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn map_index_map<K, V, K2, V2, F, Fut>(
    bound: usize,
    input: IndexMap<K, V>,
    f: F,
) -> Result<IndexMap<K2, V2>, Error>
where
    K: Send + 'static,
    V: Send + 'static,
    K2: Eq + Hash + Send + 'static,
    V2: Send + 'static,
    F: Fn(Context, K, V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(K2, V2), BoxError>> + Send + 'static,
{
    Batch::new(bound).map_index_map(input, f).await
}

/// [`Batch::flat_map_index_map`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn flat_map_index_map<K, V, K2, V2, F, Fut>(
    bound: usize,
    input: IndexMap<K, V>,
    f: F,
) -> Result<IndexMap<K2, V2>, Error>
where
    K: Send + 'static,
    V: Send + 'static,
    K2: Eq + Hash + Send + 'static,
    V2: Send + 'static,
    F: Fn(Context, K, V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IndexMap<K2, V2>, BoxError>> + Send + 'static,
{
    Batch::new(bound).flat_map_index_map(input, f).await
}

/// [`Batch::map_hash_set`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn map_hash_set<T, R, F, Fut>(bound: usize, input: HashSet<T>, f: F) -> Result<HashSet<R>, Error>
where
    T: Send + 'static,
    R: Eq + Hash + Send + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    Batch::new(bound).map_hash_set(input, f).await
}

/// [`Batch::flat_map_hash_set`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn flat_map_hash_set<T, R, F, Fut>(
    bound: usize,
    input: HashSet<T>,
    f: F,
) -> Result<HashSet<R>, Error>
where
    T: Send + 'static,
    R: Eq + Hash + Send + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashSet<R>, BoxError>> + Send + 'static,
{
    Batch::new(bound).flat_map_hash_set(input, f).await
}

/// [`Batch::map_index_set`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn map_index_set<T, R, F, Fut>(bound: usize, input: IndexSet<T>, f: F) -> Result<IndexSet<R>, Error>
where
    T: Send + 'static,
    R: Eq + Hash + Send + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    Batch::new(bound).map_index_set(input, f).await
}

/// [`Batch::flat_map_index_set`] with a fresh executor of `bound` slots.
///
/// # Errors
///
/// Returns the batch error if any transform fails, panics, or is canceled.
pub async fn flat_map_index_set<T, R, F, Fut>(
    bound: usize,
    input: IndexSet<T>,
    f: F,
) -> Result<IndexSet<R>, Error>
where
    T: Send + 'static,
    R: Eq + Hash + Send + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IndexSet<R>, BoxError>> + Send + 'static,
{
    Batch::new(bound).flat_map_index_set(input, f).await
}
