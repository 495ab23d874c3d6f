//! Order-preserving partitioning of request sequences.

use crate::{Batch, CountRequestItem, Error, Result};

/// Upper bound on the capacity reserved up front for a single chunk, so an
/// oversized `size` does not trigger a huge allocation for a short input.
const MAX_PREALLOC: usize = 1024;

/// Splits `items` into consecutive groups of at most `size` elements.
///
/// Concatenating the returned chunks reproduces the input exactly. Every
/// chunk except possibly the last holds exactly `size` items, and an empty
/// input yields no chunks.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when `size` is zero.
pub fn chunk<T, I>(items: I, size: usize) -> Result<Vec<Vec<T>>>
where
    I: IntoIterator<Item = T>,
{
    if size == 0 {
        return Err(Error::invalid("chunk size must be greater than 0"));
    }

    let capacity = size.min(MAX_PREALLOC);
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(capacity);

    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(core::mem::replace(
                &mut current,
                Vec::with_capacity(capacity),
            ));
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    Ok(chunks)
}

/// Chunks `items` into indexed [`Batch`]es.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when `size` is zero.
pub fn batches<I>(items: I, size: usize) -> Result<Vec<Batch>>
where
    I: IntoIterator<Item = CountRequestItem>,
{
    Ok(chunk(items, size)?
        .into_iter()
        .enumerate()
        .map(|(index, items)| Batch::new(index, items))
        .collect())
}
