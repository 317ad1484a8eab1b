//! Per-entry parallelism.
//!
//! Compressing entries during an edit and decoding them during extraction
//! are independent per entry, so both fan out over a Rayon pool with one
//! unit of work per entry.  Rayon is optional: without the `parallel`
//! feature the same closures run sequentially on the calling thread.
//!
//! No work outlives the call: Rayon's `collect` joins every task before
//! returning, and the first error wins.

use crate::error::Result;

/// Apply `f` to every item, preserving input order in the output.
///
/// If any item fails, the first error (in input order) is returned.
pub fn map_entries<T, U, F>(items: Vec<T>, f: F) -> Result<Vec<U>>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Result<U> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        let results: Vec<Result<U>> = items.into_par_iter().map(f).collect();
        results.into_iter().collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        items.into_iter().map(f).collect()
    }
}
