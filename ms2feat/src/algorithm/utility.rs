use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::Result;

/// Builds the worker pool for a batch job. `num_threads == 0` uses rayon's default size.
pub fn thread_pool(num_threads: usize) -> Result<ThreadPool> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()?;
    Ok(pool)
}
