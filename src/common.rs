use once_cell::sync::OnceCell;

use crate::{Builder, CommonAlreadyInitializedError, ThreadPool};

static COMMON: OnceCell<ThreadPool> = OnceCell::new();

/// Get a reference to a shared thread pool for the entire process.
///
/// The pool is created and started on first use, with one worker per
/// available CPU core unless [`configure_common`] ran first.
///
/// # Examples
///
/// ```
/// let promise = threadmill::common().execute(|| 2 + 2);
///
/// assert_eq!(promise.get(), Some(4));
/// ```
pub fn common() -> &'static ThreadPool {
    COMMON.get_or_init(|| {
        let pool = common_builder().build();
        pool.start();
        pool
    })
}

/// Configure the shared thread pool.
///
/// Call this near the start of your program, before anything touches the
/// shared pool; once the pool exists its configuration is frozen and this
/// function returns an error.
///
/// Only programs should call this. A library that needs particular pool
/// behavior should create its own pool instance instead of imposing a
/// configuration on the whole process.
pub fn configure_common<F>(f: F) -> Result<(), CommonAlreadyInitializedError>
where
    F: FnOnce(Builder) -> Builder,
{
    let mut was_initialized = true;

    COMMON.get_or_init(|| {
        was_initialized = false;
        let pool = f(common_builder()).build();
        pool.start();
        pool
    });

    if was_initialized {
        Err(CommonAlreadyInitializedError::new())
    } else {
        Ok(())
    }
}

fn common_builder() -> Builder {
    Builder::default().name("common-pool")
}
