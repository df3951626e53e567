use std::marker::PhantomData;

use crate::result::TaskResult;

/// A typed handle to the result of a closure submitted with
/// [`ThreadPool::execute`](crate::ThreadPool::execute).
///
/// A `Promise` is a thin layer over [`TaskResult`] that remembers the
/// closure's return type, so the value comes back as a `T` instead of a
/// type-erased box.
///
/// # Examples
///
/// ```
/// use threadmill::ThreadPool;
///
/// let pool = ThreadPool::new();
/// pool.start_with(1);
///
/// let promise = pool.execute(|| 2 + 2);
/// assert_eq!(promise.get(), Some(4));
/// ```
pub struct Promise<T> {
    result: TaskResult,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn new(result: TaskResult) -> Self {
        Self {
            result,
            _marker: PhantomData,
        }
    }

    /// Whether the submission behind this promise was accepted.
    pub fn is_valid(&self) -> bool {
        self.result.is_valid()
    }

    /// Blocks until the closure has run, then returns its value.
    ///
    /// Returns `None` if the submission was rejected, if the closure
    /// panicked, or if the pool was torn down before the closure could run.
    pub fn get(mut self) -> Option<T> {
        // The adapter stored a T, so the cast cannot fail.
        self.result.get().and_then(|value| value.cast().ok())
    }
}
