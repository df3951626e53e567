//! Type-erased container for task results.

use std::{any::Any, fmt};

use crate::error::CastError;

/// A container holding a value of arbitrary type produced by a task.
///
/// Because tasks in the same pool can produce results of different types, the
/// engine moves results around as `TaskValue` and lets the submitter recover
/// the concrete type with a checked [`cast`](TaskValue::cast).
///
/// A `TaskValue` uniquely owns its contents: it can be moved but not cloned.
///
/// # Examples
///
/// ```
/// use threadmill::TaskValue;
///
/// let value = TaskValue::new(42u64);
/// assert_eq!(value.cast::<u64>().unwrap(), 42);
/// ```
///
/// Casting to the wrong type fails with an error rather than misbehaving:
///
/// ```
/// use threadmill::TaskValue;
///
/// let value = TaskValue::new(String::from("hello"));
/// assert!(value.cast::<i32>().is_err());
/// ```
pub struct TaskValue {
    value: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl TaskValue {
    /// Box up a concrete value.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Check whether the stored value is of type `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Take the stored value back out as a `T`.
    ///
    /// Fails with a [`CastError`] if `T` is not the type the value was
    /// constructed with. The mismatch is a programmer error at the call
    /// site, so the error message names both types.
    pub fn cast<T: 'static>(self) -> Result<T, CastError> {
        let stored = self.type_name;

        match self.value.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(_) => Err(CastError::new(stored, std::any::type_name::<T>())),
        }
    }
}

impl fmt::Debug for TaskValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskValue").field(&self.type_name).finish()
    }
}
