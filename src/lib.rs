#![doc = include_str!("../README.md")]

mod common;
mod error;
mod pool;
mod promise;
mod result;
mod semaphore;
mod task;
mod value;
mod worker;

pub use crate::{
    common::{common, configure_common},
    error::{CastError, CommonAlreadyInitializedError},
    pool::{Builder, PoolMode, ThreadPool},
    promise::Promise,
    result::TaskResult,
    task::Task,
    value::TaskValue,
};
