//! Mock transforms and consumers for testing.

use crate::errors::BoxError;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

/// An identity transform that fails when it sees `value`.
pub fn failing_at<T>(
    value: T,
) -> impl Fn(T) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync
where
    T: PartialEq + Debug + Send + Sync + 'static,
{
    move |item| {
        let result = if item == value {
            Err(format!("refusing item {item:?}").into())
        } else {
            Ok(item)
        };
        future::ready(result).boxed()
    }
}

/// A consumer that records every item it is handed.
///
/// Clones share the same record, so one clone can be moved into a sink while
/// another is kept for assertions.
#[derive(Debug)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
    fail_on: Option<T>,
}

impl<T> Clone for Recorder<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            fail_on: self.fail_on.clone(),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
            fail_on: None,
        }
    }
}

impl<T> Recorder<T>
where
    T: Clone + PartialEq + Debug + Send + 'static,
{
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the consumer fail when it sees `value`, without recording it.
    #[must_use]
    pub fn failing_on(mut self, value: T) -> Self {
        self.fail_on = Some(value);
        self
    }

    /// Returns a copy of the recorded items.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    /// Returns a consumer closure suitable for a sink.
    pub fn consumer(&self) -> impl FnMut(T) -> BoxFuture<'static, Result<(), BoxError>> + Send {
        let recorder = self.clone();
        move |item| {
            let result = if recorder.fail_on.as_ref() == Some(&item) {
                Err(format!("consumer rejected {item:?}").into())
            } else {
                recorder.items.lock().push(item);
                Ok(())
            };
            future::ready(result).boxed()
        }
    }
}
