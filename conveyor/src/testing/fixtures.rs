//! Generators and collectors for pipeline tests.

use crate::errors::BoxError;
use crate::pipeline::Outlet;

/// A generator yielding `0, 1, .., limit - 1`.
///
/// The last item is returned together with `more == false`. A generator
/// always yields at least one item, so `count_to(0)` behaves like `count_to(1)`.
pub fn count_to(
    limit: usize,
) -> impl FnMut() -> Result<(usize, bool), BoxError> + Send + 'static {
    let mut current = 0;
    move || {
        let item = current;
        current += 1;
        Ok((item, current < limit))
    }
}

/// Reads `rx` until it closes and returns everything received, in order.
///
/// Accepts a chain's [`Outlet`] or a plain Tokio receiver.
pub async fn drain<T>(rx: impl Into<Outlet<T>>) -> Vec<T> {
    let mut rx = rx.into();
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item);
    }
    items
}

/// Like [`drain`], but sorts the result. Useful when a worker pool reorders
/// the stream.
pub async fn drain_sorted<T: Ord>(rx: impl Into<Outlet<T>>) -> Vec<T> {
    let mut items = drain(rx).await;
    items.sort_unstable();
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_count_to_marks_last_item() {
        let mut generator = count_to(10);
        for i in 0..9 {
            let (item, more) = generator().unwrap();
            assert_eq!(item, i);
            assert!(more);
        }
        let (item, more) = generator().unwrap();
        assert_eq!(item, 9);
        assert!(!more);
    }

    #[test]
    fn test_count_to_zero_yields_single_item() {
        let mut generator = count_to(0);
        assert_eq!(generator().unwrap(), (0, false));
    }

    #[tokio::test]
    async fn test_drain_sorted() {
        let (tx, rx) = mpsc::channel(4);
        for i in [3, 1, 2] {
            tx.send(i).await.unwrap();
        }
        drop(tx);
        assert_eq!(drain_sorted(rx).await, vec![1, 2, 3]);
    }
}
