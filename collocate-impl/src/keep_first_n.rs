use async_trait::async_trait;
use binary_heap_plus::BinaryHeap;
use futures::stream::Stream;
use futures::stream::StreamExt;
use std::cmp::Ordering;

#[async_trait]
pub trait KeepFirstN<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    /// Takes the largest N values according to the sorted function, returned in descending order
    /// (max first). Exhausts the stream.
    async fn keep_first_n(self, n: usize, sorted_by: F) -> Vec<T>;
}

#[async_trait]
impl<SInput, T, F> KeepFirstN<T, F> for SInput
where
    SInput: Stream<Item = T> + Send + Unpin,
    T: Clone + Send + std::marker::Sync,
    F: Fn(&T, &T) -> Ordering + std::marker::Send + std::marker::Sync + 'static,
{
    async fn keep_first_n(mut self, n: usize, sorted_by: F) -> Vec<T> {
        if n == 0 {
            return Vec::new();
        }

        // use the reverse ordering so that the smallest value is always the first to pop.
        let mut first_n = BinaryHeap::with_capacity_by(n, |a: &T, b: &T| sorted_by(a, b).reverse());

        while let Some(item) = self.next().await {
            if first_n.len() < n {
                first_n.push(item);
                continue;
            }
            // replace the smallest kept value only when a larger one shows up
            let larger = first_n
                .peek()
                .map_or(false, |smallest| sorted_by(smallest, &item) == Ordering::Less);
            if larger {
                first_n.pop();
                first_n.push(item);
            }
        }

        first_n.into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::KeepFirstN;

    #[tokio::test]
    async fn keep_first_n() {
        let odd = futures::stream::iter(1..10)
            .keep_first_n(5, |a: &i32, b: &i32| (a % 2).cmp(&(b % 2))) // keep odd numbers
            .await;
        assert_eq!(
            futures::stream::iter(odd)
                .keep_first_n(2, |a: &i32, b: &i32| a.cmp(b)) // keep largest odd 2 numbers
                .await,
            vec![9, 7]
        );
    }

    #[tokio::test]
    async fn short_streams_and_zero() {
        assert_eq!(
            futures::stream::iter(vec![3, 1, 2])
                .keep_first_n(10, |a: &i32, b: &i32| a.cmp(b))
                .await,
            vec![3, 2, 1]
        );
        assert!(futures::stream::iter(vec![3, 1, 2])
            .keep_first_n(0, |a: &i32, b: &i32| a.cmp(b))
            .await
            .is_empty());
    }
}
