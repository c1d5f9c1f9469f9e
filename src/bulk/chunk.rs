use std::slice::Chunks;

use crate::error::MailError;

/// Splits `items` into contiguous groups of `size`, the last possibly shorter.
///
/// Lazy and order-preserving; an empty input yields no groups.
pub fn chunked<T>(items: &[T], size: usize) -> Result<Chunks<'_, T>, MailError> {
    if size == 0 {
        return Err(MailError::InvalidArgument(
            "chunk size must be positive".to_string(),
        ));
    }
    Ok(items.chunks(size))
}

#[cfg(test)]
mod tests {
    use super::chunked;
    use crate::error::MailError;

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("msg-{i}")).collect()
    }

    #[test]
    fn splits_at_the_api_cap() {
        let input = ids(2500);
        let sizes: Vec<usize> = chunked(&input, 1000)
            .expect("chunk")
            .map(|chunk| chunk.len())
            .collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[test]
    fn concatenation_reconstructs_input() {
        for (count, size) in [(1, 1), (7, 3), (9, 3), (10, 1000), (1001, 1000)] {
            let input = ids(count);
            let chunks: Vec<&[String]> = chunked(&input, size).expect("chunk").collect();

            let rebuilt: Vec<String> = chunks.iter().flat_map(|chunk| chunk.to_vec()).collect();
            assert_eq!(rebuilt, input, "count={count} size={size}");

            let (last, full) = chunks.split_last().expect("non-empty input has chunks");
            assert!(full.iter().all(|chunk| chunk.len() == size));
            assert!(!last.is_empty() && last.len() <= size);
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let input: Vec<String> = Vec::new();
        assert_eq!(chunked(&input, 1000).expect("chunk").count(), 0);
        assert_eq!(chunked(&input, 1).expect("chunk").count(), 0);
    }

    #[test]
    fn zero_size_is_rejected() {
        let input = ids(3);
        assert!(matches!(
            chunked(&input, 0),
            Err(MailError::InvalidArgument(_))
        ));
    }
}
