//! Small string helpers.

/// Join `items` with `sep`, splitting into multiple strings so that no
/// joined chunk exceeds `max_len` bytes.
///
/// An item longer than `max_len` gets a chunk of its own rather than being
/// truncated.
pub fn chunk_join(items: &[String], max_len: usize, sep: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for item in items {
        if current.is_empty() {
            current.push_str(item);
            continue;
        }

        if current.len() + sep.len() + item.len() > max_len {
            chunks.push(std::mem::take(&mut current));
            current.push_str(item);
        } else {
            current.push_str(sep);
            current.push_str(item);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn joins_when_everything_fits() {
        let chunks = chunk_join(&strings(&["a", "b", "c"]), 16, " ");
        assert_eq!(chunks, vec!["a b c"]);
    }

    #[test]
    fn splits_at_the_byte_budget() {
        let chunks = chunk_join(&strings(&["aaaa", "bbbb", "cccc"]), 9, " ");
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc"]);
    }

    #[test]
    fn oversized_item_gets_its_own_chunk() {
        let chunks = chunk_join(&strings(&["a", "bbbbbbbbbb", "c"]), 4, " ");
        assert_eq!(chunks, vec!["a", "bbbbbbbbbb", "c"]);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_join(&[], 16, " ").is_empty());
    }
}
