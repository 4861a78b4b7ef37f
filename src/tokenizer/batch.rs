//! Fixed-length token sequences ready for tensor construction.

/// One text encoded to exactly the effective maximum length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Token ids, right-padded with the pad id.
    pub input_ids: Vec<i64>,
    /// 1 for real tokens, 0 for padding.
    pub attention_mask: Vec<i64>,
}

impl Encoded {
    /// Number of real (mask = 1) tokens.
    #[must_use]
    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

/// Row-aligned token ids and attention masks for a batch of texts.
///
/// Every row produced by the tokenizer has the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizedBatch {
    /// Token id rows, one per input text.
    pub input_ids: Vec<Vec<i64>>,
    /// Attention mask rows, parallel to `input_ids`.
    pub attention_mask: Vec<Vec<i64>>,
}

impl TokenizedBatch {
    /// Assemble a batch from individually encoded texts.
    #[must_use]
    pub fn from_encoded(encoded: Vec<Encoded>) -> Self {
        let (input_ids, attention_mask) = encoded
            .into_iter()
            .map(|e| (e.input_ids, e.attention_mask))
            .unzip();
        Self {
            input_ids,
            attention_mask,
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Whether the batch has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Length of the first row, or 0 for an empty batch.
    #[must_use]
    pub fn sequence_length(&self) -> usize {
        self.input_ids.first().map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_encoded_keeps_order() {
        let batch = TokenizedBatch::from_encoded(vec![
            Encoded {
                input_ids: vec![2, 10, 3, 0],
                attention_mask: vec![1, 1, 1, 0],
            },
            Encoded {
                input_ids: vec![2, 11, 12, 3],
                attention_mask: vec![1, 1, 1, 1],
            },
        ]);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.sequence_length(), 4);
        assert_eq!(batch.input_ids[1], vec![2, 11, 12, 3]);
        assert_eq!(batch.attention_mask[0], vec![1, 1, 1, 0]);
    }

    #[test]
    fn test_empty_batch() {
        let batch = TokenizedBatch::from_encoded(Vec::new());
        assert!(batch.is_empty());
        assert_eq!(batch.sequence_length(), 0);
        assert!(batch.attention_mask.is_empty());
    }

    #[test]
    fn test_real_tokens() {
        let encoded = Encoded {
            input_ids: vec![2, 7, 3, 0, 0],
            attention_mask: vec![1, 1, 1, 0, 0],
        };
        assert_eq!(encoded.real_tokens(), 3);
    }
}
