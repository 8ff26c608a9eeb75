use crate::token::Token;

/// Keep the tokens whose confidence is at least `threshold`, in their original order.
///
/// Nothing about a kept token is changed. A threshold outside 0.0–1.0 is a
/// configuration mistake caught by [`crate::PipelineConfig::validate`]; here it
/// simply keeps everything (below 0) or nothing (above 1).
pub fn filter_by_confidence(tokens: Vec<Token>, threshold: f32) -> Vec<Token> {
    tokens.into_iter().filter(|t| t.confidence >= threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Token> {
        [0.91, 0.12, 0.5, 0.49, 1.0, 0.0, 0.73, 0.5]
            .iter()
            .enumerate()
            .map(|(i, c)| Token::new(i, format!("t{i}"), *c))
            .collect()
    }

    #[test]
    fn threshold_is_inclusive() {
        let kept = filter_by_confidence(sample(), 0.5);
        let idx: Vec<usize> = kept.iter().map(|t| t.sequence_index).collect();
        assert_eq!(idx, vec![0, 2, 4, 6, 7]);
    }

    #[test]
    fn raising_threshold_never_keeps_more() {
        let thresholds = [0.0, 0.1, 0.25, 0.49, 0.5, 0.51, 0.9, 1.0];
        for (i, t1) in thresholds.iter().enumerate() {
            for t2 in &thresholds[i..] {
                let low = filter_by_confidence(sample(), *t1).len();
                let high = filter_by_confidence(sample(), *t2).len();
                assert!(high <= low, "t1={t1} kept {low}, t2={t2} kept {high}");
            }
        }
    }

    #[test]
    fn keeps_relative_order_and_fields() {
        let original = sample();
        let kept = filter_by_confidence(original.clone(), 0.3);
        let mut cursor = original.iter();
        for token in &kept {
            // Each kept token appears later in the input than the previous one.
            assert!(cursor.any(|o| o == token));
        }
    }

    #[test]
    fn zero_threshold_keeps_everything() {
        assert_eq!(filter_by_confidence(sample(), 0.0).len(), 8);
    }

    #[test]
    fn empty_input() {
        assert!(filter_by_confidence(Vec::new(), 0.5).is_empty());
    }
}
