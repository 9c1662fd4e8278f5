//! Text form of embedding vectors: `[f1,f2,...,fD]`.
//!
//! This is the literal accepted by pgvector's `::vector` cast and the form the
//! SQLite store keeps in its embedding column. `f32`'s `Display` emits the
//! shortest decimal that parses back to the same bits, so a vector survives
//! format-then-parse unchanged.

use crate::error::{RagError, Result};

pub fn format_vector_literal(values: &[f32]) -> String {
    let mut literal = String::with_capacity(values.len() * 10 + 2);
    literal.push('[');
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            literal.push(',');
        }
        literal.push_str(&value.to_string());
    }
    literal.push(']');
    literal
}

pub fn parse_vector_literal(literal: &str) -> Result<Vec<f32>> {
    let inner = literal
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| malformed(literal, "missing brackets"))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|component| {
            let value = component
                .trim()
                .parse::<f32>()
                .map_err(|error| malformed(literal, &error.to_string()))?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(malformed(literal, "non-finite component"))
            }
        })
        .collect()
}

fn malformed(literal: &str, reason: &str) -> RagError {
    let preview: String = literal.chars().take(32).collect();
    RagError::store("vector-literal", format!("{reason} in {preview:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_uses_brackets_and_commas() {
        assert_eq!(format_vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
        assert_eq!(format_vector_literal(&[]), "[]");
    }

    #[test]
    fn awkward_values_survive_exactly() {
        let values = vec![0.1f32, 1.0 / 3.0, -7.006_492e-38, 123_456.79, f32::MIN_POSITIVE];
        let parsed = parse_vector_literal(&format_vector_literal(&values)).unwrap();
        assert_eq!(
            parsed.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            values.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn parse_accepts_spaces_from_the_database() {
        assert_eq!(parse_vector_literal(" [1, 2.5 ,3] ").unwrap(), vec![1.0, 2.5, 3.0]);
    }

    #[test]
    fn parse_rejects_malformed_literals() {
        assert!(parse_vector_literal("1,2,3").is_err());
        assert!(parse_vector_literal("[1,,2]").is_err());
        assert!(parse_vector_literal("[1,abc]").is_err());
        assert!(parse_vector_literal("[NaN]").is_err());
    }
}
