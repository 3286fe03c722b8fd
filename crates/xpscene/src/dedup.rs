//! Content-addressed mesh deduplication.
//!
//! A finished mesh is keyed by its top-face edge signature. The first way to
//! show a fingerprint gets the next definition sequence number; later ways
//! with the same fingerprint point back at it via `similar_to_way_id`.

use std::collections::HashMap;

/// Edge lengths of a finished mesh's top face, as reported by mesh finishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSignature {
    pub edge_count: u32,
    /// Lengths rounded to whole metres, comma-joined.
    pub rounded: String,
    /// Lengths rounded to millimetres, comma-joined.
    pub exact: String,
}

impl EdgeSignature {
    pub fn from_lengths(lengths: &[f64]) -> Self {
        let rounded = lengths
            .iter()
            .map(|l| format!("{}", l.round() as i64))
            .collect::<Vec<_>>()
            .join(",");
        let exact = lengths
            .iter()
            .map(|l| format!("{:.3}", l))
            .collect::<Vec<_>>()
            .join(",");

        Self {
            edge_count: lengths.len() as u32,
            rounded,
            exact,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            edge_count: self.edge_count,
            rounded: self.rounded.clone(),
            exact: self.exact.clone(),
        }
    }
}

/// `(edge_count, rounded, exact)`; equal fingerprints share one definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub edge_count: u32,
    pub rounded: String,
    pub exact: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First of its shape: owns definition `seq`.
    Unique { seq: u32 },
    /// Reuses the definition of an earlier way.
    SimilarTo { way_id: i64 },
}

/// Run-scoped indexer; feed ways in processing order.
#[derive(Debug)]
pub struct DedupIndexer {
    seen: HashMap<Fingerprint, i64>,
    next_seq: u32,
}

impl Default for DedupIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupIndexer {
    pub fn new() -> Self {
        Self {
            seen: HashMap::new(),
            next_seq: 1,
        }
    }

    /// A way without a signature can never match, so it always gets its own seq.
    pub fn index(&mut self, way_id: i64, signature: Option<&EdgeSignature>) -> DedupOutcome {
        if let Some(signature) = signature {
            if let Some(&earliest) = self.seen.get(&signature.fingerprint()) {
                return DedupOutcome::SimilarTo { way_id: earliest };
            }
            self.seen.insert(signature.fingerprint(), way_id);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        DedupOutcome::Unique { seq }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_formats() {
        let sig = EdgeSignature::from_lengths(&[10.0004, 6.5, 9.9996, 6.4999]);
        assert_eq!(sig.edge_count, 4);
        assert_eq!(sig.rounded, "10,7,10,6");
        assert_eq!(sig.exact, "10.000,6.500,10.000,6.500");
    }

    #[test]
    fn first_seen_wins() {
        let a = EdgeSignature::from_lengths(&[10.0, 6.0, 10.0, 6.0]);
        let c = EdgeSignature::from_lengths(&[12.0, 6.0, 12.0, 6.0]);
        let mut indexer = DedupIndexer::new();

        assert_eq!(indexer.index(100, Some(&a)), DedupOutcome::Unique { seq: 1 });
        assert_eq!(indexer.index(200, Some(&a)), DedupOutcome::SimilarTo { way_id: 100 });
        assert_eq!(indexer.index(300, Some(&c)), DedupOutcome::Unique { seq: 2 });
        assert_eq!(indexer.index(400, Some(&a.clone())), DedupOutcome::SimilarTo { way_id: 100 });
        assert_eq!(indexer.index(500, None), DedupOutcome::Unique { seq: 3 });
    }

    #[test]
    fn exact_lengths_break_ties() {
        let a = EdgeSignature::from_lengths(&[10.0, 6.0, 10.0, 6.0]);
        let b = EdgeSignature::from_lengths(&[10.2, 6.0, 10.2, 6.0]);
        assert_eq!(a.rounded, b.rounded);

        let mut indexer = DedupIndexer::new();
        indexer.index(1, Some(&a));
        assert_eq!(indexer.index(2, Some(&b)), DedupOutcome::Unique { seq: 2 });
    }

    #[test]
    fn missing_signature_is_unique() {
        let mut indexer = DedupIndexer::new();
        assert_eq!(indexer.index(1, None), DedupOutcome::Unique { seq: 1 });
        assert_eq!(indexer.index(2, None), DedupOutcome::Unique { seq: 2 });
    }
}
