//! Deterministic local problem generation
//!
//! Level-indexed tables (times tables, division tables) are always preferred
//! over network content. The synthesized fallback covers every arithmetic
//! topic with operands drawn from a level-scaled range.

use std::collections::BTreeSet;

use rand::Rng;

use crate::sim::{Operation, Problem};

/// What a topic string asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicCategory {
    Single(Operation),
    /// Any of the four operations
    Mixed,
    /// Not arithmetic; only the external generator can serve it
    Other(String),
}

impl TopicCategory {
    pub fn parse(topic: &str) -> Self {
        let topic = topic.trim().to_lowercase();
        if topic.contains("multipl") || topic.contains("times") {
            return TopicCategory::Single(Operation::Multiplication);
        }
        if topic.contains("divis") || topic.contains("divid") {
            return TopicCategory::Single(Operation::Division);
        }
        if topic.contains("subtract") {
            return TopicCategory::Single(Operation::Subtraction);
        }
        if topic.contains("addition") || topic == "add" {
            return TopicCategory::Single(Operation::Addition);
        }
        if matches!(topic.as_str(), "mixed" | "arithmetic" | "all" | "math") {
            return TopicCategory::Mixed;
        }
        match Operation::from_tag(&topic) {
            Operation::Other(tag) => TopicCategory::Other(tag),
            op => TopicCategory::Single(op),
        }
    }

    /// Whether a generated item with this tag belongs to the topic
    pub fn accepts(&self, operation: &Operation) -> bool {
        match self {
            TopicCategory::Single(op) => op == operation,
            TopicCategory::Mixed => operation.is_arithmetic(),
            TopicCategory::Other(tag) => operation.tag() == tag,
        }
    }
}

/// Full table sweep for the level (`level × 1 ..= level × 10` and the matching
/// divisions). `None` for topics without a table.
pub fn table_batch(category: &TopicCategory, level: u32) -> Option<Vec<Problem>> {
    let level_n = i64::from(level.max(1));
    let problems = match category {
        TopicCategory::Single(Operation::Multiplication) => (1..=10)
            .filter_map(|k| Problem::arithmetic(0, level_n, Operation::Multiplication, k, level))
            .collect(),
        TopicCategory::Single(Operation::Division) => (1..=10)
            .filter_map(|k| Problem::arithmetic(0, level_n * k, Operation::Division, level_n, level))
            .collect(),
        _ => return None,
    };
    Some(problems)
}

/// Operand bounds for a level (inclusive); both ends grow with the level
pub fn difficulty_range(level: u32) -> (i64, i64) {
    let level = i64::from(level.max(1));
    (level, 5 + 5 * level)
}

/// Random arithmetic batch within the level's difficulty range. Empty for
/// non-arithmetic topics.
pub fn synthesize<R: Rng + ?Sized>(
    category: &TopicCategory,
    level: u32,
    count: usize,
    rng: &mut R,
) -> Vec<Problem> {
    const OPERATIONS: [Operation; 4] = [
        Operation::Addition,
        Operation::Subtraction,
        Operation::Multiplication,
        Operation::Division,
    ];

    let (lo, hi) = difficulty_range(level);
    let mut seen = BTreeSet::new();
    let mut problems = Vec::with_capacity(count);

    for _ in 0..count * 10 {
        if problems.len() == count {
            break;
        }
        let operation = match category {
            TopicCategory::Single(op) => op.clone(),
            TopicCategory::Mixed => OPERATIONS[rng.random_range(0..OPERATIONS.len())].clone(),
            TopicCategory::Other(_) => return Vec::new(),
        };

        let a = rng.random_range(lo..=hi);
        let b = rng.random_range(lo..=hi);
        let (left, right) = match operation {
            Operation::Subtraction => (a.max(b), a.min(b)),
            // Dividend built from the quotient so the answer is whole
            Operation::Division => (a * b, b),
            _ => (a, b),
        };

        if let Some(problem) = Problem::arithmetic(0, left, operation, right, level) {
            if seen.insert(problem.question.clone()) {
                problems.push(problem);
            }
        }
    }
    problems
}
