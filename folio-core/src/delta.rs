//! Rich-text deltas and their composition.
//!
//! A [`Delta`] is an ordered list of positional operations in the Quill JSON
//! shape:
//!
//! ```text
//! [ {"insert": "Hi", "attributes": {"bold": true}},
//!   {"retain": 4},
//!   {"delete": 2} ]
//! ```
//!
//! Composition walks both operand lists in lockstep, cutting operations at
//! span boundaries so that every step pairs one span of `base` with one span
//! of `next`:
//!
//! ```text
//! base:  [ insert "Hello" ][ retain 3 ]
//! next:  [ retain 2 ][ delete 3 ][ insert "y" ][ retain 3, bold ]
//!          │           │          │           │
//!          ▼           ▼          ▼           ▼
//! out:   [ insert "He" ]  (cancel) [ insert "y" ][ retain 3, bold ]
//! ```
//!
//! Every `Delta` in this crate is canonical: adjacent operations of the same
//! kind with equal attributes are merged, an insert never directly follows a
//! delete, and a trailing attribute-less retain is not an operation. The
//! builders may hold such a retain to position what comes after it, but
//! [`Delta::ops`], equality, lengths and serialization all leave it out, so
//! `compose(d, identity) == d` holds for built and parsed deltas alike.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Formatting attributes attached to inserts and retains.
pub type Attributes = Map<String, Value>;

/// Delta errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    /// The payload is not a well-formed operation list.
    #[error("malformed delta: {0}")]
    Malformed(String),
    /// `next` reaches past the end of the document it is composed onto.
    #[error("delta expects a document of length {expected} but the base has length {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
}

/// Inserted content: a run of text or a single embed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Insert {
    Text(String),
    /// An embed such as `{"image": "https://..."}`; always length 1.
    Embed(Map<String, Value>),
}

impl Insert {
    /// Length in Unicode scalar values (embeds count as one).
    pub fn len(&self) -> u64 {
        match self {
            Insert::Text(text) => text.chars().count() as u64,
            Insert::Embed(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single delta operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Op {
    Insert {
        insert: Insert,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Delete {
        delete: u64,
    },
    Retain {
        retain: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
}

/// Operation kind, used while walking deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Delete,
    Retain,
}

impl Op {
    pub fn len(&self) -> u64 {
        match self {
            Op::Insert { insert, .. } => insert.len(),
            Op::Delete { delete } => *delete,
            Op::Retain { retain, .. } => *retain,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Op::Insert { .. } => OpKind::Insert,
            Op::Delete { .. } => OpKind::Delete,
            Op::Retain { .. } => OpKind::Retain,
        }
    }

    /// Check a single operation for structural problems.
    fn validate(&self, index: usize) -> Result<(), DeltaError> {
        match self {
            Op::Insert { insert: Insert::Text(text), .. } if text.is_empty() => Err(
                DeltaError::Malformed(format!("op {index}: insert must not be empty")),
            ),
            Op::Insert { insert: Insert::Embed(embed), .. } if embed.len() != 1 => {
                Err(DeltaError::Malformed(format!(
                    "op {index}: embed must have exactly one key, found {}",
                    embed.len()
                )))
            }
            Op::Delete { delete: 0 } => Err(DeltaError::Malformed(format!(
                "op {index}: delete count must be positive"
            ))),
            Op::Retain { retain: 0, .. } => Err(DeltaError::Malformed(format!(
                "op {index}: retain count must be positive"
            ))),
            _ => Ok(()),
        }
    }

    /// Empty attribute maps are equivalent to no attributes.
    fn normalized(self) -> Self {
        match self {
            Op::Insert { insert, attributes } => Op::Insert {
                insert,
                attributes: attributes.filter(|a| !a.is_empty()),
            },
            Op::Retain { retain, attributes } => Op::Retain {
                retain,
                attributes: attributes.filter(|a| !a.is_empty()),
            },
            delete => delete,
        }
    }
}

/// A canonical, validated list of operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Op>", into = "Vec<Op>")]
pub struct Delta {
    ops: Vec<Op>,
}

impl Delta {
    /// The identity delta (no operations).
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and canonicalize a raw operation list.
    ///
    /// Counts are unsigned 64-bit; a list whose total span does not fit is
    /// rejected as malformed.
    pub fn from_ops(ops: Vec<Op>) -> Result<Self, DeltaError> {
        let mut delta = Self::new();
        let mut total: u64 = 0;
        for (index, op) in ops.into_iter().enumerate() {
            op.validate(index)?;
            total = total.checked_add(op.len()).ok_or_else(|| {
                DeltaError::Malformed(format!("op {index}: delta spans more than {} units", u64::MAX))
            })?;
            delta.push(op.normalized());
        }
        delta.chop();
        Ok(delta)
    }

    /// Parse a delta from an untyped JSON payload.
    pub fn from_json(value: Value) -> Result<Self, DeltaError> {
        if !value.is_array() {
            return Err(DeltaError::Malformed("delta must be an array".into()));
        }
        let ops: Vec<Op> =
            serde_json::from_value(value).map_err(|e| DeltaError::Malformed(e.to_string()))?;
        Self::from_ops(ops)
    }

    /// Operations in canonical form.
    pub fn ops(&self) -> &[Op] {
        match self.ops.split_last() {
            Some((Op::Retain { attributes: None, .. }, rest)) => rest,
            _ => &self.ops,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops().is_empty()
    }

    /// Total span covered by all operations.
    pub fn length(&self) -> u64 {
        span(self.ops().iter())
    }

    /// Length of the document this delta expects to be applied to.
    pub fn base_length(&self) -> u64 {
        span(self.ops().iter().filter(|op| op.kind() != OpKind::Insert))
    }

    /// Length of the document after applying this delta to its base.
    pub fn target_length(&self) -> u64 {
        span(self.ops().iter().filter(|op| op.kind() != OpKind::Delete))
    }

    /// A document delta holds only inserts, so its length is closed.
    pub fn is_document(&self) -> bool {
        self.ops().iter().all(|op| op.kind() == OpKind::Insert)
    }

    /// Concatenated text of all text inserts.
    pub fn to_plain_text(&self) -> String {
        self.ops()
            .iter()
            .filter_map(|op| match op {
                Op::Insert { insert: Insert::Text(text), .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn insert(self, text: impl Into<String>) -> Self {
        self.insert_with(text, Attributes::new())
    }

    pub fn insert_with(mut self, text: impl Into<String>, attributes: Attributes) -> Self {
        self.push(
            Op::Insert {
                insert: Insert::Text(text.into()),
                attributes: Some(attributes),
            }
            .normalized(),
        );
        self
    }

    pub fn insert_embed(mut self, key: impl Into<String>, value: Value) -> Self {
        let mut embed = Map::new();
        embed.insert(key.into(), value);
        self.push(Op::Insert {
            insert: Insert::Embed(embed),
            attributes: None,
        });
        self
    }

    pub fn retain(self, count: u64) -> Self {
        self.retain_with(count, Attributes::new())
    }

    pub fn retain_with(mut self, count: u64, attributes: Attributes) -> Self {
        self.push(
            Op::Retain {
                retain: count,
                attributes: Some(attributes),
            }
            .normalized(),
        );
        self
    }

    pub fn delete(mut self, count: u64) -> Self {
        self.push(Op::Delete { delete: count });
        self
    }

    /// Append an operation, merging it into the tail where possible.
    ///
    /// Counts that would overflow on merge stay as separate operations.
    fn push(&mut self, op: Op) {
        if op.is_empty() {
            return;
        }

        let mut index = self.ops.len();
        if let (Some(Op::Delete { delete }), Op::Delete { delete: more }) =
            (self.ops.last_mut(), &op)
        {
            if let Some(sum) = delete.checked_add(*more) {
                *delete = sum;
                return;
            }
        }

        // Inserts sort before an adjacent delete.
        if matches!(self.ops.last(), Some(Op::Delete { .. })) && op.kind() == OpKind::Insert {
            index -= 1;
            if index == 0 {
                self.ops.insert(0, op);
                return;
            }
        }

        if index > 0 {
            match (&mut self.ops[index - 1], &op) {
                (
                    Op::Insert { insert: Insert::Text(text), attributes: a },
                    Op::Insert { insert: Insert::Text(more), attributes: b },
                ) if *a == *b => {
                    text.push_str(more);
                    return;
                }
                (
                    Op::Retain { retain, attributes: a },
                    Op::Retain { retain: more, attributes: b },
                ) if *a == *b && retain.checked_add(*more).is_some() => {
                    *retain += *more;
                    return;
                }
                _ => {}
            }
        }

        self.ops.insert(index, op);
    }

    /// Drop a trailing retain that carries no attributes.
    fn chop(&mut self) {
        if let Some(Op::Retain { attributes: None, .. }) = self.ops.last() {
            self.ops.pop();
        }
    }
}

impl PartialEq for Delta {
    fn eq(&self, other: &Self) -> bool {
        self.ops() == other.ops()
    }
}

impl TryFrom<Vec<Op>> for Delta {
    type Error = DeltaError;

    fn try_from(ops: Vec<Op>) -> Result<Self, Self::Error> {
        Self::from_ops(ops)
    }
}

impl From<Delta> for Vec<Op> {
    fn from(mut delta: Delta) -> Self {
        delta.chop();
        delta.ops
    }
}

fn span<'a>(ops: impl Iterator<Item = &'a Op>) -> u64 {
    ops.fold(0, |total, op| total.saturating_add(op.len()))
}

/// Cursor over a delta that hands out operations cut to a requested length.
struct OpIter<'a> {
    ops: &'a [Op],
    index: usize,
    offset: u64,
}

impl<'a> OpIter<'a> {
    fn new(ops: &'a [Op]) -> Self {
        Self { ops, index: 0, offset: 0 }
    }

    fn has_next(&self) -> bool {
        self.index < self.ops.len()
    }

    /// Kind of the next operation; past the end behaves as an open retain.
    fn peek_kind(&self) -> OpKind {
        self.ops
            .get(self.index)
            .map_or(OpKind::Retain, Op::kind)
    }

    /// Remaining length of the current operation, `None` once exhausted.
    fn peek_length(&self) -> Option<u64> {
        self.ops.get(self.index).map(|op| op.len() - self.offset)
    }

    /// Take at most `max` units from the current operation.
    fn take(&mut self, max: u64) -> Option<Op> {
        let op = self.ops.get(self.index)?;
        let remaining = op.len() - self.offset;
        let length = remaining.min(max);

        let piece = match op {
            Op::Delete { .. } => Op::Delete { delete: length },
            Op::Retain { attributes, .. } => Op::Retain {
                retain: length,
                attributes: attributes.clone(),
            },
            Op::Insert { insert: Insert::Text(text), attributes } => Op::Insert {
                insert: Insert::Text(slice_chars(text, self.offset, length)),
                attributes: attributes.clone(),
            },
            Op::Insert { insert: embed, attributes } => Op::Insert {
                insert: embed.clone(),
                attributes: attributes.clone(),
            },
        };

        if length == remaining {
            self.index += 1;
            self.offset = 0;
        } else {
            self.offset += length;
        }
        Some(piece)
    }
}

fn slice_chars(text: &str, start: u64, length: u64) -> String {
    text.chars()
        .skip(start as usize)
        .take(length as usize)
        .collect()
}

/// Merge attribute maps with `next` taking priority over `base`.
///
/// `keep_null` preserves explicit `null` removals; it is set when the result
/// is still a retain that has to carry the removal forward.
fn compose_attributes(
    base: Option<&Attributes>,
    next: Option<&Attributes>,
    keep_null: bool,
) -> Option<Attributes> {
    let mut merged = next.cloned().unwrap_or_default();
    if !keep_null {
        merged.retain(|_, value| !value.is_null());
    }
    if let Some(base) = base {
        for (key, value) in base {
            if !next.is_some_and(|n| n.contains_key(key)) {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Some(merged).filter(|m| !m.is_empty())
}

/// Compose two deltas applied in sequence into one equivalent delta.
///
/// Fails with [`DeltaError::LengthMismatch`] when `base` is a document and
/// `next` retains or deletes past its end.
pub fn compose(base: &Delta, next: &Delta) -> Result<Delta, DeltaError> {
    if base.is_empty() {
        return Ok(next.clone());
    }
    if base.is_document() {
        check_fits(base, next)?;
    }

    let mut left = OpIter::new(base.ops());
    let mut right = OpIter::new(next.ops());
    let mut out = Delta::new();

    while left.has_next() || right.has_next() {
        if right.peek_kind() == OpKind::Insert {
            if let Some(op) = right.take(u64::MAX) {
                out.push(op);
            }
            continue;
        }
        if left.peek_kind() == OpKind::Delete {
            if let Some(op) = left.take(u64::MAX) {
                out.push(op);
            }
            continue;
        }

        let length = match (left.peek_length(), right.peek_length()) {
            (Some(l), Some(r)) => l.min(r),
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (None, None) => break,
        };
        let open_retain = || Op::Retain { retain: length, attributes: None };
        let left_op = left.take(length).unwrap_or_else(open_retain);
        let right_op = right.take(length).unwrap_or_else(open_retain);

        match right_op {
            Op::Retain { attributes: next_attrs, .. } => {
                let composed = match left_op {
                    Op::Retain { attributes, .. } => Op::Retain {
                        retain: length,
                        attributes: compose_attributes(
                            attributes.as_ref(),
                            next_attrs.as_ref(),
                            true,
                        ),
                    },
                    Op::Insert { insert, attributes } => Op::Insert {
                        insert,
                        attributes: compose_attributes(
                            attributes.as_ref(),
                            next_attrs.as_ref(),
                            false,
                        ),
                    },
                    delete => delete,
                };
                out.push(composed);
            }
            Op::Delete { delete } => {
                // Deleting freshly inserted content cancels both sides.
                if left_op.kind() == OpKind::Retain {
                    out.push(Op::Delete { delete });
                }
            }
            insert => out.push(insert),
        }
    }

    out.chop();
    Ok(out)
}

/// Compose `change` onto stored document content.
///
/// Unlike [`compose`], an empty `document` here is the zero-length document
/// rather than the identity, so a change that retains or deletes anything
/// is rejected. Content that is not a document has an open tail and is not
/// length checked.
pub fn compose_onto(document: &Delta, change: &Delta) -> Result<Delta, DeltaError> {
    if document.is_document() {
        check_fits(document, change)?;
    }
    compose(document, change)
}

fn check_fits(document: &Delta, next: &Delta) -> Result<(), DeltaError> {
    let expected = next.base_length();
    let actual = document.length();
    if expected > actual {
        log::debug!("Rejecting delta over {expected} chars against a {actual}-char document");
        return Err(DeltaError::LengthMismatch { expected, actual });
    }
    Ok(())
}

/// Fold [`compose`] left to right starting from the identity delta.
pub fn compose_all<'a, I>(deltas: I) -> Result<Delta, DeltaError>
where
    I: IntoIterator<Item = &'a Delta>,
{
    deltas
        .into_iter()
        .try_fold(Delta::new(), |acc, delta| compose(&acc, delta))
}
