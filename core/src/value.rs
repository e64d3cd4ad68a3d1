//! The value model
//!
//! A [`Value`] is a contiguous closed range of integer units
//! `[begin_index, begin_index + value_num - 1]`. Ranges never shrink or
//! grow in place; spending splits them, and two adjacent ranges are never
//! merged back together.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Lifecycle state of a value on its holder's side.
///
/// The sender walks a value forward through
/// `Unspent -> Selected -> LocalCommitted -> Confirmed`; a rollback before
/// confirmation returns it to `Unspent`. Change values produced by a split
/// start out `LocalCommitted` and become `Unspent` once the spending
/// transaction confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueState {
    #[default]
    Unspent,
    Selected,
    LocalCommitted,
    Confirmed,
}

impl ValueState {
    /// Whether `self -> to` is a legal transition
    fn allows(self, to: ValueState) -> bool {
        use ValueState::*;
        matches!(
            (self, to),
            (Unspent, Selected)
                | (Unspent, LocalCommitted)
                | (Selected, LocalCommitted)
                | (Selected, Unspent)
                | (LocalCommitted, Confirmed)
                | (LocalCommitted, Unspent)
        )
    }
}

/// A contiguous range of spendable units.
///
/// Equality and hashing cover the range only, never the state: two values
/// denote the same coins exactly when their ranges coincide. The state is
/// holder-local bookkeeping and is excluded from the wire encoding.
#[derive(Clone, Serialize, Deserialize)]
pub struct Value {
    #[serde(with = "hex_u128")]
    begin_index: u128,
    value_num: u64,
    #[serde(skip)]
    state: ValueState,
}

impl Value {
    /// Create an unspent value; `value_num` must be at least 1
    pub fn new(begin_index: u128, value_num: u64) -> CoreResult<Self> {
        if value_num == 0 {
            return Err(CoreError::StructuralInvalid(
                "value_num must be at least 1".into(),
            ));
        }
        Ok(Self {
            begin_index,
            value_num,
            state: ValueState::Unspent,
        })
    }

    /// Create a value in an explicit state
    pub fn with_state(begin_index: u128, value_num: u64, state: ValueState) -> CoreResult<Self> {
        let mut v = Self::new(begin_index, value_num)?;
        v.state = state;
        Ok(v)
    }

    pub fn begin_index(&self) -> u128 {
        self.begin_index
    }

    pub fn value_num(&self) -> u64 {
        self.value_num
    }

    /// Inclusive end of the range
    pub fn end_index(&self) -> u128 {
        self.begin_index + (self.value_num as u128 - 1)
    }

    pub fn state(&self) -> ValueState {
        self.state
    }

    /// The value identifier: its begin index
    pub fn value_id(&self) -> u128 {
        self.begin_index
    }

    /// Hex rendering of the identifier, used as a storage key
    pub fn id_hex(&self) -> String {
        format!("{:#x}", self.begin_index)
    }

    /// Assert structural validity
    pub fn check(&self) -> CoreResult<()> {
        if self.value_num == 0 {
            return Err(CoreError::StructuralInvalid(
                "value_num must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Move to a new state, rejecting illegal transitions
    pub fn transition(&mut self, to: ValueState) -> CoreResult<()> {
        if !self.state.allows(to) {
            return Err(CoreError::InvalidStateTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Split off the first `amount` units.
    ///
    /// Produces `(v1, v2)` with `v1 = [begin, begin + amount)` and
    /// `v2 = [begin + amount, end]`, both unspent. Only unspent values may
    /// be split, and `amount` must lie strictly inside the range.
    pub fn split(&self, amount: u64) -> CoreResult<(Value, Value)> {
        if self.state != ValueState::Unspent {
            return Err(CoreError::InvalidStateTransition {
                from: self.state,
                to: ValueState::Unspent,
            });
        }
        if amount == 0 || amount >= self.value_num {
            return Err(CoreError::InvalidSplit {
                amount,
                value_num: self.value_num,
            });
        }
        let first = Value::new(self.begin_index, amount)?;
        let second = Value::new(self.begin_index + amount as u128, self.value_num - amount)?;
        Ok((first, second))
    }

    /// Whether the two ranges share any unit
    pub fn intersects(&self, other: &Value) -> bool {
        self.begin_index <= other.end_index() && other.begin_index <= self.end_index()
    }

    /// The overlapping sub-range, if any
    pub fn intersection(&self, other: &Value) -> Option<Value> {
        let begin = self.begin_index.max(other.begin_index);
        let end = self.end_index().min(other.end_index());
        if begin > end {
            return None;
        }
        let num = (end - begin + 1) as u64;
        Some(Value {
            begin_index: begin,
            value_num: num,
            state: ValueState::Unspent,
        })
    }

    /// Whether `other`'s range lies entirely inside this one
    pub fn contains(&self, other: &Value) -> bool {
        self.begin_index <= other.begin_index && other.end_index() <= self.end_index()
    }

    /// Range identity, ignoring state
    pub fn same_range(&self, other: &Value) -> bool {
        self.begin_index == other.begin_index && self.value_num == other.value_num
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_range(other)
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.begin_index.hash(state);
        self.value_num.hash(state);
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Value({:#x}+{}, {:?})",
            self.begin_index, self.value_num, self.state
        )
    }
}

/// Serde adapter rendering `u128` as a 0x-prefixed hex string, keeping the
/// canonical encoding safe for integers wider than 53 bits
pub mod hex_u128 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| serde::de::Error::custom("expected 0x-prefixed hex integer"))?;
        u128::from_str_radix(stripped, 16).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_units() {
        assert!(Value::new(0x1000, 0).is_err());
    }

    #[test]
    fn test_end_index_inclusive() {
        let v = Value::new(0x1000, 100).unwrap();
        assert_eq!(v.end_index(), 0x1000 + 99);
    }

    #[test]
    fn test_split_at_boundaries() {
        let v = Value::new(0x1000, 100).unwrap();

        let (a, b) = v.split(1).unwrap();
        assert_eq!(a.value_num(), 1);
        assert_eq!(b.begin_index(), 0x1001);
        assert_eq!(b.value_num(), 99);

        let (a, b) = v.split(99).unwrap();
        assert_eq!(a.value_num(), 99);
        assert_eq!(b.value_num(), 1);
        assert_eq!(b.end_index(), v.end_index());

        assert!(v.split(0).is_err());
        assert!(v.split(100).is_err());
    }

    #[test]
    fn test_split_requires_unspent() {
        let mut v = Value::new(0x1000, 10).unwrap();
        v.transition(ValueState::Selected).unwrap();
        assert!(v.split(5).is_err());
    }

    #[test]
    fn test_split_union_covers_original() {
        let v = Value::new(0x2000, 64).unwrap();
        let (a, b) = v.split(17).unwrap();
        assert_eq!(a.begin_index(), v.begin_index());
        assert_eq!(b.end_index(), v.end_index());
        assert_eq!(a.end_index() + 1, b.begin_index());
        assert_eq!(a.value_num() + b.value_num(), v.value_num());
    }

    #[test]
    fn test_intersection() {
        let a = Value::new(100, 50).unwrap(); // [100, 149]
        let b = Value::new(140, 30).unwrap(); // [140, 169]
        let c = Value::new(200, 10).unwrap();

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));

        let i = a.intersection(&b).unwrap();
        assert_eq!(i.begin_index(), 140);
        assert_eq!(i.value_num(), 10);
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_containment_and_equality() {
        let outer = Value::new(100, 50).unwrap();
        let inner = Value::new(110, 10).unwrap();
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));

        let mut same = Value::new(100, 50).unwrap();
        same.transition(ValueState::Selected).unwrap();
        // equality ignores state
        assert_eq!(outer, same);
    }

    #[test]
    fn test_state_machine() {
        let mut v = Value::new(1, 1).unwrap();
        v.transition(ValueState::Selected).unwrap();
        v.transition(ValueState::LocalCommitted).unwrap();
        v.transition(ValueState::Confirmed).unwrap();
        // spent values never come back
        assert!(v.transition(ValueState::Unspent).is_err());

        let mut v = Value::new(1, 1).unwrap();
        v.transition(ValueState::Selected).unwrap();
        v.transition(ValueState::Unspent).unwrap();
        // confirmed requires local commitment first
        assert!(v.transition(ValueState::Confirmed).is_err());
    }

    #[test]
    fn test_wire_encoding_is_range_only() {
        let mut v = Value::new(0x1000, 100).unwrap();
        v.transition(ValueState::Selected).unwrap();
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["begin_index"], "0x1000");
        assert_eq!(json["value_num"], 100);
        assert!(json.get("state").is_none());

        let back: Value = serde_json::from_value(json).unwrap();
        assert_eq!(back.state(), ValueState::Unspent);
        assert!(back.same_range(&v));
    }
}
