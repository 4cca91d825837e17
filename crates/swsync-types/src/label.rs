//! MPLS label types.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 20-bit MPLS label value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Label(u32);

impl Label {
    pub const MAX: u32 = (1 << 20) - 1;

    pub fn new(value: u32) -> Result<Self, ParseError> {
        if value <= Self::MAX {
            Ok(Label(value))
        } else {
            Err(ParseError::InvalidLabel(value.to_string()))
        }
    }

    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Label {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .parse()
            .map_err(|_| ParseError::InvalidLabel(s.to_string()))?;
        Label::new(value)
    }
}

/// An ordered MPLS label stack, serialized as `/`-separated labels
/// (outermost first), e.g. `100/200`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LabelStack(Vec<Label>);

impl LabelStack {
    pub fn new(labels: Vec<Label>) -> Self {
        LabelStack(labels)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn labels(&self) -> &[Label] {
        &self.0
    }
}

impl fmt::Display for LabelStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for label in &self.0 {
            if !first {
                write!(f, "/")?;
            }
            first = false;
            write!(f, "{}", label)?;
        }
        Ok(())
    }
}

impl FromStr for LabelStack {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(LabelStack::default());
        }
        let labels = s
            .split('/')
            .map(str::parse)
            .collect::<Result<Vec<Label>, _>>()?;
        Ok(LabelStack(labels))
    }
}
