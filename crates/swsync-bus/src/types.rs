//! Bus-level data types.

use std::fmt;

/// Logical database identities on the shared bus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DbId {
    /// Application intent and results (`TABLE:key`).
    Appl,
    /// Counter maps and OID name maps (`TABLE:key`).
    Counters,
    /// Operator configuration (`TABLE|key`).
    Config,
    /// Realized state published by agents (`TABLE:key`).
    State,
    /// Normalized backend failures (`TABLE:key`).
    Error,
}

impl DbId {
    /// The numeric database index on the bus instance.
    pub const fn index(&self) -> u8 {
        match self {
            DbId::Appl => 0,
            DbId::Counters => 2,
            DbId::Config => 4,
            DbId::State => 6,
            DbId::Error => 8,
        }
    }

    /// Separator between table name and entity key.
    pub const fn separator(&self) -> char {
        match self {
            DbId::Config => '|',
            _ => ':',
        }
    }

    /// Whether per-table change feeds come from keyspace notifications
    /// (config side) or from a coalescing producer queue (app side).
    pub const fn uses_keyspace_events(&self) -> bool {
        matches!(self, DbId::Config)
    }
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbId::Appl => "APPL_DB",
            DbId::Counters => "COUNTERS_DB",
            DbId::Config => "CONFIG_DB",
            DbId::State => "STATE_DB",
            DbId::Error => "ERROR_DB",
        };
        f.write_str(name)
    }
}

/// Operation carried by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Set,
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Set => "SET",
            Operation::Del => "DEL",
        }
    }
}

/// An ordered field/value record.
pub type FieldValues = Vec<(String, String)>;

/// The fundamental delta unit: key, operation and fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOpFieldsValues {
    pub key: String,
    pub op: Operation,
    pub fvs: FieldValues,
}

impl KeyOpFieldsValues {
    pub fn new(key: impl Into<String>, op: Operation, fvs: FieldValues) -> Self {
        Self {
            key: key.into(),
            op,
            fvs,
        }
    }

    pub fn set(key: impl Into<String>, fvs: FieldValues) -> Self {
        Self::new(key, Operation::Set, fvs)
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::new(key, Operation::Del, vec![])
    }

    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fvs
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fvs.iter().any(|(f, _)| f == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_identity() {
        assert_eq!(DbId::Appl.index(), 0);
        assert_eq!(DbId::Config.index(), 4);
        assert_eq!(DbId::Config.separator(), '|');
        assert_eq!(DbId::Appl.separator(), ':');
        assert!(DbId::Config.uses_keyspace_events());
        assert!(!DbId::Appl.uses_keyspace_events());
    }

    #[test]
    fn field_lookup() {
        let entry = KeyOpFieldsValues::set(
            "Vlan100",
            vec![("admin_status".into(), "up".into())],
        );
        assert_eq!(entry.get_field("admin_status"), Some("up"));
        assert!(!entry.has_field("mtu"));
        assert!(KeyOpFieldsValues::del("Vlan100").op.is_del());
    }
}
