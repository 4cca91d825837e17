//! Backend status codes and their engine-side classification.

use std::fmt;
use thiserror::Error;

/// Backend status codes, matching the vendor ABI values.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaiStatus {
    Success = 0,
    Failure = -1,
    NotSupported = -2,
    NoMemory = -3,
    InsufficientResources = -4,
    InvalidParameter = -5,
    ItemAlreadyExists = -6,
    ItemNotFound = -7,
    ObjectInUse = -8,
    TableFull = -9,
    NotExecuted = -10,
    Uninitialized = -11,
    InvalidObjectId = -12,
}

impl SaiStatus {
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => SaiStatus::Success,
            -2 => SaiStatus::NotSupported,
            -3 => SaiStatus::NoMemory,
            -4 => SaiStatus::InsufficientResources,
            -5 => SaiStatus::InvalidParameter,
            -6 => SaiStatus::ItemAlreadyExists,
            -7 => SaiStatus::ItemNotFound,
            -8 => SaiStatus::ObjectInUse,
            -9 => SaiStatus::TableFull,
            -10 => SaiStatus::NotExecuted,
            -11 => SaiStatus::Uninitialized,
            -12 => SaiStatus::InvalidObjectId,
            _ => SaiStatus::Failure,
        }
    }

    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn is_success(&self) -> bool {
        *self == SaiStatus::Success
    }

    /// Capacity exhaustion: the caller should fall back to a temporary group
    /// and retry once resources free up.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            SaiStatus::InsufficientResources | SaiStatus::NoMemory | SaiStatus::TableFull
        )
    }

    /// Left unexecuted inside a bulk; retry on the next cycle.
    pub fn is_not_executed(&self) -> bool {
        *self == SaiStatus::NotExecuted
    }

    /// The normalized `SWSS_RC_*` spelling used by the error bus.
    pub fn rc_name(&self) -> &'static str {
        match self {
            SaiStatus::Success => "SWSS_RC_SUCCESS",
            SaiStatus::Failure => "SWSS_RC_FAILURE",
            SaiStatus::NotSupported => "SWSS_RC_UNIMPLEMENTED",
            SaiStatus::NoMemory | SaiStatus::InsufficientResources => "SWSS_RC_NO_MEMORY",
            SaiStatus::InvalidParameter | SaiStatus::InvalidObjectId => "SWSS_RC_INVALID_PARAM",
            SaiStatus::ItemAlreadyExists => "SWSS_RC_EXISTS",
            SaiStatus::ItemNotFound => "SWSS_RC_NOT_FOUND",
            SaiStatus::ObjectInUse => "SWSS_RC_IN_USE",
            SaiStatus::TableFull => "SWSS_RC_FULL",
            SaiStatus::NotExecuted => "SWSS_RC_NOT_EXECUTED",
            SaiStatus::Uninitialized => "SWSS_RC_UNINIT",
        }
    }

    /// Parses the vendor `SAI_STATUS_*` spelling carried in failure
    /// notifications.
    pub fn from_status_name(name: &str) -> Option<Self> {
        Some(match name {
            "SAI_STATUS_SUCCESS" => SaiStatus::Success,
            "SAI_STATUS_FAILURE" => SaiStatus::Failure,
            "SAI_STATUS_NOT_SUPPORTED" => SaiStatus::NotSupported,
            "SAI_STATUS_NO_MEMORY" => SaiStatus::NoMemory,
            "SAI_STATUS_INSUFFICIENT_RESOURCES" => SaiStatus::InsufficientResources,
            "SAI_STATUS_INVALID_PARAMETER" => SaiStatus::InvalidParameter,
            "SAI_STATUS_ITEM_ALREADY_EXISTS" => SaiStatus::ItemAlreadyExists,
            "SAI_STATUS_ITEM_NOT_FOUND" => SaiStatus::ItemNotFound,
            "SAI_STATUS_OBJECT_IN_USE" => SaiStatus::ObjectInUse,
            "SAI_STATUS_TABLE_FULL" => SaiStatus::TableFull,
            "SAI_STATUS_NOT_EXECUTED" => SaiStatus::NotExecuted,
            _ => return None,
        })
    }

    pub fn into_result(self) -> SaiResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(SaiError::Status(self))
        }
    }
}

impl fmt::Display for SaiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rc_name())
    }
}

/// Error type for backend operations.
#[derive(Debug, Clone, Error)]
pub enum SaiError {
    #[error("backend returned {0}")]
    Status(SaiStatus),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("backend not initialized")]
    Uninitialized,
}

impl SaiError {
    pub fn status(&self) -> SaiStatus {
        match self {
            SaiError::Status(status) => *status,
            SaiError::NotFound(_) => SaiStatus::ItemNotFound,
            SaiError::Uninitialized => SaiStatus::Uninitialized,
        }
    }

    pub fn is_capacity(&self) -> bool {
        self.status().is_capacity()
    }
}

/// Result type for backend operations.
pub type SaiResult<T> = Result<T, SaiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        for status in [
            SaiStatus::Success,
            SaiStatus::ItemNotFound,
            SaiStatus::NotExecuted,
            SaiStatus::TableFull,
        ] {
            assert_eq!(SaiStatus::from_raw(status.as_raw()), status);
        }
        assert_eq!(SaiStatus::from_raw(-999), SaiStatus::Failure);
    }

    #[test]
    fn capacity_classification() {
        assert!(SaiStatus::InsufficientResources.is_capacity());
        assert!(SaiStatus::TableFull.is_capacity());
        assert!(!SaiStatus::ItemNotFound.is_capacity());
    }

    #[test]
    fn rc_normalization() {
        assert_eq!(
            SaiStatus::InsufficientResources.rc_name(),
            "SWSS_RC_NO_MEMORY"
        );
        assert_eq!(
            SaiStatus::from_status_name("SAI_STATUS_INSUFFICIENT_RESOURCES"),
            Some(SaiStatus::InsufficientResources)
        );
        assert_eq!(SaiStatus::from_status_name("SAI_STATUS_BOGUS"), None);
    }

    #[test]
    fn into_result() {
        assert!(SaiStatus::Success.into_result().is_ok());
        let err = SaiStatus::TableFull.into_result().unwrap_err();
        assert!(err.is_capacity());
    }
}
