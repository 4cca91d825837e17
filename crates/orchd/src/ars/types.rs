//! ARS profile records.

use swsync_bus::KeyOpFieldsValues;
use swsync_sai::api::ArsProfileData;

/// Group path-selection discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NhgPathSelectorMode {
    #[default]
    Global,
    Interface,
    Nexthop,
}

impl NhgPathSelectorMode {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "global" => Self::Global,
            "interface" => Self::Interface,
            "nexthop" => Self::Nexthop,
            _ => return None,
        })
    }
}

/// LAG path-selection discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LagPathSelectorMode {
    #[default]
    Global,
    Interface,
}

impl LagPathSelectorMode {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "global" => Self::Global,
            "interface" => Self::Interface,
            _ => return None,
        })
    }
}

/// A validated ARS profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArsProfile {
    pub name: String,
    pub algorithm: String,
    pub max_flows: u32,
    pub sample_interval: u32,
    pub ipv4_enable: bool,
    pub ipv6_enable: bool,
    pub nhg_selector: NhgPathSelectorMode,
    pub lag_selector: LagPathSelectorMode,
}

impl ArsProfile {
    /// Algorithms the backend understands.
    const ALGORITHMS: [&'static str; 1] = ["EWMA"];

    /// Validates a `ARS_PROFILE` record; `None` rejects the entry.
    pub fn from_record(name: &str, delta: &KeyOpFieldsValues) -> Option<Self> {
        let algorithm = delta.get_field("algorithm").unwrap_or("EWMA").to_string();
        if !Self::ALGORITHMS.contains(&algorithm.as_str()) {
            return None;
        }
        let max_flows = delta.get_field("max_flows")?.parse().ok()?;
        let sample_interval = delta
            .get_field("sample_interval")
            .unwrap_or("16")
            .parse()
            .ok()?;
        let parse_bool = |v: Option<&str>| match v {
            Some("true") | Some("1") => Some(true),
            Some("false") | Some("0") | None => Some(false),
            _ => None,
        };
        Some(Self {
            name: name.to_string(),
            algorithm,
            max_flows,
            sample_interval,
            ipv4_enable: parse_bool(delta.get_field("ipv4_enable"))?,
            ipv6_enable: parse_bool(delta.get_field("ipv6_enable"))?,
            nhg_selector: NhgPathSelectorMode::parse(
                delta.get_field("ars_nhg_path_selector_mode").unwrap_or("global"),
            )?,
            lag_selector: LagPathSelectorMode::parse(
                delta.get_field("ars_lag_path_selector_mode").unwrap_or("global"),
            )?,
        })
    }

    pub fn to_backend(&self) -> ArsProfileData {
        ArsProfileData {
            algorithm: self.algorithm.clone(),
            max_flows: self.max_flows,
            sample_interval: self.sample_interval,
            ipv4_enable: self.ipv4_enable,
            ipv6_enable: self.ipv6_enable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> KeyOpFieldsValues {
        KeyOpFieldsValues::set(
            "profile0",
            pairs
                .iter()
                .map(|(f, v)| (f.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn valid_profile_parses() {
        let profile = ArsProfile::from_record(
            "profile0",
            &record(&[
                ("algorithm", "EWMA"),
                ("max_flows", "4096"),
                ("sample_interval", "16"),
                ("ipv4_enable", "true"),
                ("ars_nhg_path_selector_mode", "nexthop"),
            ]),
        )
        .unwrap();
        assert_eq!(profile.max_flows, 4096);
        assert!(profile.ipv4_enable);
        assert!(!profile.ipv6_enable);
        assert_eq!(profile.nhg_selector, NhgPathSelectorMode::Nexthop);
    }

    #[test]
    fn rejects_bad_enums() {
        assert!(ArsProfile::from_record(
            "p",
            &record(&[("algorithm", "RANDOM"), ("max_flows", "1")]),
        )
        .is_none());
        assert!(ArsProfile::from_record(
            "p",
            &record(&[("max_flows", "1"), ("ars_lag_path_selector_mode", "nexthop")]),
        )
        .is_none());
        assert!(ArsProfile::from_record("p", &record(&[])).is_none());
    }
}
