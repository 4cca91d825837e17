//! Route intent parsing and the synced route tables.

use std::collections::HashMap;

use swsync_bus::KeyOpFieldsValues;
use swsync_sai::VirtualRouterOid;
use swsync_types::{IpAddress, IpPrefix, LabelStack};
use thiserror::Error;

use super::nexthop::NextHopKey;
use super::nhg::NextHopGroupKey;

/// Interfaces whose routes belong to the management plane; the reconciler
/// removes any prior hardware route and settles without programming one.
const SKIP_IFNAMES: [&str; 3] = ["eth0", "docker0", "lo"];
const LOOPBACK_PREFIX: &str = "Loopback";

/// The next-hop group a synced route points at: a route-owned key, an index
/// into the group orchestrator, a blackhole, or a fine-grained prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteNhg {
    pub nhg_key: NextHopGroupKey,
    /// Set only when the group is owned by the index-keyed orchestrator.
    pub nhg_index: Option<String>,
    pub blackhole: bool,
    /// Group lifecycle is owned by the fine-grained module.
    pub fine_grained: bool,
}

impl RouteNhg {
    pub fn owned(nhg_key: NextHopGroupKey) -> Self {
        Self {
            nhg_key,
            ..Self::default()
        }
    }

    pub fn indexed(index: impl Into<String>) -> Self {
        Self {
            nhg_index: Some(index.into()),
            ..Self::default()
        }
    }

    pub fn blackhole() -> Self {
        Self {
            blackhole: true,
            ..Self::default()
        }
    }

    pub fn fine_grained(nhg_key: NextHopGroupKey) -> Self {
        Self {
            nhg_key,
            fine_grained: true,
            ..Self::default()
        }
    }
}

/// vrf -> prefix -> group reference.
pub type RouteTables = HashMap<VirtualRouterOid, HashMap<IpPrefix, RouteNhg>>;

/// Parse errors reject the entry as invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteParseError {
    #[error("bad prefix in key {0}")]
    BadKey(String),

    #[error("nexthop/ifname arity mismatch: {0} vs {1}")]
    ArityMismatch(usize, usize),

    #[error("bad field {field}: {value}")]
    BadField { field: String, value: String },

    #[error("nexthop_group excludes nexthop/ifname")]
    GroupExcludesDirect,
}

/// A parsed and validated route SET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteIntent {
    pub vrf_name: String,
    pub prefix: IpPrefix,
    pub blackhole: bool,
    /// Reference into the index-keyed group orchestrator.
    pub nhg_index: Option<String>,
    pub nexthops: NextHopGroupKey,
    /// Route touches only management/loopback interfaces.
    pub skip_class: bool,
}

/// Splits `[vrf:]prefix`. The VRF part is present only when the head of the
/// key names one (`Vrf*`, `Vnet*` or the literal default), since IPv6
/// prefixes themselves contain `:`.
pub fn parse_route_key(key: &str) -> Result<(String, IpPrefix), RouteParseError> {
    let (vrf_name, prefix_str) = match key.split_once(':') {
        Some((head, rest))
            if head.starts_with("Vrf") || head.starts_with("Vnet") || head == "default" =>
        {
            (head.to_string(), rest)
        }
        _ => (String::new(), key),
    };
    let prefix: IpPrefix = prefix_str
        .parse()
        .map_err(|_| RouteParseError::BadKey(key.to_string()))?;
    Ok((vrf_name, prefix))
}

fn split_list(value: &str) -> Vec<&str> {
    if value.is_empty() {
        Vec::new()
    } else {
        value.split(',').collect()
    }
}

/// Builds the canonical group key from a ROUTE_TABLE record.
pub fn parse_route_intent(
    delta: &KeyOpFieldsValues,
) -> Result<RouteIntent, RouteParseError> {
    let (vrf_name, prefix) = parse_route_key(&delta.key)?;

    let blackhole = delta
        .get_field("blackhole")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    let nhg_index = delta.get_field("nexthop_group").map(str::to_string);

    let nexthop_field = delta.get_field("nexthop").unwrap_or("");
    let ifname_field = delta.get_field("ifname").unwrap_or("");

    if nhg_index.is_some() && (!nexthop_field.is_empty() || !ifname_field.is_empty()) {
        return Err(RouteParseError::GroupExcludesDirect);
    }

    if blackhole || nhg_index.is_some() {
        return Ok(RouteIntent {
            vrf_name,
            prefix,
            blackhole,
            nhg_index,
            nexthops: NextHopGroupKey::new(),
            skip_class: false,
        });
    }

    let ips = split_list(nexthop_field);
    let aliases = split_list(ifname_field);
    if ips.len() != aliases.len() {
        return Err(RouteParseError::ArityMismatch(ips.len(), aliases.len()));
    }
    let width = ips.len();
    if width == 0 {
        // Not a blackhole, no group reference, no next hops: nothing to
        // program.
        return Err(RouteParseError::BadField {
            field: "nexthop".into(),
            value: String::new(),
        });
    }

    let skip_class = aliases.iter().any(|alias| {
        SKIP_IFNAMES.contains(alias) || alias.starts_with(LOOPBACK_PREFIX)
    });
    if skip_class {
        return Ok(RouteIntent {
            vrf_name,
            prefix,
            blackhole: false,
            nhg_index: None,
            nexthops: NextHopGroupKey::new(),
            skip_class: true,
        });
    }

    let weights: Vec<u32> = match delta.get_field("weight") {
        Some(value) if !value.is_empty() => {
            let parsed = split_list(value)
                .iter()
                .map(|w| w.parse::<u32>().ok().filter(|w| *w > 0))
                .collect::<Option<Vec<u32>>>()
                .ok_or_else(|| RouteParseError::BadField {
                    field: "weight".into(),
                    value: value.into(),
                })?;
            if parsed.len() != width {
                return Err(RouteParseError::ArityMismatch(parsed.len(), width));
            }
            parsed
        }
        _ => Vec::new(),
    };

    let labels: Vec<LabelStack> = match delta.get_field("mpls_nh") {
        Some(value) if !value.is_empty() => split_list(value)
            .iter()
            .map(|stack| {
                stack
                    .trim_start_matches("push")
                    .parse::<LabelStack>()
                    .map_err(|_| RouteParseError::BadField {
                        field: "mpls_nh".into(),
                        value: value.into(),
                    })
            })
            .collect::<Result<_, _>>()?,
        _ => Vec::new(),
    };
    if !labels.is_empty() && labels.len() != width {
        return Err(RouteParseError::ArityMismatch(labels.len(), width));
    }

    let vni_labels: Vec<u32> = match delta.get_field("vni_label") {
        Some(value) if !value.is_empty() => split_list(value)
            .iter()
            .map(|v| {
                v.parse::<u32>().map_err(|_| RouteParseError::BadField {
                    field: "vni_label".into(),
                    value: value.into(),
                })
            })
            .collect::<Result<_, _>>()?,
        _ => Vec::new(),
    };
    let router_macs: Vec<&str> = delta
        .get_field("router_mac")
        .map(split_list)
        .unwrap_or_default();

    let segment = delta.get_field("segment");
    let seg_src = delta.get_field("seg_src");

    let mut nexthops = NextHopGroupKey::new();
    for i in 0..width {
        let ip: IpAddress = match ips.get(i) {
            Some(text) => text.parse().map_err(|_| RouteParseError::BadField {
                field: "nexthop".into(),
                value: (*text).into(),
            })?,
            // Gatewayless members default to the unspecified address of the
            // route's own family.
            None => prefix.address().unspecified_like(),
        };
        let alias = aliases.get(i).copied().unwrap_or("");
        let mut nexthop = NextHopKey::new(ip, alias);

        if let Some(stack) = labels.get(i) {
            nexthop = nexthop.with_labels(stack.clone());
        }
        if let (Some(segment), Some(source)) = (segment, seg_src) {
            let source = source.parse().map_err(|_| RouteParseError::BadField {
                field: "seg_src".into(),
                value: source.into(),
            })?;
            nexthop = nexthop.with_srv6(segment, source);
        }
        if let Some(vni) = vni_labels.get(i).copied().or_else(|| {
            // A single VNI applies to every member.
            (!vni_labels.is_empty()).then(|| vni_labels[0])
        }) {
            let mac = router_macs
                .get(i)
                .or_else(|| router_macs.first())
                .and_then(|m| m.parse().ok())
                .ok_or_else(|| RouteParseError::BadField {
                    field: "router_mac".into(),
                    value: delta.get_field("router_mac").unwrap_or("").into(),
                })?;
            nexthop = nexthop.with_overlay(vni, mac);
        }
        if let Some(weight) = weights.get(i) {
            nexthop = nexthop.with_weight(*weight);
        }
        nexthops.add(nexthop);
    }

    Ok(RouteIntent {
        vrf_name,
        prefix,
        blackhole: false,
        nhg_index: None,
        nexthops,
        skip_class: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(key: &str, pairs: &[(&str, &str)]) -> KeyOpFieldsValues {
        KeyOpFieldsValues::set(
            key,
            pairs
                .iter()
                .map(|(f, v)| (f.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn key_parsing() {
        let (vrf, prefix) = parse_route_key("10.0.0.0/24").unwrap();
        assert_eq!(vrf, "");
        assert_eq!(prefix.to_string(), "10.0.0.0/24");

        let (vrf, prefix) = parse_route_key("Vrf-red:10.0.0.0/24").unwrap();
        assert_eq!(vrf, "Vrf-red");
        assert_eq!(prefix.to_string(), "10.0.0.0/24");

        // IPv6 keys keep their colons.
        let (vrf, prefix) = parse_route_key("2001:db8::/32").unwrap();
        assert_eq!(vrf, "");
        assert!(prefix.is_ipv6());

        assert!(parse_route_key("not-a-prefix").is_err());
    }

    #[test]
    fn ecmp_intent() {
        let intent = parse_route_intent(&set(
            "10.3.0.0/24",
            &[
                ("nexthop", "10.1.1.2,10.1.2.2"),
                ("ifname", "Ethernet4,Ethernet5"),
            ],
        ))
        .unwrap();
        assert_eq!(intent.nexthops.len(), 2);
        assert!(intent.nexthops.is_ecmp());
        assert!(!intent.blackhole);
    }

    #[test]
    fn arity_mismatch_is_invalid() {
        let result = parse_route_intent(&set(
            "10.3.0.0/24",
            &[("nexthop", "10.1.1.2,10.1.2.2"), ("ifname", "Ethernet4")],
        ));
        assert_eq!(result, Err(RouteParseError::ArityMismatch(2, 1)));

        // One list missing entirely is a mismatch too.
        let one_sided =
            parse_route_intent(&set("10.3.0.0/24", &[("ifname", "Ethernet4")]));
        assert_eq!(one_sided, Err(RouteParseError::ArityMismatch(0, 1)));
    }

    #[test]
    fn group_index_excludes_direct_fields() {
        let result = parse_route_intent(&set(
            "10.3.0.0/24",
            &[("nexthop_group", "g1"), ("ifname", "Ethernet4")],
        ));
        assert_eq!(result, Err(RouteParseError::GroupExcludesDirect));

        let intent =
            parse_route_intent(&set("10.3.0.0/24", &[("nexthop_group", "g1")])).unwrap();
        assert_eq!(intent.nhg_index.as_deref(), Some("g1"));
        assert!(intent.nexthops.is_empty());
    }

    #[test]
    fn blackhole_intent() {
        let intent =
            parse_route_intent(&set("10.3.0.0/24", &[("blackhole", "true")])).unwrap();
        assert!(intent.blackhole);
        assert!(intent.nexthops.is_empty());
    }

    #[test]
    fn skip_class_interfaces() {
        let intent = parse_route_intent(&set(
            "10.3.0.0/24",
            &[("nexthop", "10.1.1.2"), ("ifname", "eth0")],
        ))
        .unwrap();
        assert!(intent.skip_class);

        let loopback = parse_route_intent(&set(
            "10.3.0.0/24",
            &[("nexthop", "10.1.1.2"), ("ifname", "Loopback0")],
        ))
        .unwrap();
        assert!(loopback.skip_class);
    }

    #[test]
    fn weights_apply_per_member() {
        let intent = parse_route_intent(&set(
            "10.3.0.0/24",
            &[
                ("nexthop", "10.1.1.2,10.1.2.2"),
                ("ifname", "Ethernet4,Ethernet5"),
                ("weight", "3,5"),
            ],
        ))
        .unwrap();
        let weights: Vec<u32> = intent.nexthops.iter().map(|nh| nh.weight).collect();
        assert_eq!(weights.iter().sum::<u32>(), 8);
    }

    #[test]
    fn zero_weight_is_invalid() {
        let result = parse_route_intent(&set(
            "10.3.0.0/24",
            &[
                ("nexthop", "10.1.1.2,10.1.2.2"),
                ("ifname", "Ethernet4,Ethernet5"),
                ("weight", "0,5"),
            ],
        ));
        assert!(matches!(result, Err(RouteParseError::BadField { .. })));
    }

    #[test]
    fn direct_route_intent() {
        let intent = parse_route_intent(&set(
            "10.2.0.0/16",
            &[("nexthop", "0.0.0.0"), ("ifname", "Vlan1")],
        ))
        .unwrap();
        assert_eq!(intent.nexthops.len(), 1);
        let nh = intent.nexthops.iter().next().unwrap();
        assert!(nh.is_interface_nexthop());
        assert_eq!(nh.alias, "Vlan1");
    }

    #[test]
    fn srv6_intent() {
        let intent = parse_route_intent(&set(
            "10.5.0.0/16",
            &[
                ("nexthop", "2001:db8::1"),
                ("ifname", "unknown"),
                ("segment", "seg1"),
                ("seg_src", "fc00::1"),
            ],
        ))
        .unwrap();
        let nh = intent.nexthops.iter().next().unwrap();
        assert!(nh.is_srv6());
        assert_eq!(nh.srv6_segment.as_deref(), Some("seg1"));
    }
}
