//! SRv6 resource tables.

use std::collections::HashMap;

use swsync_orch::{RefCounted, SyncMap};
use swsync_sai::api::SidBehavior;
use swsync_sai::Srv6SidListOid;
use swsync_types::{Ipv6Address, ParseError};

/// A programmed segment list, referenced by routes carrying a `segment`
/// field.
#[derive(Debug)]
pub struct SidListEntry {
    pub oid: Srv6SidListOid,
    pub segments: Vec<Ipv6Address>,
    ref_count: u32,
}

impl Default for SidListEntry {
    fn default() -> Self {
        Self {
            oid: Srv6SidListOid::NULL,
            segments: Vec::new(),
            ref_count: 0,
        }
    }
}

impl SidListEntry {
    pub fn new(oid: Srv6SidListOid, segments: Vec<Ipv6Address>) -> Self {
        Self {
            oid,
            segments,
            ref_count: 0,
        }
    }
}

impl RefCounted for SidListEntry {
    fn ref_count(&self) -> u32 {
        self.ref_count
    }

    fn inc_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    fn dec_ref(&mut self) -> Option<u32> {
        self.ref_count = self.ref_count.checked_sub(1)?;
        Some(self.ref_count)
    }
}

/// A programmed local SID.
#[derive(Debug, Clone)]
pub struct MySidEntry {
    pub sid: Ipv6Address,
    pub behavior: SidBehavior,
    pub vrf_name: Option<String>,
}

/// SRv6 state owned by the SRv6 orchestrator; the route path reads SID-list
/// ids through it.
#[derive(Default)]
pub struct Srv6State {
    pub sid_lists: SyncMap<String, SidListEntry>,
    pub my_sids: HashMap<String, MySidEntry>,
    /// Encap source dedup: source address -> use count.
    pub tunnel_sources: HashMap<Ipv6Address, u32>,
}

impl Srv6State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sid_list_id(&self, name: &str) -> Option<Srv6SidListOid> {
        self.sid_lists.get(&name.to_string()).map(|e| e.oid)
    }
}

/// Parses the `action` field of a local-SID record.
pub fn parse_behavior(action: &str) -> Option<SidBehavior> {
    Some(match action {
        "end" => SidBehavior::End,
        "end.x" => SidBehavior::EndX,
        "end.t" => SidBehavior::EndT,
        "end.dx4" => SidBehavior::EndDx4,
        "end.dx6" => SidBehavior::EndDx6,
        "end.dt4" => SidBehavior::EndDt4,
        "end.dt6" => SidBehavior::EndDt6,
        "end.dt46" => SidBehavior::EndDt46,
        "end.b6.encaps" => SidBehavior::EndB6Encaps,
        "end.b6.encaps.red" => SidBehavior::EndB6EncapsRed,
        "end.b6.insert" => SidBehavior::EndB6Insert,
        "end.b6.insert.red" => SidBehavior::EndB6InsertRed,
        "udx4" => SidBehavior::Udx4,
        "udx6" => SidBehavior::Udx6,
        "udt4" => SidBehavior::Udt4,
        "udt6" => SidBehavior::Udt6,
        "udt46" => SidBehavior::Udt46,
        "un" => SidBehavior::Un,
        "ua" => SidBehavior::Ua,
        _ => return None,
    })
}

/// Parses a `MY_SID` key: `<block_len>:<node_len>:<function_len>:<args_len>:<sid-ip>`.
pub fn parse_my_sid_key(key: &str) -> Result<(u8, u8, u8, u8, Ipv6Address), ParseError> {
    let parts: Vec<&str> = key.splitn(5, ':').collect();
    if parts.len() != 5 {
        return Err(ParseError::InvalidIpAddress(key.to_string()));
    }
    let lens: Vec<u8> = parts[..4]
        .iter()
        .map(|p| p.parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| ParseError::InvalidIpAddress(key.to_string()))?;
    let sid: Ipv6Address = parts[4].parse()?;
    Ok((lens[0], lens[1], lens[2], lens[3], sid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_parsing() {
        assert_eq!(parse_behavior("end"), Some(SidBehavior::End));
        assert_eq!(parse_behavior("end.dt46"), Some(SidBehavior::EndDt46));
        assert_eq!(parse_behavior("un"), Some(SidBehavior::Un));
        assert_eq!(parse_behavior("bogus"), None);
        assert!(SidBehavior::EndDt4.requires_vrf());
        assert!(!SidBehavior::End.requires_vrf());
    }

    #[test]
    fn my_sid_key_parsing() {
        let (block, node, func, args, sid) =
            parse_my_sid_key("32:16:16:0:fc00:1:2::").unwrap();
        assert_eq!((block, node, func, args), (32, 16, 16, 0));
        assert_eq!(sid.to_string(), "fc00:1:2::");

        assert!(parse_my_sid_key("32:16:16:fc00::").is_err());
        assert!(parse_my_sid_key("x:16:16:0:fc00::").is_err());
    }
}
