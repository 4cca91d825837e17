//! Record types for the kernel-side agent.

use std::str::FromStr;

/// 802.1Q membership tagging mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggingMode {
    Untagged,
    Tagged,
    PriorityTagged,
}

impl TaggingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaggingMode::Untagged => "untagged",
            TaggingMode::Tagged => "tagged",
            TaggingMode::PriorityTagged => "priority_tagged",
        }
    }

    /// The `bridge vlan add` suffix for this mode.
    pub fn bridge_args(&self) -> &'static str {
        match self {
            TaggingMode::Untagged => "pvid untagged",
            TaggingMode::Tagged => "",
            TaggingMode::PriorityTagged => "pvid",
        }
    }

    /// Untagged and priority-tagged members carry the pvid.
    pub fn sets_pvid(&self) -> bool {
        matches!(self, TaggingMode::Untagged | TaggingMode::PriorityTagged)
    }
}

impl FromStr for TaggingMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untagged" => Ok(TaggingMode::Untagged),
            "tagged" => Ok(TaggingMode::Tagged),
            "priority_tagged" => Ok(TaggingMode::PriorityTagged),
            _ => Err(()),
        }
    }
}

/// Switch-level flood control toggles; applied to every bridge port, and to
/// new members as they join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodControl {
    pub unicast: bool,
    pub multicast: bool,
    pub broadcast: bool,
}

impl Default for FloodControl {
    fn default() -> Self {
        // Kernel default: everything floods.
        Self {
            unicast: true,
            multicast: true,
            broadcast: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagging_mode_parse() {
        assert_eq!("untagged".parse(), Ok(TaggingMode::Untagged));
        assert_eq!("tagged".parse(), Ok(TaggingMode::Tagged));
        assert_eq!("priority_tagged".parse(), Ok(TaggingMode::PriorityTagged));
        assert!("bogus".parse::<TaggingMode>().is_err());
    }

    #[test]
    fn pvid_rules() {
        assert!(TaggingMode::Untagged.sets_pvid());
        assert!(TaggingMode::PriorityTagged.sets_pvid());
        assert!(!TaggingMode::Tagged.sets_pvid());
    }
}
