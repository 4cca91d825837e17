//! Shell command builders.
//!
//! Every operand from the bus is quoted; the member-removal path carries no
//! `bridge vlan show` parsing, the bridge membership decision is taken
//! in-process.

use swsync_cfgagent_common::shell::{self, shellquote, BASH_CMD, BRIDGE_CMD, ECHO_CMD, IP_CMD};

/// The dot1Q bridge every VLAN hangs off.
pub const DOT1Q_BRIDGE_NAME: &str = "Bridge";

/// VLAN interface prefix.
pub const VLAN_PREFIX: &str = "Vlan";

/// LAG alias prefix.
pub const LAG_PREFIX: &str = "PortChannel";

/// Default VLAN removed from the bridge at init.
pub const DEFAULT_VLAN_ID: u16 = 1;

/// Bridge MTU.
pub const BRIDGE_MTU: u32 = 9100;

/// Tears down any stray dot1Q bridge and recreates it with VLAN filtering,
/// the switch MAC and the default VLAN removed.
pub fn build_init_bridge_cmd(mac: &str) -> String {
    let mac = shellquote(mac);
    format!(
        "{bash} -c \"{ip} link del {br} 2>/dev/null; \
         {ip} link add {br} up type bridge && \
         {ip} link set {br} type bridge vlan_filtering 1 && \
         {ip} link set {br} mtu {mtu} && \
         {ip} link set {br} address {mac} && \
         {bridge} vlan del vid {vid} dev {br} self\"",
        bash = BASH_CMD,
        ip = IP_CMD,
        bridge = BRIDGE_CMD,
        br = DOT1Q_BRIDGE_NAME,
        mtu = BRIDGE_MTU,
        mac = mac,
        vid = DEFAULT_VLAN_ID,
    )
}

/// Creates the VLAN: vid on the bridge plus the `Vlan<id>` sub-interface
/// carrying the switch MAC, brought up.
pub fn build_add_vlan_cmd(vlan_id: u16, mac: &str) -> String {
    let mac = shellquote(mac);
    format!(
        "{bash} -c \"{bridge} vlan add vid {vid} dev {br} self && \
         {ip} link add link {br} up name {prefix}{vid} address {mac} type vlan id {vid}\"",
        bash = BASH_CMD,
        bridge = BRIDGE_CMD,
        ip = IP_CMD,
        br = DOT1Q_BRIDGE_NAME,
        prefix = VLAN_PREFIX,
        vid = vlan_id,
        mac = mac,
    )
}

pub fn build_remove_vlan_cmd(vlan_id: u16) -> String {
    format!(
        "{bash} -c \"{ip} link del {prefix}{vid} && \
         {bridge} vlan del vid {vid} dev {br} self\"",
        bash = BASH_CMD,
        ip = IP_CMD,
        bridge = BRIDGE_CMD,
        br = DOT1Q_BRIDGE_NAME,
        prefix = VLAN_PREFIX,
        vid = vlan_id,
    )
}

pub fn build_set_vlan_admin_cmd(vlan_id: u16, admin_status: &str) -> String {
    format!(
        "{} link set {}{} {}",
        IP_CMD,
        VLAN_PREFIX,
        vlan_id,
        shellquote(admin_status)
    )
}

pub fn build_set_vlan_mtu_cmd(vlan_id: u16, mtu: u32) -> String {
    format!("{} link set {}{} mtu {}", IP_CMD, VLAN_PREFIX, vlan_id, mtu)
}

/// Attaches a port to the bridge (first membership only).
pub fn build_attach_port_cmd(port: &str) -> String {
    format!(
        "{} link set {} master {}",
        IP_CMD,
        shellquote(port),
        DOT1Q_BRIDGE_NAME
    )
}

/// Adds the vid on a member port with its tagging mode.
pub fn build_add_member_vid_cmd(vlan_id: u16, port: &str, tagging_args: &str) -> String {
    let cmd = format!(
        "{} vlan add vid {} dev {} {}",
        BRIDGE_CMD,
        vlan_id,
        shellquote(port),
        tagging_args
    );
    cmd.trim_end().to_string()
}

pub fn build_remove_member_vid_cmd(vlan_id: u16, port: &str) -> String {
    format!(
        "{} vlan del vid {} dev {}",
        BRIDGE_CMD,
        vlan_id,
        shellquote(port)
    )
}

/// Detaches a port that has no memberships left.
pub fn build_detach_port_cmd(port: &str) -> String {
    format!("{} link set {} nomaster", IP_CMD, shellquote(port))
}

/// Brings the member up with the default MTU.
pub fn build_member_up_cmd(port: &str, mtu: u32) -> String {
    format!("{} link set {} up mtu {}", IP_CMD, shellquote(port), mtu)
}

/// Per-port flood-control toggle through the bridge-port sysfs files.
pub fn build_flood_control_cmd(port: &str, file: &str, enabled: bool) -> String {
    format!(
        "{} {} > {}/{}/brport/{}",
        ECHO_CMD,
        u8::from(enabled),
        shell::BRPORT_SYSFS,
        port,
        file
    )
}

pub fn build_ip_address_add_cmd(alias: &str, prefix: &str) -> String {
    format!(
        "{} address add {} dev {}",
        IP_CMD,
        shellquote(prefix),
        shellquote(alias)
    )
}

pub fn build_ip_address_del_cmd(alias: &str, prefix: &str) -> String {
    format!(
        "{} address del {} dev {}",
        IP_CMD,
        shellquote(prefix),
        shellquote(alias)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_bridge_shape() {
        let cmd = build_init_bridge_cmd("00:11:22:33:44:55");
        assert!(cmd.contains("link del Bridge"));
        assert!(cmd.contains("vlan_filtering 1"));
        assert!(cmd.contains("vlan del vid 1 dev Bridge self"));
        assert!(cmd.contains("00:11:22:33:44:55"));
    }

    #[test]
    fn vlan_lifecycle_commands() {
        let add = build_add_vlan_cmd(100, "00:11:22:33:44:55");
        assert!(add.contains("vlan add vid 100 dev Bridge self"));
        assert!(add.contains("name Vlan100"));

        let del = build_remove_vlan_cmd(100);
        assert!(del.contains("link del Vlan100"));
        assert!(del.contains("vlan del vid 100"));
    }

    #[test]
    fn member_commands() {
        let vid = build_add_member_vid_cmd(10, "Ethernet6", "pvid untagged");
        assert!(vid.ends_with("pvid untagged"));

        let tagged = build_add_member_vid_cmd(10, "Ethernet6", "");
        assert!(tagged.ends_with("\"Ethernet6\""));

        assert!(build_detach_port_cmd("Ethernet6").contains("nomaster"));
        assert!(build_member_up_cmd("Ethernet6", 9100).contains("up mtu 9100"));
    }

    #[test]
    fn flood_control_paths() {
        let cmd = build_flood_control_cmd("Ethernet6", "mcast_flood", false);
        assert_eq!(
            cmd,
            "/bin/echo 0 > /sys/class/net/Ethernet6/brport/mcast_flood"
        );
    }

    #[test]
    fn quoting_blocks_injection() {
        let cmd = build_attach_port_cmd("Ethernet0; rm -rf /");
        assert!(cmd.contains("\"Ethernet0; rm -rf /\""));
    }
}
