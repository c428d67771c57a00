//! Serialization of the per-machine programs.
//!
//! Each machine receives three textual batches, one per kernel subsystem,
//! each rendered for that subsystem's batch-mode interpreter:
//!
//! | program                | interpreter |
//! |------------------------|-------------|
//! | [`IpBatch`]            | `ip -b -`   |
//! | [`TcBatch`]            | `tc -b -`   |
//! | [`NftRuleset`]         | `nft -f -`  |
//!
//! Generation is pure: the types below only know how to print themselves,
//! which keeps every program testable without a network in sight.

use std::fmt;
use std::net::Ipv4Addr;

use crate::addr::ENDPOINT_PREFIX;

/// The nftables table owned by netlag on every machine.
pub const NFT_TABLE: &str = "netlag";

/// One `ip` batch command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpCommand {
    /// `route add 10.0.0.0/8 dev <dev>` — one aggregate route instead of one
    /// route per endpoint address.
    RouteAdd { dev: String },
    /// `addr add <addr>/32 dev <dev>`
    AddrAdd { addr: Ipv4Addr, dev: String },
}

impl fmt::Display for IpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RouteAdd { dev } => write!(f, "route add {ENDPOINT_PREFIX} dev {dev}"),
            Self::AddrAdd { addr, dev } => write!(f, "addr add {addr}/32 dev {dev}"),
        }
    }
}

/// Address program for one machine, consumed by `ip -b -`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpBatch {
    commands: Vec<IpCommand>,
}

impl IpBatch {
    pub const INTERPRETER: &'static str = "ip -b -";

    pub fn push(&mut self, command: IpCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[IpCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn render(&self) -> String {
        render_lines(&self.commands)
    }
}

/// One `tc` batch command. Handles follow the fixed scheme: root qdisc `1:`,
/// one class minor and fw mark per latency class id, netem handle `id + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcCommand {
    /// `qdisc add dev <dev> root handle 1: htb default <default>`
    QdiscAddRootHtb { dev: String, default_class: u16 },
    /// `class add dev <dev> parent 1: classid 1:<class> htb rate <rate>`
    ClassAddHtb { dev: String, class: u16, rate: &'static str },
    /// `qdisc add dev <dev> parent 1:<class> handle <handle>: netem delay <delay>ms`
    QdiscAddNetem { dev: String, class: u16, handle: u16, delay_ms: u64 },
    /// `filter add dev <dev> parent 1:0 prio 1 handle <mark> fw flowid 1:<class>`
    FilterAddFwMark { dev: String, mark: u16, class: u16 },
}

impl fmt::Display for TcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QdiscAddRootHtb { dev, default_class } => {
                write!(f, "qdisc add dev {dev} root handle 1: htb default {default_class}")
            }
            Self::ClassAddHtb { dev, class, rate } => {
                write!(f, "class add dev {dev} parent 1: classid 1:{class} htb rate {rate}")
            }
            Self::QdiscAddNetem { dev, class, handle, delay_ms } => {
                write!(
                    f,
                    "qdisc add dev {dev} parent 1:{class} handle {handle}: netem delay {delay_ms}ms"
                )
            }
            Self::FilterAddFwMark { dev, mark, class } => {
                write!(f, "filter add dev {dev} parent 1:0 prio 1 handle {mark} fw flowid 1:{class}")
            }
        }
    }
}

/// Shaping program for one machine, consumed by `tc -b -`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcBatch {
    commands: Vec<TcCommand>,
}

impl TcBatch {
    pub const INTERPRETER: &'static str = "tc -b -";

    pub fn push(&mut self, command: TcCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[TcCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn render(&self) -> String {
        render_lines(&self.commands)
    }
}

/// A named set of (source, destination) address pairs sharing one packet
/// mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftPairSet {
    pub mark: u16,
    pub elements: Vec<(Ipv4Addr, Ipv4Addr)>,
}

impl NftPairSet {
    fn name(&self) -> String {
        format!("class_{}_pairs", self.mark)
    }
}

/// Classification ruleset for one machine, consumed by `nft -f -`.
///
/// One table holding, per latency class, a pair set and a postrouting rule
/// stamping matching packets with the class's mark. A pair absent from every
/// set stays unmarked and falls into the default shaping class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NftRuleset {
    sets: Vec<NftPairSet>,
}

impl NftRuleset {
    pub const INTERPRETER: &'static str = "nft -f -";

    pub fn push(&mut self, set: NftPairSet) {
        self.sets.push(set);
    }

    pub fn sets(&self) -> &[NftPairSet] {
        &self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Renders the full table, or the empty string when there is nothing to
    /// classify (a machine with no delayed pairs needs no table at all).
    pub fn render(&self) -> String {
        if self.sets.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        out.push_str(&format!("table ip {NFT_TABLE} {{\n"));
        for set in &self.sets {
            out.push_str(&format!("  set {} {{\n", set.name()));
            out.push_str("    type ipv4_addr . ipv4_addr\n");
            out.push_str("    elements = {\n");
            for (src, dst) in &set.elements {
                out.push_str(&format!("      {src} . {dst},\n"));
            }
            out.push_str("    }\n");
            out.push_str("  }\n\n");
        }
        out.push_str("  chain postrouting {\n");
        out.push_str("    type filter hook postrouting priority mangle - 1\n");
        out.push_str("    policy accept\n\n");
        for set in &self.sets {
            out.push_str(&format!(
                "    ip saddr . ip daddr @{} meta mark set {}\n",
                set.name(),
                set.mark
            ));
        }
        out.push_str("  }\n");
        out.push_str("}\n");
        out
    }
}

fn render_lines(commands: &[impl fmt::Display]) -> String {
    commands.iter().map(|c| format!("{c}\n")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_batch_renders_one_command_per_line() {
        let mut batch = IpBatch::default();
        batch.push(IpCommand::RouteAdd { dev: "bond0".to_string() });
        batch.push(IpCommand::AddrAdd { addr: Ipv4Addr::new(10, 0, 0, 1), dev: "bond0".to_string() });

        assert_eq!(batch.render(), "route add 10.0.0.0/8 dev bond0\naddr add 10.0.0.1/32 dev bond0\n");
    }

    #[test]
    fn tc_commands_render_the_expected_grammar() {
        let dev = "eth0".to_string();
        assert_eq!(
            TcCommand::QdiscAddRootHtb { dev: dev.clone(), default_class: 9999 }.to_string(),
            "qdisc add dev eth0 root handle 1: htb default 9999"
        );
        assert_eq!(
            TcCommand::ClassAddHtb { dev: dev.clone(), class: 2, rate: "10gbit" }.to_string(),
            "class add dev eth0 parent 1: classid 1:2 htb rate 10gbit"
        );
        assert_eq!(
            TcCommand::QdiscAddNetem { dev: dev.clone(), class: 2, handle: 3, delay_ms: 17 }
                .to_string(),
            "qdisc add dev eth0 parent 1:2 handle 3: netem delay 17ms"
        );
        assert_eq!(
            TcCommand::FilterAddFwMark { dev, mark: 2, class: 2 }.to_string(),
            "filter add dev eth0 parent 1:0 prio 1 handle 2 fw flowid 1:2"
        );
    }

    #[test]
    fn nft_ruleset_renders_sets_then_chain() {
        let mut ruleset = NftRuleset::default();
        ruleset.push(NftPairSet {
            mark: 1,
            elements: vec![(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 1, 0, 1))],
        });
        ruleset.push(NftPairSet {
            mark: 2,
            elements: vec![(Ipv4Addr::new(10, 1, 0, 1), Ipv4Addr::new(10, 0, 0, 1))],
        });

        let rendered = ruleset.render();
        assert_eq!(
            rendered,
            "\
table ip netlag {
  set class_1_pairs {
    type ipv4_addr . ipv4_addr
    elements = {
      10.0.0.1 . 10.1.0.1,
    }
  }

  set class_2_pairs {
    type ipv4_addr . ipv4_addr
    elements = {
      10.1.0.1 . 10.0.0.1,
    }
  }

  chain postrouting {
    type filter hook postrouting priority mangle - 1
    policy accept

    ip saddr . ip daddr @class_1_pairs meta mark set 1
    ip saddr . ip daddr @class_2_pairs meta mark set 2
  }
}
"
        );
    }

    #[test]
    fn empty_ruleset_renders_nothing() {
        assert_eq!(NftRuleset::default().render(), "");
    }
}
