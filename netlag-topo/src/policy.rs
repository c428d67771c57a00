//! Endpoint-count policies.
//!
//! The CLI accepts the endpoint count either as an absolute total or scaled
//! to the job's machines: `500`, `20/machine`, `4/cpu`.

use std::str::FromStr;

use thiserror::Error;

use crate::inventory::Machine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointPolicy {
    /// Absolute number of endpoints across the whole job.
    Total(u32),
    /// Endpoints per machine in the job.
    PerMachine(u32),
    /// Endpoints per CPU, summed over the job's machines.
    PerCpu(u32),
}

impl EndpointPolicy {
    /// Resolves the policy to a total endpoint count for the given job
    /// machines. Distribution across machines stays uniform; the policy only
    /// determines the total.
    pub fn resolve(&self, machines: &[Machine]) -> usize {
        match *self {
            Self::Total(n) => n as usize,
            Self::PerMachine(n) => n as usize * machines.len(),
            Self::PerCpu(n) => {
                n as usize * machines.iter().map(|m| m.cpus() as usize).sum::<usize>()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid endpoint count '{0}': expected <n>, <n>/machine or <n>/cpu")]
pub struct InvalidEndpointPolicy(String);

impl FromStr for EndpointPolicy {
    type Err = InvalidEndpointPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidEndpointPolicy(s.to_string());
        if let Some(n) = s.strip_suffix("/cpu") {
            Ok(Self::PerCpu(n.parse().map_err(|_| err())?))
        } else if let Some(n) = s.strip_suffix("/machine") {
            Ok(Self::PerMachine(n.parse().map_err(|_| err())?))
        } else {
            Ok(Self::Total(s.parse().map_err(|_| err())?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;

    fn machines() -> Vec<Machine> {
        Inventory::parse("a 16 eth0\nb 32 eth0\nc 16 eth0\n")
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    #[test]
    fn parses_totals() {
        assert_eq!("100".parse(), Ok(EndpointPolicy::Total(100)));
        assert_eq!("1".parse(), Ok(EndpointPolicy::Total(1)));
        assert_eq!("0".parse(), Ok(EndpointPolicy::Total(0)));
    }

    #[test]
    fn parses_per_machine() {
        assert_eq!("20/machine".parse(), Ok(EndpointPolicy::PerMachine(20)));
        assert_eq!("1/machine".parse(), Ok(EndpointPolicy::PerMachine(1)));
    }

    #[test]
    fn parses_per_cpu() {
        assert_eq!("10/cpu".parse(), Ok(EndpointPolicy::PerCpu(10)));
        assert_eq!("1000/cpu".parse(), Ok(EndpointPolicy::PerCpu(1000)));
    }

    #[test]
    fn rejects_invalid_numbers() {
        assert!("-5/cpu".parse::<EndpointPolicy>().is_err());
        assert!("abc/cpu".parse::<EndpointPolicy>().is_err());
        assert!("10.5/machine".parse::<EndpointPolicy>().is_err());
        assert!("xyz".parse::<EndpointPolicy>().is_err());
        assert!("".parse::<EndpointPolicy>().is_err());
    }

    #[test]
    fn rejects_unknown_suffixes() {
        assert!("10/node".parse::<EndpointPolicy>().is_err());
        assert!("10/core".parse::<EndpointPolicy>().is_err());
        assert!("10/".parse::<EndpointPolicy>().is_err());
    }

    #[test]
    fn rejects_overflow() {
        assert!("4294967296/cpu".parse::<EndpointPolicy>().is_err());
        assert!("18446744073709551616".parse::<EndpointPolicy>().is_err());
    }

    #[test]
    fn rejects_embedded_whitespace() {
        assert!(" 10/cpu".parse::<EndpointPolicy>().is_err());
        assert!("10 /cpu".parse::<EndpointPolicy>().is_err());
        assert!("10/ cpu".parse::<EndpointPolicy>().is_err());
    }

    #[test]
    fn resolves_against_job_machines() {
        let machines = machines();
        assert_eq!(EndpointPolicy::Total(100).resolve(&machines), 100);
        assert_eq!(EndpointPolicy::PerMachine(20).resolve(&machines), 60);
        assert_eq!(EndpointPolicy::PerCpu(2).resolve(&machines), 128);
    }
}
