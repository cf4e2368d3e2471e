//! # Scheduling policy.
//!
//! - [`SchedulingPolicy::RoundRobin`]: the supervisor accepts every connection
//!   and hands it to the next `Listening` worker in id order.
//! - [`SchedulingPolicy::OsDefault`]: every worker accepts on a clone of the
//!   shared listener; the operating system decides who wins.
//!
//! The policy is fixed once the first worker has been spawned.

use std::fmt;
use std::str::FromStr;

/// How connections are spread across workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulingPolicy {
    RoundRobin,
    OsDefault,
}

impl SchedulingPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulingPolicy::RoundRobin => "rr",
            SchedulingPolicy::OsDefault => "none",
        }
    }
}

impl Default for SchedulingPolicy {
    /// Round-robin, except on Windows where the OS default performs better.
    fn default() -> Self {
        if cfg!(windows) {
            SchedulingPolicy::OsDefault
        } else {
            SchedulingPolicy::RoundRobin
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rr" | "round-robin" | "roundrobin" => Ok(SchedulingPolicy::RoundRobin),
            "none" | "os" | "os-default" => Ok(SchedulingPolicy::OsDefault),
            other => Err(format!(
                "unknown scheduling policy '{other}'. Valid options: rr, none"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("rr".parse(), Ok(SchedulingPolicy::RoundRobin));
        assert_eq!(" Round-Robin ".parse(), Ok(SchedulingPolicy::RoundRobin));
        assert_eq!("none".parse(), Ok(SchedulingPolicy::OsDefault));
        assert!("random".parse::<SchedulingPolicy>().is_err());
    }

    #[test]
    fn display_matches_env_spelling() {
        for p in [SchedulingPolicy::RoundRobin, SchedulingPolicy::OsDefault] {
            assert_eq!(p.to_string().parse::<SchedulingPolicy>(), Ok(p));
        }
    }
}
