use once_cell::sync::Lazy;
use regex::Regex;

/// Producer version of the compiler that built the inferior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProducerVersion(pub (u32, u32));

impl ProducerVersion {
    /// Parse a version from a DWARF producer string like
    /// "Go cmd/compile go1.21.3; regabi".
    pub fn parse(producer: &str) -> Option<Self> {
        static V_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"go(\d+)\.(\d+)").expect("must compile"));

        let captures = V_RE.captures(producer)?;
        let major = captures[1].parse::<u32>().ok()?;
        let minor = captures[2].parse::<u32>().ok()?;
        Some(ProducerVersion((major, minor)))
    }

    pub fn after_or_equal(self, major: u32, minor: u32) -> bool {
        self >= ProducerVersion((major, minor))
    }
}
