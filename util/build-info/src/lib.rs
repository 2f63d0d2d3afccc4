//! Quarry version info.

use std::fmt;

/// Quarry version.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
    /// Pre-release identifier, e.g. `pre` in `0.6.0-pre`.
    pub dash: Option<String>,
    /// `git describe` output when built from a checkout.
    pub commit_describe: Option<String>,
}

impl Version {
    /// Short representation: `major.minor.patch[-dash]`.
    pub fn short(&self) -> String {
        let mut s = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if let Some(dash) = &self.dash {
            s.push('-');
            s.push_str(dash);
        }
        s
    }

    /// Long representation including the commit describe when available.
    pub fn long(&self) -> String {
        match &self.commit_describe {
            Some(describe) => format!("{} ({})", self.short(), describe),
            None => self.short(),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}
