use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Platform releases this tool can walk a deployment through, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Release {
    Ironwood,
    Juniper,
    Koa,
    Lilac,
    Maple,
    Nutmeg,
    Olive,
    Palm,
}

impl Release {
    pub const ALL: [Release; 8] = [
        Release::Ironwood,
        Release::Juniper,
        Release::Koa,
        Release::Lilac,
        Release::Maple,
        Release::Nutmeg,
        Release::Olive,
        Release::Palm,
    ];

    /// The release this version of the tool deploys.
    pub const LATEST: Release = Release::Palm;

    pub fn as_str(&self) -> &'static str {
        match self {
            Release::Ironwood => "ironwood",
            Release::Juniper => "juniper",
            Release::Koa => "koa",
            Release::Lilac => "lilac",
            Release::Maple => "maple",
            Release::Nutmeg => "nutmeg",
            Release::Olive => "olive",
            Release::Palm => "palm",
        }
    }

    pub fn next(self) -> Option<Release> {
        let index = Self::ALL.iter().position(|r| *r == self)?;
        Self::ALL.get(index + 1).copied()
    }

    pub fn is_latest(self) -> bool {
        self == Self::LATEST
    }

    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|r| r.as_str().to_string()).collect()
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Release {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| Error::upgrade_unknown_release(s, Self::names()))
    }
}
