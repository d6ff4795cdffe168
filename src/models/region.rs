use std::fmt;

/// Regions enabled on every AWS account
pub const DEFAULT_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-central-1",
    "ca-central-1",
];

/// Default regions plus the remaining regions enabled by default
pub const EXTRA_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-central-1",
    "ca-central-1",
    "ap-south-1",
    "ap-northeast-3",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "sa-east-1",
];

/// Extra regions plus the ones that require a manual opt-in on the account
pub const ALL_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-central-1",
    "ca-central-1",
    "ap-south-1",
    "ap-northeast-3",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "sa-east-1",
    "ap-east-1",
    "af-south-1",
    "eu-south-1",
    "me-south-1",
    "eu-north-1",
];

/// A cloud region identifier such as `us-east-1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region(String);

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Region {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Region {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Named region lists callers can pick at construction time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionPreset {
    #[default]
    Default,
    Extra,
    All,
}

impl RegionPreset {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "default" | "" => Some(Self::Default),
            "extra" => Some(Self::Extra),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Extra => "extra",
            Self::All => "all",
        }
    }

    pub fn names(&self) -> &'static [&'static str] {
        match self {
            Self::Default => DEFAULT_REGIONS,
            Self::Extra => EXTRA_REGIONS,
            Self::All => ALL_REGIONS,
        }
    }

    pub fn regions(&self) -> Vec<Region> {
        self.names().iter().map(|&name| Region::from(name)).collect()
    }
}
