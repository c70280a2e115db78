//! Federated login providers

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Providers offered on the login page. Anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FederatedProvider {
    /// GitHub
    Github,
    /// Google
    Google,
}

impl FederatedProvider {
    /// The complete allow-list
    pub const ALL: [Self; 2] = [Self::Github, Self::Google];

    /// Identifier used in routes and by the identity provider
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for FederatedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FederatedProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::UnsupportedProvider(s.to_string()))
    }
}
