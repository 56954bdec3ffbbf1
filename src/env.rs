//! Where the client is running, from `BIDWATCH_ENV`.
//!
//! `test` keeps config and storage under the repo's `tmp/`, `development`
//! (or `dev`) points at a local server with verbose logging, and anything
//! else is production.

/// Deployment the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Live auction server.
    #[default]
    Production,
    /// Local server on port 3000.
    Development,
    /// Integration tests.
    Test,
}

impl Environment {
    /// Read `BIDWATCH_ENV`.
    #[must_use]
    pub fn current() -> Self {
        std::env::var("BIDWATCH_ENV")
            .map(|value| Self::from_tag(&value))
            .unwrap_or_default()
    }

    fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "test" => Self::Test,
            "development" | "dev" => Self::Development,
            _ => Self::Production,
        }
    }

    /// Lowercase tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
            Self::Test => "test",
        }
    }

    /// Test environment?
    #[must_use]
    pub fn is_test(self) -> bool {
        matches!(self, Self::Test)
    }

    /// Development environment?
    #[must_use]
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Server used when the config does not name one.
    #[must_use]
    pub fn default_server_url(self) -> &'static str {
        if matches!(self, Self::Production) {
            "https://subastas.example.com"
        } else {
            "http://localhost:3000"
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `BIDWATCH_ENV=test`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}
