//! Engine configuration.

/// Configuration for creating an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct Config {
    /// Log every statement, its parameters and transaction boundaries at
    /// `INFO` instead of `DEBUG`.
    pub echo: bool,

    /// Replace parameter values with a placeholder in statement logs.
    pub hide_parameters: bool,

    /// Check foreign keys on every write.
    pub enforce_foreign_keys: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            echo: false,
            hide_parameters: false,
            enforce_foreign_keys: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether statements are echoed at `INFO`.
    #[must_use]
    pub const fn echo(mut self, value: bool) -> Self {
        self.echo = value;
        self
    }

    /// Sets whether parameter values are hidden from logs.
    #[must_use]
    pub const fn hide_parameters(mut self, value: bool) -> Self {
        self.hide_parameters = value;
        self
    }

    /// Sets whether foreign keys are enforced.
    #[must_use]
    pub const fn enforce_foreign_keys(mut self, value: bool) -> Self {
        self.enforce_foreign_keys = value;
        self
    }
}
