//! Procedure URI validation.
//!
//! URIs are dot-separated components. Which components may be empty depends
//! on how the URI is used:
//!
//! - exact registrations: no empty components
//! - prefix registrations: only the last component may be empty
//! - wildcard registrations: any component may be empty
//!
//! The strict grammar allows `[0-9a-z_]` in each component, the loose one
//! anything except whitespace, `.` and `#`.

use regex::Regex;

/// Which components of a URI may be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriMode {
    /// Every component must be non-empty.
    DisallowEmpty,
    /// Only the last component may be empty.
    AllowLastEmpty,
    /// Any component may be empty.
    AllowEmpty,
}

impl UriMode {
    /// Pick the grammar matching a `match` register option.
    pub fn for_match_policy(policy: Option<&str>) -> Self {
        match policy {
            Some("prefix") => UriMode::AllowLastEmpty,
            Some("wildcard") => UriMode::AllowEmpty,
            _ => UriMode::DisallowEmpty,
        }
    }
}

/// Compiled URI grammars.
#[derive(Debug, Clone)]
pub struct UriValidator {
    allow_empty: Regex,
    disallow_empty: Regex,
    allow_last_empty: Regex,
}

impl UriValidator {
    /// Validator for the strict grammar (`[0-9a-z_]+` components).
    pub fn strict() -> Self {
        Self::from_patterns(
            r"^(([0-9a-z_]+\.)|\.)*([0-9a-z_]+)?$",
            r"^([0-9a-z_]+\.)*([0-9a-z_]+)$",
            r"^([0-9a-z_]+\.)*([0-9a-z_]*)$",
        )
    }

    /// Validator for the loose grammar.
    pub fn loose() -> Self {
        Self::from_patterns(
            r"^(([^\s\.#]+\.)|\.)*([^\s\.#]+)?$",
            r"^([^\s\.#]+\.)*([^\s\.#]+)$",
            r"^([^\s\.#]+\.)*([^\s\.#]*)$",
        )
    }

    fn from_patterns(allow_empty: &str, disallow_empty: &str, allow_last_empty: &str) -> Self {
        Self {
            allow_empty: Regex::new(allow_empty).expect("valid allow-empty pattern"),
            disallow_empty: Regex::new(disallow_empty).expect("valid disallow-empty pattern"),
            allow_last_empty: Regex::new(allow_last_empty).expect("valid allow-last-empty pattern"),
        }
    }

    /// Check a URI against the grammar for `mode`.
    pub fn is_valid(&self, uri: &str, mode: UriMode) -> bool {
        let pattern = match mode {
            UriMode::AllowEmpty => &self.allow_empty,
            UriMode::DisallowEmpty => &self.disallow_empty,
            UriMode::AllowLastEmpty => &self.allow_last_empty,
        };
        pattern.is_match(uri)
    }
}

impl Default for UriValidator {
    fn default() -> Self {
        Self::strict()
    }
}
