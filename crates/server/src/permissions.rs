use regex::Regex;

use dtail_config::UserPermissions;
use dtail_protocol::error::DtailError;

/// Compiled form of a user's path permission set (spec §4.6 step 3: "the
/// path must match at least one regex in the user's permission set").
pub struct PermissionSet {
    regexes: Vec<Regex>,
}

impl PermissionSet {
    /// Compiles every pattern in `raw`, failing fast on the first invalid one.
    pub fn compile(raw: &UserPermissions) -> Result<Self, DtailError> {
        let regexes = raw
            .path_regexes
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| DtailError::Config(format!("invalid permission regex '{pattern}': {e}")))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { regexes })
    }

    /// An empty permission set that matches nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self { regexes: Vec::new() }
    }

    /// Whether `path` matches at least one configured regex.
    #[must_use]
    pub fn allows(&self, path: &str) -> bool {
        self.regexes.iter().any(|re| re.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_matching_path() {
        let set = PermissionSet::compile(&UserPermissions {
            path_regexes: vec!["^/var/log/.*\\.log$".to_string()],
        })
        .unwrap();
        assert!(set.allows("/var/log/app.log"));
        assert!(!set.allows("/etc/shadow"));
    }

    #[test]
    fn empty_set_denies_everything() {
        let set = PermissionSet::empty();
        assert!(!set.allows("/anything"));
    }

    #[test]
    fn invalid_regex_is_a_config_error() {
        let err = PermissionSet::compile(&UserPermissions {
            path_regexes: vec!["(".to_string()],
        })
        .unwrap_err();
        assert!(matches!(err, DtailError::Config(_)));
    }
}
