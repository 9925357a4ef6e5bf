//! Environment variable interpolation for config files.
//!
//! Supports the following syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # escaped dollar
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # 1: braced name
            (?:(:?-)([^}]*))?          # 2: default operator, 3: default value
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # 4: bare name
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every problem found, so all missing variables are reported at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| match resolve(caps) {
            Ok(value) => value,
            Err(message) => {
                errors.push(message);
                caps[0].to_string()
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(caps: &Captures) -> Result<String, String> {
    if &caps[0] == "$$" {
        return Ok("$".to_string());
    }

    let name = caps
        .get(1)
        .or_else(|| caps.get(4))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let operator = caps.get(2).map(|m| m.as_str());
    let default = caps.get(3).map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        Ok(value) if value.is_empty() && operator == Some(":-") => {
            Ok(default.unwrap_or_default().to_string())
        }
        Ok(value) => Ok(value),
        Err(_) => default
            .map(str::to_string)
            .ok_or_else(|| format!("environment variable '{name}' is not set")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        // SAFETY: each test uses its own variable names and restores them afterwards
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        let result = f();

        // SAFETY: restoring original environment state
        for (key, original) in originals {
            match original {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    #[test]
    fn test_bare_and_braced_substitution() {
        with_env_vars(
            &[
                ("CHATLAKE_TEST_BUCKET", Some("raw-bucket")),
                ("CHATLAKE_TEST_REGION", Some("sa-east-1")),
            ],
            || {
                let result = interpolate("s3://$CHATLAKE_TEST_BUCKET in ${CHATLAKE_TEST_REGION}");
                assert!(result.is_ok());
                assert_eq!(result.text, "s3://raw-bucket in sa-east-1");
            },
        );
    }

    #[test]
    fn test_all_missing_variables_reported() {
        with_env_vars(
            &[("CHATLAKE_TEST_MISS1", None), ("CHATLAKE_TEST_MISS2", None)],
            || {
                let result = interpolate("a: $CHATLAKE_TEST_MISS1, b: ${CHATLAKE_TEST_MISS2}");
                assert!(!result.is_ok());
                assert_eq!(result.errors.len(), 2);
                assert!(result.errors[0].contains("CHATLAKE_TEST_MISS1"));
                assert!(result.text.contains("$CHATLAKE_TEST_MISS1"));
            },
        );
    }

    #[test]
    fn test_defaults() {
        with_env_vars(
            &[
                ("CHATLAKE_TEST_UNSET", None),
                ("CHATLAKE_TEST_EMPTY", Some("")),
            ],
            || {
                assert_eq!(interpolate("${CHATLAKE_TEST_UNSET:-x}").text, "x");
                assert_eq!(interpolate("${CHATLAKE_TEST_UNSET-x}").text, "x");
                assert_eq!(interpolate("${CHATLAKE_TEST_EMPTY:-x}").text, "x");
                assert_eq!(interpolate("${CHATLAKE_TEST_EMPTY-x}").text, "");
            },
        );
    }

    #[test]
    fn test_empty_default_for_optional_token() {
        with_env_vars(&[("CHATLAKE_TEST_TOKEN", None)], || {
            let result = interpolate("auth_token: ${CHATLAKE_TEST_TOKEN:-}");
            assert!(result.is_ok());
            assert_eq!(result.text, "auth_token: ");
        });
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate("price: $$100");
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $100");
    }

    #[test]
    fn test_newline_injection_blocked() {
        with_env_vars(&[("CHATLAKE_TEST_INJECT", Some("a\nb"))], || {
            let result = interpolate("value: $CHATLAKE_TEST_INJECT");
            assert!(!result.is_ok());
            assert!(result.errors[0].contains("newlines"));
        });
    }
}
