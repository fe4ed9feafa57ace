//! Secret resolution.
//!
//! Secrets live in the OS keychain under service `companionbot` (managed by
//! the setup wizard, an external collaborator); this module implements the
//! documented fallback of environment variables named after the key with
//! uppercasing and hyphens mapped to underscores.

/// Known secret keys.
pub const TELEGRAM_TOKEN: &str = "telegram-token";
pub const ANTHROPIC_API_KEY: &str = "anthropic-api-key";
pub const OPENWEATHERMAP_API_KEY: &str = "openweathermap-api-key";
pub const BRAVE_API_KEY: &str = "brave-api-key";

/// Environment variable name for a secret key: `brave-api-key` → `BRAVE_API_KEY`.
pub fn env_var_name(key: &str) -> String {
    key.to_uppercase().replace('-', "_")
}

/// Resolve a secret from the environment fallback. Empty values count as absent.
pub fn get(key: &str) -> Option<String> {
    std::env::var(env_var_name(key))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_name_mapping() {
        assert_eq!(env_var_name("anthropic-api-key"), "ANTHROPIC_API_KEY");
        assert_eq!(env_var_name("telegram-token"), "TELEGRAM_TOKEN");
    }

    #[test]
    fn test_get_reads_env() {
        std::env::set_var("COMPANIONBOT_TEST_SECRET", "s3cret");
        assert_eq!(
            get("companionbot-test-secret").as_deref(),
            Some("s3cret")
        );
        std::env::remove_var("COMPANIONBOT_TEST_SECRET");
    }

    #[test]
    fn test_empty_value_is_absent() {
        std::env::set_var("COMPANIONBOT_EMPTY_SECRET", "  ");
        assert_eq!(get("companionbot-empty-secret"), None);
        std::env::remove_var("COMPANIONBOT_EMPTY_SECRET");
    }
}
