//! Configuration validation.
//!
//! Catches the states that would otherwise surface as confusing runtime
//! failures: a key of the wrong size, an unparsable reachability target,
//! a zero-sized pool.

use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("worker.count must be at least 1")]
    NoWorkers,
    #[error("worker.queue_size must be at least 1")]
    NoQueue,
    #[error("encryption key must be exactly 32 bytes, got {0}")]
    BadEncryptionKey(usize),
    #[error("check_host must be host:port, got {0:?}")]
    BadCheckHost(String),
    #[error("github owner, repo, and ssh key path must be set together")]
    PartialGithub,
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.worker.count == 0 {
        return Err(ValidationError::NoWorkers);
    }
    if config.worker.queue_size == 0 {
        return Err(ValidationError::NoQueue);
    }

    if !config.app.encryption_key.is_empty() && config.app.encryption_key.len() != 32 {
        return Err(ValidationError::BadEncryptionKey(config.app.encryption_key.len()));
    }

    match config.app.check_host.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().map_or(false, |p| p > 0) => {}
        _ => return Err(ValidationError::BadCheckHost(config.app.check_host.clone())),
    }

    if config.github.is_configured()
        && (config.github.owner.is_empty()
            || config.github.repo.is_empty()
            || config.github.ssh_key_path.is_empty())
    {
        return Err(ValidationError::PartialGithub);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert_eq!(validate(&Config::default()), Ok(()));
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = Config::default();
        config.worker.count = 0;
        assert_eq!(validate(&config), Err(ValidationError::NoWorkers));
    }

    #[test]
    fn rejects_short_encryption_key() {
        let mut config = Config::default();
        config.app.encryption_key = "too-short".to_string();
        assert_eq!(validate(&config), Err(ValidationError::BadEncryptionKey(9)));
    }

    #[test]
    fn accepts_exact_key() {
        let mut config = Config::default();
        config.app.encryption_key = "0123456789abcdef0123456789abcdef".to_string();
        assert_eq!(validate(&config), Ok(()));
    }

    #[test]
    fn rejects_malformed_check_host() {
        for bad in ["", "no-port", ":80", "host:0", "host:notaport"] {
            let mut config = Config::default();
            config.app.check_host = bad.to_string();
            assert!(matches!(validate(&config), Err(ValidationError::BadCheckHost(_))), "{bad}");
        }
    }

    #[test]
    fn rejects_partial_github_configuration() {
        let mut config = Config::default();
        config.github.owner = "someone".to_string();
        assert_eq!(validate(&config), Err(ValidationError::PartialGithub));

        config.github.repo = "configs".to_string();
        config.github.ssh_key_path = "/keys/id_ed25519".to_string();
        assert_eq!(validate(&config), Ok(()));
    }
}
