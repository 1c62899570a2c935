use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 8;

/// Session token: SHA-256 over the login, user agent, client IP and a fresh salt,
/// encoded as unpadded URL-safe base64 so it can travel in a cookie as is.
pub(crate) fn generate(user: &str, agent: &str, remote_ip: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update(agent.as_bytes());
    hasher.update(remote_ip.as_bytes());
    hasher.update(salt);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_cookie_safe() {
        let token = generate("ada", "curl/8", "10.0.0.1");
        // 32 digest bytes in unpadded base64
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn salt_makes_tokens_unique() {
        let a = generate("ada", "curl/8", "10.0.0.1");
        let b = generate("ada", "curl/8", "10.0.0.1");
        assert_ne!(a, b);
    }
}
