use rand::{Rng, thread_rng};

use crate::registry::{SessionId, SessionRegistry};

const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const TOKEN_LEN: usize = 12;

pub fn make_token(len: usize) -> String {
    let mut rng = thread_rng();

    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// A session id not currently present in `registry`. After repeated
/// collisions the token grows by one character.
pub fn unique_session_id(registry: &SessionRegistry, len: usize) -> SessionId {
    for _ in 0..16 {
        let id = SessionId::from(make_token(len));

        if !registry.contains(&id) {
            return id;
        }
    }

    SessionId::from(make_token(len + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_uses_alphabet() {
        let token = make_token(TOKEN_LEN);
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(make_token(TOKEN_LEN), make_token(TOKEN_LEN));
    }

    #[test]
    fn unique_id_on_empty_registry() {
        let registry = SessionRegistry::default();
        let id = unique_session_id(&registry, TOKEN_LEN);
        assert_eq!(id.as_str().len(), TOKEN_LEN);
    }
}
