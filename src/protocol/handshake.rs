//! Challenge/response authentication.
//!
//! The server issues a random 64-bit challenge to every new connection and
//! keeps the SHA-256 digest of its little-endian bytes. The client must echo
//! that digest back along with its declared identity. There is no retry: a
//! wrong answer ends the connection.
//!
//! ```text
//! Server                                    Client
//!   | -- ConnectionChallenge{challenge} -----> |
//!   | <-- ChallengeAnswer{sha256, name, rgba} - |
//!   | -- ServerUpdate::Authenticated --------> |
//! ```
//!
//! The handshake has no timeout of its own. A connection that never answers
//! stays pending until the transport disconnects it.

use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::core::packet::CHALLENGE_HASH_LEN;
use crate::protocol::roster::ClientId;

/// Digest a client must return
pub type ChallengeHash = [u8; CHALLENGE_HASH_LEN];

/// Outstanding challenge for one pending connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChallenge {
    pub challenge: u64,
    pub expected: ChallengeHash,
}

/// Generate a random challenge value
fn generate_challenge() -> u64 {
    rand::random::<u64>()
}

/// Compute the expected answer for a challenge
pub fn hash_challenge(challenge: u64) -> ChallengeHash {
    let mut hasher = Sha256::new();
    hasher.update(challenge.to_le_bytes());
    hasher.finalize().into()
}

/// Issue a fresh challenge for `client_id`.
#[instrument(level = "debug")]
pub fn issue_challenge(client_id: ClientId) -> PendingChallenge {
    let challenge = generate_challenge();
    debug!("Issuing connection challenge");
    PendingChallenge {
        challenge,
        expected: hash_challenge(challenge),
    }
}

/// Build the client's answer to a received challenge.
#[instrument(level = "debug", skip(challenge))]
pub fn answer_challenge(challenge: u64) -> ChallengeHash {
    hash_challenge(challenge)
}

/// Compare an answer with the stored digest, byte for byte.
///
/// Every byte is inspected regardless of where the first mismatch is.
#[instrument(level = "debug", skip(pending, answer))]
pub fn verify_answer(client_id: ClientId, pending: &PendingChallenge, answer: &ChallengeHash) -> bool {
    let diff = pending
        .expected
        .iter()
        .zip(answer.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));

    if diff != 0 {
        warn!("Challenge answer mismatch");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_sha256_of_le_bytes() {
        let expected: ChallengeHash = Sha256::digest(1u64.to_le_bytes()).into();
        assert_eq!(hash_challenge(1), expected);
        assert_ne!(hash_challenge(1), hash_challenge(2));
    }

    #[test]
    fn test_verify_roundtrip() {
        let pending = issue_challenge(3);
        let answer = answer_challenge(pending.challenge);
        assert!(verify_answer(3, &pending, &answer));
    }

    #[test]
    fn test_verify_rejects_single_bit_flip() {
        let pending = issue_challenge(3);
        let mut answer = answer_challenge(pending.challenge);
        answer[31] ^= 1;
        assert!(!verify_answer(3, &pending, &answer));
    }

    #[test]
    fn test_challenges_differ() {
        // 2^-64 chance of a false failure
        assert_ne!(issue_challenge(1).challenge, issue_challenge(1).challenge);
    }
}
