//! Primary session endpoints — token handshake, statistics stream and
//! snapshot requests.

pub mod client;
pub mod server;

use rand::Rng;

/// Pick a session token. Never 0, which means "no token" on the wire.
pub fn generate_token(rng: &mut impl Rng) -> u32 {
    rng.gen_range(1..=u32::MAX)
}

/// Tokens in logs, as fixed-width hex.
pub(crate) fn token_hex(token: u32) -> String {
    hex::encode(token.to_be_bytes())
}
