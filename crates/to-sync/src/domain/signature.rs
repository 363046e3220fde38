//! Callback URL signing.
//!
//! A callback URL carries `(async_id, random, sign)` where `sign` is a
//! keyed digest over `async_id + "_" + random + "_" + secret`. Any
//! process holding the secret can verify a callback it did not issue,
//! which is what lets a load balancer route callbacks to an arbitrary
//! member of the fleet.

use md5::Md5;
use rand::Rng;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Built-in signing secret, used when the configuration does not supply
/// one. Deployments that can rotate secrets should prefer
/// `Config::secret`.
pub const DEFAULT_SECRET: &str = "xK4qTbzR8mWcE2nYhV5uJfP9aGdL6sQo";

/// Upper bound (exclusive) of the signature nonce.
const RANDOM_MAX: i64 = 10_000_000;

/// Signs and verifies callback URLs.
#[derive(Debug, Clone)]
pub struct Signer {
    secret: String,
}

impl Signer {
    /// A signer over an explicit secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Sign a correlation ID: pick a nonce, derive the token.
    pub fn sign(&self, async_id: &str) -> (i64, String) {
        let random = rand::thread_rng().gen_range(0..RANDOM_MAX);
        let token = self.sha512_token(async_id, &random.to_string());
        (random, token)
    }

    /// Verify a token against both recognized digests.
    ///
    /// SHA-512 is the emitted digest; MD5 is accepted for senders that
    /// predate the upgrade. Retire the MD5 arm once no such senders
    /// remain. Comparison is constant-time on the uppercase hex forms.
    pub fn verify(&self, async_id: &str, random: &str, token: &str) -> bool {
        let sha512 = self.sha512_token(async_id, random);
        let legacy = self.md5_token(async_id, random);
        constant_time_str_eq(token, &sha512) | constant_time_str_eq(token, &legacy)
    }

    fn payload(&self, async_id: &str, random: &str) -> String {
        format!("{}_{}_{}", async_id, random, self.secret)
    }

    fn sha512_token(&self, async_id: &str, random: &str) -> String {
        hex::encode_upper(Sha512::digest(self.payload(async_id, random)))
    }

    fn md5_token(&self, async_id: &str, random: &str) -> String {
        hex::encode_upper(Md5::digest(self.payload(async_id, random)))
    }
}

impl Default for Signer {
    fn default() -> Self {
        Self::new(DEFAULT_SECRET)
    }
}

/// Constant-time equality over strings of possibly different lengths.
///
/// The length check itself is not secret; the contents comparison is.
fn constant_time_str_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
