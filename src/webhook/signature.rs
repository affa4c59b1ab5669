/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Webhook body signing using HMAC-SHA256.
//!
//! The dispatcher signs the raw request body with a shared secret and sends
//! the hex digest in the `x-body-signature` header. Verification happens
//! before any parsing; the comparison is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-body-signature";

/// Computes the hex HMAC-SHA256 signature of a body.
///
/// Used by outbound dispatchers and by tests generating expected headers.
pub fn compute_signature(body: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a hex signature against the body and secret.
///
/// Returns `false` for malformed hex; never panics. The underlying
/// comparison is constant-time.
pub fn verify_signature(body: &[u8], signature_hex: &str, secret: &[u8]) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let body = br#"{"t":true,"b":{}}"#;
        let secret = b"shared-secret";
        let header = compute_signature(body, secret);
        assert!(verify_signature(body, &header, secret));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let header = compute_signature(body, b"right");
        assert!(!verify_signature(body, &header, b"wrong"));
    }

    #[test]
    fn modified_body_fails() {
        let header = compute_signature(b"original", b"secret");
        assert!(!verify_signature(b"tampered", &header, b"secret"));
    }

    #[test]
    fn malformed_hex_fails_without_panicking() {
        assert!(!verify_signature(b"body", "", b"secret"));
        assert!(!verify_signature(b"body", "zzzz", b"secret"));
        assert!(!verify_signature(b"body", "abc", b"secret")); // odd length
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        let header = compute_signature(b"body", b"secret");
        assert!(verify_signature(b"body", &format!(" {header}\n"), b"secret"));
    }

    proptest! {
        /// verify(body, sign(body, secret), secret) holds for any inputs.
        #[test]
        fn prop_sign_verify_roundtrip(body: Vec<u8>, secret: Vec<u8>) {
            let header = compute_signature(&body, &secret);
            prop_assert!(verify_signature(&body, &header, &secret));
        }

        /// Signing with one secret never verifies under a different one.
        #[test]
        fn prop_wrong_secret_fails(body: Vec<u8>, secret1: Vec<u8>, secret2: Vec<u8>) {
            prop_assume!(secret1 != secret2);
            let header = compute_signature(&body, &secret1);
            prop_assert!(!verify_signature(&body, &header, &secret2));
        }

        /// Arbitrary header strings never cause a panic.
        #[test]
        fn prop_malformed_headers_never_panic(body: Vec<u8>, header: String, secret: Vec<u8>) {
            let _ = verify_signature(&body, &header, &secret);
        }
    }
}
