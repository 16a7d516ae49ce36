//! Deterministic password derivation.
//!
//! Maps a plaintext password to the stored credential string
//! `L<salt>A<prefix>P<primary>Y<suffix>X`, where every segment is derived
//! from SHA-512 digests of the password. The scheme is reproduced bit-exact
//! for compatibility with credentials already in the store, including two
//! oddities that must not be "fixed":
//!
//! - the checksum folded into the second digest sums the *positions* of the
//!   digit characters, not their values (step 3 below);
//! - the digit characters are hashed in their comma-joined listing form,
//!   not as a contiguous string (step 6 below).
//!
//! Known weakness: the derivation is unsalted and fully deterministic, so
//! identical passwords produce identical stored values. Changing that would
//! change the stored-value format and invalidate every existing account, so
//! it is documented here instead of repaired.

use sha2::{Digest, Sha512};

/// Hex-encoded SHA-512 of arbitrary bytes (128 lowercase hex characters).
fn sha512_hex(input: &[u8]) -> String {
    hex::encode(Sha512::digest(input))
}

/// Derive the stored credential for a plaintext password.
///
/// Total over any input, including the empty string, and free of external
/// randomness: `derive_credential(p)` is the same on every call.
#[must_use]
pub fn derive_credential(password: &str) -> String {
    // 1. Primary digest of the raw password bytes.
    let primary = sha512_hex(password.as_bytes());

    // 2. Keep only the decimal digit characters, order preserved.
    let digits: String = primary.chars().filter(|c| c.is_ascii_digit()).collect();

    // 3. Sum of the loop indices, not the digit values. Kept as observed.
    let index_sum: usize = (0..digits.len()).sum();

    // 4. Second digest over the decimal sum followed by the primary digest.
    let secondary = sha512_hex(format!("{index_sum}{primary}").as_bytes());

    // 5. Split the second digest at the ceiling midpoint.
    let mid = secondary.len().div_ceil(2);
    let (prefix, suffix) = secondary.split_at(mid);

    // 6. Salt digest over the prefix and the comma-joined digit listing.
    let listing = digits
        .chars()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let salt = sha512_hex(format!("{prefix}{listing}").as_bytes());

    // 7. Assemble the delimited credential string.
    format!("L{salt}A{prefix}P{primary}Y{suffix}X")
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn derive_is_deterministic() {
        let first = derive_credential("hunter2");
        let second = derive_credential("hunter2");
        assert_eq!(first, second);
    }

    #[test]
    fn derive_matches_credential_pattern() {
        let credential = derive_credential("hunter2");
        let pattern = Regex::new(r"^L[0-9a-f]+A[0-9a-f]+P[0-9a-f]+Y[0-9a-f]+X$")
            .expect("valid pattern");
        assert!(
            pattern.is_match(&credential),
            "credential not well-formed: {credential}"
        );
    }

    #[test]
    fn derive_has_fixed_segment_lengths() {
        // SHA-512 hex is 128 chars, so salt/primary are 128 and the split
        // second digest contributes 64 + 64 regardless of the password.
        // Five delimiter bytes: L, A, P, Y, X.
        for password in ["", "a", "hunter2", "correct horse battery staple"] {
            let credential = derive_credential(password);
            assert_eq!(credential.len(), 5 + 128 + 64 + 128 + 64);
            assert!(credential.starts_with('L'));
            assert_eq!(credential.as_bytes()[1 + 128], b'A');
            assert_eq!(credential.as_bytes()[1 + 128 + 1 + 64], b'P');
            assert_eq!(credential.as_bytes()[1 + 128 + 1 + 64 + 1 + 128], b'Y');
            assert!(credential.ends_with('X'));
        }
    }

    #[test]
    fn derive_distinguishes_passwords() {
        assert_ne!(derive_credential("hunter2"), derive_credential("hunter3"));
        assert_ne!(derive_credential(""), derive_credential(" "));
    }

    #[test]
    fn derive_handles_empty_password() {
        let credential = derive_credential("");
        assert!(credential.starts_with('L'));
        assert!(credential.ends_with('X'));
    }

    #[test]
    fn derive_embeds_primary_digest() {
        // The P segment is the plain SHA-512 of the password; pin it for one
        // known input so accidental algorithm changes show up loudly.
        let credential = derive_credential("hunter2");
        let primary = sha512_hex(b"hunter2");
        assert!(credential.contains(&format!("P{primary}Y")));
    }

    #[test]
    fn index_sum_uses_positions_not_values() {
        // Pinned output for one known input. The checksum folded into the
        // second digest is the sum of positions, n(n-1)/2, not of the digit
        // values; summing values instead would change the A and Y segments
        // and break this constant.
        assert_eq!(
            derive_credential("hunter2"),
            "L7b12304fcf381f2216aa8120498805e8a1d49549e9f5adbc1203d6e29ecfe282\
             cbb249c16c829362ff413036e44139f7ede2f091149a6487a641ddf67a047cb3\
             Af152ec408834cdaad8bb9c2de73ec5833884d1d6425f7980afe0a2f6a57e10c2\
             P6b97ed68d14eb3f1aa959ce5d49c7dc612e1eb1dafd73b1e705847483fd6a6c8\
             09f2ceb4e8df6ff9984c6298ff0285cace6614bf8daa9f0070101b6c89899e22\
             Yb211caed02c623e25ce754b25474a7209b8ce464418201ba01b732879f326e8fX"
        );
    }
}
