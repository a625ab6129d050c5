//! Sealed values.
//!
//! Anything the server hands to the browser or writes to the database that
//! must stay confidential (the login-state cookie, the OAuth token blob of a
//! session) is sealed as a [PASETO v4.local] token: a JSON claims set,
//! encrypted with XChaCha20 and authenticated with keyed BLAKE2b.
//!
//! [PASETO v4.local]: https://github.com/paseto-standard/paseto-spec/blob/master/docs/01-Protocol-Versions/Version4.md

pub mod claims;
pub mod local;

pub use claims::{Claims, ClaimsValidator};
pub use local::{SealError, SealKey};

/// Pre-authentication encoding (PAE) of a list of byte strings, as used for
/// the MAC input of a token.
pub(crate) fn pre_auth_encode(pieces: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + pieces.iter().map(|p| p.len() + 8).sum::<usize>());

    out.extend_from_slice(&le64(pieces.len() as u64));
    for piece in pieces {
        out.extend_from_slice(&le64(piece.len() as u64));
        out.extend_from_slice(piece);
    }

    out
}

fn le64(n: u64) -> [u8; 8] {
    // the most significant bit must be cleared
    (n & (u64::MAX >> 1)).to_le_bytes()
}
