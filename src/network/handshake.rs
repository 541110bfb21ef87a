//! RFC 6455 opening handshake: `Sec-WebSocket-Accept` computation.
//!
//! No crate in this workspace's dependency stack pulls in `sha1`, so the
//! digest is hand-rolled the same way `edge/wire.rs`'s `crc32_fast` hand-rolls
//! its table — a small, self-contained, pure function with no external crate
//! pulled in just for one primitive. Base64 encoding, unlike SHA-1, already has
//! a teacher dependency (`base64 = "0.22"` in `rust-backend/Cargo.toml`), so it
//! is used here via `Engine::encode` rather than hand-rolled.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value a server must return for a given
/// `Sec-WebSocket-Key`, per RFC 6455 §1.3: base64(SHA1(key || GUID)).
pub fn compute_accept(sec_websocket_key: &str) -> String {
    let mut input = Vec::with_capacity(sec_websocket_key.len() + WS_GUID.len());
    input.extend_from_slice(sec_websocket_key.as_bytes());
    input.extend_from_slice(WS_GUID.as_bytes());
    let digest = sha1(&input);
    BASE64.encode(digest)
}

/// Returns `true` if `accept_header` matches the expected accept value for `key`.
pub fn verify_accept(sec_websocket_key: &str, accept_header: &str) -> bool {
    compute_accept(sec_websocket_key) == accept_header
}

/// Pure SHA-1 (FIPS 180-4) over an arbitrary byte slice.
fn sha1(message: &[u8]) -> [u8; 20] {
    let mut h0: u32 = 0x67452301;
    let mut h1: u32 = 0xEFCDAB89;
    let mut h2: u32 = 0x98BADCFE;
    let mut h3: u32 = 0x10325476;
    let mut h4: u32 = 0xC3D2E1F0;

    let ml = (message.len() as u64) * 8;
    let mut padded = Vec::with_capacity(message.len() + 72);
    padded.extend_from_slice(message);
    padded.push(0x80);
    while padded.len() % 64 != 56 {
        padded.push(0);
    }
    padded.extend_from_slice(&ml.to_be_bytes());

    for chunk in padded.chunks_exact(64) {
        let mut w = [0u32; 80];
        for i in 0..16 {
            w[i] = u32::from_be_bytes([chunk[i * 4], chunk[i * 4 + 1], chunk[i * 4 + 2], chunk[i * 4 + 3]]);
        }
        for i in 16..80 {
            w[i] = (w[i - 3] ^ w[i - 8] ^ w[i - 14] ^ w[i - 16]).rotate_left(1);
        }

        let (mut a, mut b, mut c, mut d, mut e) = (h0, h1, h2, h3, h4);

        for (i, &wi) in w.iter().enumerate() {
            let (f, k) = match i {
                0..=19 => ((b & c) | ((!b) & d), 0x5A827999u32),
                20..=39 => (b ^ c ^ d, 0x6ED9EBA1),
                40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1BBCDC),
                _ => (b ^ c ^ d, 0xCA62C1D6),
            };
            let temp = a
                .rotate_left(5)
                .wrapping_add(f)
                .wrapping_add(e)
                .wrapping_add(k)
                .wrapping_add(wi);
            e = d;
            d = c;
            c = b.rotate_left(30);
            b = a;
            a = temp;
        }

        h0 = h0.wrapping_add(a);
        h1 = h1.wrapping_add(b);
        h2 = h2.wrapping_add(c);
        h3 = h3.wrapping_add(d);
        h4 = h4.wrapping_add(e);
    }

    let mut out = [0u8; 20];
    out[0..4].copy_from_slice(&h0.to_be_bytes());
    out[4..8].copy_from_slice(&h1.to_be_bytes());
    out[8..12].copy_from_slice(&h2.to_be_bytes());
    out[12..16].copy_from_slice(&h3.to_be_bytes());
    out[16..20].copy_from_slice(&h4.to_be_bytes());
    out
}

/// Generates a `Sec-WebSocket-Key` from 16 random bytes, base64-encoded.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    let mut state = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9E3779B97F4A7C15)
        | 1;
    for b in bytes.iter_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *b = (state & 0xFF) as u8;
    }
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e5_zero_key_matches_known_accept() {
        let key = "AAAAAAAAAAAAAAAAAAAAAA==";
        let accept = compute_accept(key);
        assert_eq!(accept, "ICX+Yqv66kxgM0FcWaLWlFLwTAI=");
        assert!(verify_accept(key, &accept));
    }

    #[test]
    fn wrong_accept_is_rejected() {
        let key = "AAAAAAAAAAAAAAAAAAAAAA==";
        assert!(!verify_accept(key, "not-the-right-value"));
    }

    #[test]
    fn sha1_matches_empty_string_vector() {
        // SHA1("") = da39a3ee5e6b4b0d3255bfef95601890afd80709
        let digest = sha1(b"");
        let expected: [u8; 20] = [
            0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60,
            0x18, 0x90, 0xaf, 0xd8, 0x07, 0x09,
        ];
        assert_eq!(digest, expected);
    }

    #[test]
    fn sha1_matches_abc_vector() {
        // SHA1("abc") = a9993e364706816aba3e25717850c26c9cd0d89
        let digest = sha1(b"abc");
        let expected: [u8; 20] = [
            0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78, 0x50,
            0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d,
        ];
        assert_eq!(digest, expected);
    }

    #[test]
    fn generate_key_is_base64_and_varies() {
        let a = generate_key();
        let b = generate_key();
        assert_eq!(a.len(), 24);
        assert!(a.ends_with("=="));
        assert_ne!(a, b);
    }
}
