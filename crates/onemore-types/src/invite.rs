use rand::Rng;

/// Symbols used in invite codes. 0/O and 1/I are left out so codes can be
/// read aloud and typed without confusion.
pub const INVITE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const INVITE_CODE_LEN: usize = 8;

/// App URL scheme used for invite links when no web domain is configured.
pub const APP_SCHEME: &str = "onemore";

/// Random 8-character invite code. Uniqueness is not checked.
pub fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.random_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

pub fn is_well_formed_invite_code(code: &str) -> bool {
    code.len() == INVITE_CODE_LEN && code.bytes().all(|b| INVITE_ALPHABET.contains(&b))
}

/// Shareable link for joining a session.
///
/// With a link domain (bare or with scheme) the link points at
/// `https://<domain>/join/<code>`; otherwise it uses the app scheme.
pub fn invite_link(code: &str, link_domain: Option<&str>) -> String {
    match link_domain.map(str::trim).filter(|d| !d.is_empty()) {
        Some(domain) => {
            let base = if domain.starts_with("http") {
                domain.to_string()
            } else {
                format!("https://{}", domain)
            };
            format!("{}/join/{}", base.trim_end_matches('/'), code)
        }
        None => format!("{}://join/{}", APP_SCHEME, code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_well_formed() {
        for _ in 0..500 {
            let code = generate_invite_code();
            assert_eq!(code.len(), INVITE_CODE_LEN);
            assert!(is_well_formed_invite_code(&code), "bad code {}", code);
        }
    }

    #[test]
    fn alphabet_excludes_ambiguous_symbols() {
        for c in [b'0', b'O', b'1', b'I'] {
            assert!(!INVITE_ALPHABET.contains(&c));
        }
        assert!(!is_well_formed_invite_code("ABCDEFG0"));
        assert!(!is_well_formed_invite_code("abcdefgh"));
        assert!(!is_well_formed_invite_code("ABCDEFG"));
    }

    #[test]
    fn links() {
        assert_eq!(invite_link("ABCD2345", None), "onemore://join/ABCD2345");
        assert_eq!(
            invite_link("ABCD2345", Some("links.example.com")),
            "https://links.example.com/join/ABCD2345"
        );
        assert_eq!(
            invite_link("ABCD2345", Some("https://links.example.com/")),
            "https://links.example.com/join/ABCD2345"
        );
        assert_eq!(invite_link("ABCD2345", Some("  ")), "onemore://join/ABCD2345");
    }
}
