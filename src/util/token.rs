//! Generation of the shared JavaScript namespace token.

/// Generates a random opaque hex token used to name-space injected DOM state
/// so concurrent audits running in different browsers do not collide.
///
/// Generated once at cluster construction and shared read-only with every
/// worker for the cluster's lifetime.
#[must_use]
pub fn js_token() -> String {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).expect("OS entropy source unavailable");
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_well_formed() {
        let a = js_token();
        let b = js_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
