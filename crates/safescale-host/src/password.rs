//! Step 6 of Create: a 16-character password spanning uppercase, lowercase,
//! digit, and symbol classes, unless `SAFESCALE_UNSAFE_PASSWORD` or the
//! request itself already supplies one.

use rand::seq::SliceRandom;
use rand::Rng;

const LENGTH: usize = 16;
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_=+";

/// Resolves the effective host password: the request's own value, then
/// `SAFESCALE_UNSAFE_PASSWORD`, then a freshly generated one.
pub fn resolve(requested: Option<&str>) -> String {
    if let Some(p) = requested {
        return p.to_string();
    }
    if let Ok(p) = std::env::var("SAFESCALE_UNSAFE_PASSWORD") {
        return p;
    }
    generate()
}

/// One character from each of the four classes, the remainder filled from
/// the pooled alphabet, then shuffled so the guaranteed characters aren't
/// always in the same positions.
fn generate() -> String {
    let mut rng = rand::thread_rng();
    let pool: Vec<u8> = [UPPER, LOWER, DIGITS, SYMBOLS].concat();

    let mut chars: Vec<u8> = vec![
        *UPPER.choose(&mut rng).expect("non-empty"),
        *LOWER.choose(&mut rng).expect("non-empty"),
        *DIGITS.choose(&mut rng).expect("non-empty"),
        *SYMBOLS.choose(&mut rng).expect("non-empty"),
    ];
    while chars.len() < LENGTH {
        chars.push(*pool.choose(&mut rng).expect("non-empty"));
    }
    chars.shuffle(&mut rng);
    String::from_utf8(chars).expect("ascii pool")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_password_has_the_right_length_and_classes() {
        let p = generate();
        assert_eq!(p.len(), LENGTH);
        assert!(p.bytes().any(|b| b.is_ascii_uppercase()));
        assert!(p.bytes().any(|b| b.is_ascii_lowercase()));
        assert!(p.bytes().any(|b| b.is_ascii_digit()));
        assert!(p.bytes().any(|b| SYMBOLS.contains(&b)));
    }

    #[test]
    fn requested_password_wins_over_generation() {
        assert_eq!(resolve(Some("hunter2")), "hunter2");
    }

    #[test]
    fn two_generated_passwords_differ() {
        assert_ne!(generate(), generate());
    }
}
