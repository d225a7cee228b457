//! Email and password validation.
//!
//! Password checks run in a fixed order and only the first failure is
//! reported: similarity, length, common list, all digits.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum password length in characters
pub const PASSWORD_LENGTH_MIN: usize = 8;

/// Similarity ratio at which a password is too close to a user attribute
pub const PASSWORD_SIMILARITY_MAX: f64 = 0.7;

pub const MSG_EMAIL_INVALID: &str =
    "Please enter a valid email address with proper domain (e.g., example@gmail.com).";
pub const MSG_PASSWORDS_MISMATCH: &str = "Passwords do not match.";

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .unwrap_or_else(|e| unreachable!("email pattern is valid: {e}"))
});

static NON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\W+").unwrap_or_else(|e| unreachable!("pattern is valid: {e}")));

/// Frequently used passwords rejected outright (compared lowercase).
const COMMON_PASSWORDS: &[&str] = &[
    "123456", "password", "12345678", "qwerty", "123456789", "12345", "1234", "111111",
    "1234567", "dragon", "123123", "baseball", "abc123", "football", "monkey", "letmein",
    "696969", "shadow", "master", "666666", "qwertyuiop", "123321", "mustang", "1234567890",
    "michael", "654321", "pussy", "superman", "1qaz2wsx", "7777777", "121212", "000000",
    "qazwsx", "123qwe", "killer", "trustno1", "jordan", "jennifer", "zxcvbnm", "asdfgh",
    "hunter", "buster", "soccer", "harley", "batman", "andrew", "tigger", "sunshine",
    "iloveyou", "2000", "charlie", "robert", "thomas", "hockey", "ranger", "daniel",
    "starwars", "klaster", "112233", "george", "computer", "michelle", "jessica", "pepper",
    "1111", "zxcvbn", "555555", "11111111", "131313", "freedom", "777777", "pass",
    "maggie", "159753", "aaaaaa", "ginger", "princess", "joshua", "cheese", "amanda",
    "summer", "love", "ashley", "nicole", "chelsea", "biteme", "matthew", "access",
    "yankees", "987654321", "dallas", "austin", "thunder", "taylor", "matrix", "welcome",
    "password1", "password123", "qwerty123", "admin", "admin123", "welcome1", "iloveyou1",
    "passw0rd", "p@ssw0rd", "changeme", "secret", "letmein1", "football1", "monkey123",
    "abcd1234", "qwe123", "1q2w3e4r", "1q2w3e", "zaq12wsx", "asdf1234", "asdfghjkl",
    "00000000", "88888888", "12341234", "11223344", "iloveu", "sunshine1", "princess1",
];

/// `true` if the address matches the pattern and its domain is allowed.
#[must_use]
pub fn is_valid_email(email: &str, allowed_domains: &[String]) -> bool {
    if !is_well_formed_email(email) {
        return false;
    }
    email
        .rsplit_once('@')
        .map(|(_, domain)| {
            let domain = domain.to_lowercase();
            allowed_domains.iter().any(|d| *d == domain)
        })
        .unwrap_or(false)
}

/// Pattern check only, no domain restriction.
#[must_use]
pub fn is_well_formed_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

// =============================================================================
// Password Policy
// =============================================================================

/// User attributes a password must not resemble.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAttributes<'a> {
    pub email: &'a str,
    pub full_name: &'a str,
}

/// First policy violation, if any.
#[must_use]
pub fn password_problem(password: &str, attrs: UserAttributes<'_>) -> Option<String> {
    for (value, label) in [(attrs.email, "email address"), (attrs.full_name, "full name")] {
        if is_too_similar(password, value) {
            return Some(format!("The password is too similar to the {label}."));
        }
    }

    if password.chars().count() < PASSWORD_LENGTH_MIN {
        return Some(format!(
            "This password is too short. It must contain at least {PASSWORD_LENGTH_MIN} characters."
        ));
    }

    let lower = password.trim().to_lowercase();
    if COMMON_PASSWORDS.contains(&lower.as_str()) {
        return Some("This password is too common.".to_string());
    }

    if password.chars().all(|c| c.is_ascii_digit()) {
        return Some("This password is entirely numeric.".to_string());
    }

    None
}

fn is_too_similar(password: &str, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    let password = password.to_lowercase();

    NON_WORD_RE
        .split(value)
        .chain(std::iter::once(value))
        .filter(|part| !part.is_empty())
        .any(|part| {
            let part = part.to_lowercase();
            !exceeds_length_ratio(&password, &part)
                && quick_ratio(&password, &part) >= PASSWORD_SIMILARITY_MAX
        })
}

/// A password far longer than the attribute cannot meaningfully resemble it.
fn exceeds_length_ratio(password: &str, value: &str) -> bool {
    let pwd_len = password.chars().count();
    let value_len = value.chars().count();
    let bound = PASSWORD_SIMILARITY_MAX / 2.0 * pwd_len as f64;
    pwd_len >= 10 * value_len && (value_len as f64) < bound
}

/// Upper bound on sequence similarity: shared characters as a multiset,
/// `2 * matches / (len(a) + len(b))`.
#[must_use]
pub fn quick_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }

    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_insert(0) += 1;
    }

    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(n) = available.get_mut(&c) {
            if *n > 0 {
                *n -= 1;
                matches += 1;
            }
        }
    }

    2.0 * matches as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains() -> Vec<String> {
        vec!["gmail.com".to_string(), "cit.edu".to_string()]
    }

    #[test]
    fn test_email_domains() {
        assert!(is_valid_email("ana.cruz@gmail.com", &domains()));
        assert!(is_valid_email("ana@CIT.edu", &domains()));
        assert!(!is_valid_email("ana@example.com", &domains()));
        assert!(!is_valid_email("not-an-email", &domains()));
        assert!(!is_valid_email("ana@gmail", &domains()));
    }

    #[test]
    fn test_quick_ratio() {
        assert!((quick_ratio("abc", "abc") - 1.0).abs() < f64::EPSILON);
        assert!((quick_ratio("abcd", "wxyz")).abs() < f64::EPSILON);
        assert!((quick_ratio("aab", "abb") - 2.0 * 2.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_password_policy_order() {
        let attrs = UserAttributes {
            email: "mariaclara@gmail.com",
            full_name: "Maria Clara",
        };

        // Similar AND short: similarity wins.
        assert_eq!(
            password_problem("mariacl", attrs).as_deref(),
            Some("The password is too similar to the email address.")
        );
        assert_eq!(
            password_problem("Zx9!q", attrs).as_deref(),
            Some("This password is too short. It must contain at least 8 characters.")
        );
        assert_eq!(
            password_problem("password123", attrs).as_deref(),
            Some("This password is too common.")
        );
        assert_eq!(
            password_problem("90817263545", attrs).as_deref(),
            Some("This password is entirely numeric.")
        );
        assert_eq!(password_problem("Tamaraw-Falls-88", attrs), None);
    }

    #[test]
    fn test_full_name_similarity() {
        let attrs = UserAttributes {
            email: "x@gmail.com",
            full_name: "Jonathan Villanueva",
        };
        assert_eq!(
            password_problem("Villanueva1", attrs).as_deref(),
            Some("The password is too similar to the full name.")
        );
    }
}
