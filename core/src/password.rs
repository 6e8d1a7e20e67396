use serde::Serialize;

use crate::error::SetupError;

/// Punctuation accepted by the special-character rule.
pub const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?";

/// Minimum accepted password length.
pub const MIN_LENGTH: usize = 8;

/// Length at which the opportunistic pre-submit write fires. Deliberately
/// looser than full validity: the point is to land a write early, not to
/// accept the password.
pub const PRIME_MIN_LENGTH: usize = 6;

/// Per-rule result of checking a candidate password. The five rules are
/// independent and rendered individually; acceptance is their AND. There is
/// no scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PasswordReport {
    pub min_length: bool,
    pub uppercase: bool,
    pub lowercase: bool,
    pub digit: bool,
    pub special: bool,
}

impl PasswordReport {
    pub fn is_valid(&self) -> bool {
        self.min_length && self.uppercase && self.lowercase && self.digit && self.special
    }

    pub fn failed_rules(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if !self.min_length {
            failed.push("at least 8 characters");
        }
        if !self.uppercase {
            failed.push("an uppercase letter");
        }
        if !self.lowercase {
            failed.push("a lowercase letter");
        }
        if !self.digit {
            failed.push("a digit");
        }
        if !self.special {
            failed.push("a special character");
        }
        failed
    }
}

pub fn check_password(candidate: &str) -> PasswordReport {
    PasswordReport {
        min_length: candidate.chars().count() >= MIN_LENGTH,
        uppercase: candidate.chars().any(|c| c.is_ascii_uppercase()),
        lowercase: candidate.chars().any(|c| c.is_ascii_lowercase()),
        digit: candidate.chars().any(|c| c.is_ascii_digit()),
        special: candidate.chars().any(|c| SPECIAL_CHARS.contains(c)),
    }
}

/// Gate for final submission: all five rules plus a matching confirmation.
pub fn validate_submission(candidate: &str, confirmation: &str) -> Result<(), SetupError> {
    let report = check_password(candidate);
    if !report.is_valid() {
        return Err(SetupError::Validation(format!(
            "password must contain {}",
            report.failed_rules().join(", ")
        )));
    }
    if candidate != confirmation {
        return Err(SetupError::Validation(
            "password confirmation does not match".into(),
        ));
    }
    Ok(())
}

/// True once a candidate is long enough for the opportunistic pre-submit
/// write. Not a validity check.
pub fn ready_to_prime(candidate: &str) -> bool {
    candidate.chars().count() >= PRIME_MIN_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_when_all_five_rules_hold() {
        assert!(check_password("Str0ng!pw").is_valid());
        assert!(!check_password("str0ng!pw").is_valid()); // no uppercase
        assert!(!check_password("STR0NG!PW").is_valid()); // no lowercase
        assert!(!check_password("Strong!pw").is_valid()); // no digit
        assert!(!check_password("Str0ngpwd").is_valid()); // no special
    }

    #[test]
    fn short_passwords_never_pass_regardless_of_composition() {
        // All four composition rules hold, length does not.
        let report = check_password("Aa1!x");
        assert!(report.uppercase && report.lowercase && report.digit && report.special);
        assert!(!report.min_length);
        assert!(!report.is_valid());
    }

    #[test]
    fn rules_are_reported_individually() {
        let report = check_password("alllowercase");
        assert!(report.lowercase);
        assert!(!report.uppercase);
        assert!(!report.digit);
        assert!(!report.special);
        assert_eq!(report.failed_rules().len(), 3);
    }

    #[test]
    fn submission_requires_matching_confirmation() {
        assert!(validate_submission("Str0ng!pw", "Str0ng!pw").is_ok());
        let err = validate_submission("Str0ng!pw", "Str0ng!pw2").unwrap_err();
        assert!(err.to_string().contains("confirmation"));
    }

    #[test]
    fn prime_threshold_is_looser_than_validity() {
        assert!(ready_to_prime("abcdef")); // six characters, nowhere near valid
        assert!(!ready_to_prime("abcde"));
    }
}
