//! Luhn checksum validation for order numbers.

/// Returns true when `number` is a non-empty decimal digit string whose
/// Luhn checksum is zero modulo 10.
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let mut sum = 0u32;
    for (i, b) in number.bytes().rev().enumerate() {
        let mut digit = u32::from(b - b'0');
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}

/// Computes the check digit that makes `payload * 10 + digit` Luhn-valid.
pub fn check_digit(payload: u64) -> u32 {
    let mut sum = 0u32;
    let mut rest = payload;
    let mut i = 0;

    while rest > 0 {
        let mut digit = (rest % 10) as u32;
        // Rightmost payload digit sits next to the check digit, so it doubles.
        if i % 2 == 0 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
        rest /= 10;
        i += 1;
    }

    (10 - sum % 10) % 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[test]
    fn accepts_known_valid_numbers() {
        assert!(is_valid("12345678903"));
        assert!(is_valid("79927398713"));
        assert!(is_valid("4561261212345467"));
        assert!(is_valid("0"));
    }

    #[test]
    fn rejects_invalid_numbers() {
        assert!(!is_valid("12345678900"));
        assert!(!is_valid("79927398710"));
        assert!(!is_valid(""));
        assert!(!is_valid("1234abcd"));
        assert!(!is_valid("12 34"));
        assert!(!is_valid("-12345678903"));
    }

    #[test]
    fn check_digit_for_known_payloads() {
        assert_eq!(check_digit(1234567890), 3);
        assert_eq!(check_digit(7992739871), 3);
        assert_eq!(check_digit(0), 0);
    }

    #[quickcheck]
    fn appending_check_digit_yields_valid_number(payload: u64) -> TestResult {
        if payload > u64::MAX / 10 - 9 {
            return TestResult::discard();
        }
        let digit = check_digit(payload) as u64;
        let full = payload * 10 + digit;
        TestResult::from_bool(is_valid(&full.to_string()))
    }
}
