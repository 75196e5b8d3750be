//! Hashed-address matching
//!
//! Device records only ever hold an argon2id PHC string of the address.
//! Matching re-derives the hash from the raw address, so a stored record
//! never reveals which device it describes.

use crate::address::HardwareAddress;
use crate::config::HashingConfig;
use crate::error::{DomainError, PresenceError, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Version};

/// Hash an address for storage with a fresh random salt
pub fn hash_address(address: &HardwareAddress, config: &HashingConfig) -> Result<String> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, config.params()?);
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(address.as_str().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            PresenceError::Domain(DomainError::Hashing {
                reason: e.to_string(),
            })
        })
}

/// True when `hashed` was produced from `address`.
///
/// A malformed hash is a non-match. Cost parameters come from the PHC
/// string itself.
pub fn matches(address: &HardwareAddress, hashed: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hashed) else {
        return false;
    };
    Argon2::default()
        .verify_password(address.as_str().as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::parse_address;

    fn addr(s: &str) -> HardwareAddress {
        parse_address(s).unwrap()
    }

    #[test]
    fn test_hash_then_match() {
        let a = addr("AA:AA:AA:AA:AA:AA");
        let hashed = hash_address(&a, &HashingConfig::minimal()).unwrap();

        assert!(!hashed.contains(a.as_str()));
        assert!(matches(&a, &hashed));
        assert!(!matches(&addr("BB:BB:BB:BB:BB:BB"), &hashed));
    }

    #[test]
    fn test_salted() {
        let a = addr("AA:AA:AA:AA:AA:AA");
        let first = hash_address(&a, &HashingConfig::minimal()).unwrap();
        let second = hash_address(&a, &HashingConfig::minimal()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_malformed_hash_is_non_match() {
        let a = addr("AA:AA:AA:AA:AA:AA");
        assert!(!matches(&a, ""));
        assert!(!matches(&a, "aa:aa:aa:aa:aa:aa"));
        assert!(!matches(&a, "$argon2id$v=19$broken"));
    }

    #[test]
    fn test_verifies_hash_made_with_other_cost() {
        let a = addr("AA:AA:AA:AA:AA:AA");
        let cheap = hash_address(&a, &HashingConfig::minimal()).unwrap();
        let mut heavier = HashingConfig::minimal();
        heavier.iterations = 3;
        let costly = hash_address(&a, &heavier).unwrap();

        assert!(matches(&a, &cheap));
        assert!(matches(&a, &costly));
    }
}
