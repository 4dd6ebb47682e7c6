//! Argon2id key derivation for vault passphrases.
//!
//! Vault parameters:
//! - Memory cost: 128 MiB (131,072 KiB)
//! - Time cost: 2 iterations
//! - Parallelism: 1 lane
//! - Output length: 32 bytes
//! - Salt length: 16 bytes

use crate::crypto::{CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 16;

/// Upper bounds for parameters read from an envelope: 1 GiB, 16 passes, 16 lanes.
pub const MAX_MEM_COST: u32 = 1 << 20;
pub const MAX_TIME_COST: u32 = 16;
pub const MAX_PARALLELISM: u32 = 16;

/// Cost parameters for Argon2id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub mem_cost: u32,

    /// Time cost (number of iterations)
    pub time_cost: u32,

    /// Parallelism (number of lanes)
    pub parallelism: u32,

    /// Output length in bytes
    pub output_length: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost: 131_072,
            time_cost: 2,
            parallelism: 1,
            output_length: 32,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Never used to seal a real envelope.
    #[cfg(test)]
    pub fn insecure_for_tests() -> Self {
        Self {
            mem_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            output_length: 32,
        }
    }

    /// Reject parameter sets argon2 would refuse or that cannot yield an AES-256 key.
    pub fn validate(&self) -> Result<()> {
        if self.time_cost < 1 {
            return Err(CryptoError::KdfFailed(
                "Time cost too low (minimum: 1)".to_string(),
            ));
        }
        if self.parallelism < 1 {
            return Err(CryptoError::KdfFailed(
                "Parallelism too low (minimum: 1)".to_string(),
            ));
        }
        if self.time_cost > MAX_TIME_COST {
            return Err(CryptoError::KdfFailed(format!(
                "Time cost too high (maximum: {})",
                MAX_TIME_COST
            )));
        }
        if self.parallelism > MAX_PARALLELISM {
            return Err(CryptoError::KdfFailed(format!(
                "Parallelism too high (maximum: {})",
                MAX_PARALLELISM
            )));
        }
        if self.mem_cost > MAX_MEM_COST {
            return Err(CryptoError::KdfFailed(format!(
                "Memory cost too high (maximum: {} KiB)",
                MAX_MEM_COST
            )));
        }
        if self.mem_cost < 8 * self.parallelism {
            return Err(CryptoError::KdfFailed(format!(
                "Memory cost too low (minimum: {} KiB)",
                8 * self.parallelism
            )));
        }
        if self.output_length != 32 {
            return Err(CryptoError::KdfFailed(format!(
                "Output length must be 32 bytes, got {}",
                self.output_length
            )));
        }
        Ok(())
    }
}

/// Derive a 32-byte key from `password` and `salt` with Argon2id v1.3.
pub fn derive_key(password: &[u8], salt: &[u8], params: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    params.validate()?;

    let params_obj = Params::new(
        params.mem_cost,
        params.time_cost,
        params.parallelism,
        Some(params.output_length as usize),
    )
    .map_err(|e| CryptoError::KdfFailed(format!("Invalid parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params_obj);

    let mut out = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, &mut out[..])
        .map_err(|e| CryptoError::KdfFailed(format!("Hashing failed: {}", e)))?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_params_default() {
        let params = KdfParams::default();
        assert_eq!(params.mem_cost, 131_072);
        assert_eq!(params.time_cost, 2);
        assert_eq!(params.parallelism, 1);
        assert_eq!(params.output_length, 32);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_kdf_params_validation() {
        let mut params = KdfParams::insecure_for_tests();
        params.time_cost = 0;
        assert!(params.validate().is_err());

        params.time_cost = 1;
        params.parallelism = 0;
        assert!(params.validate().is_err());

        params.parallelism = 1;
        params.output_length = 16;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_kdf_params_upper_bounds() {
        let mut params = KdfParams::default();
        params.mem_cost = MAX_MEM_COST;
        params.time_cost = MAX_TIME_COST;
        assert!(params.validate().is_ok());

        params.mem_cost = u32::MAX;
        assert!(params.validate().is_err());

        params.mem_cost = MAX_MEM_COST;
        params.time_cost = MAX_TIME_COST + 1;
        assert!(params.validate().is_err());

        params.time_cost = 2;
        params.parallelism = MAX_PARALLELISM + 1;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_derive_is_deterministic() {
        let params = KdfParams::insecure_for_tests();
        let salt = [3u8; SALT_LEN];

        let k1 = derive_key(b"correct horse", &salt, &params).unwrap();
        let k2 = derive_key(b"correct horse", &salt, &params).unwrap();
        assert_eq!(*k1, *k2);

        let k3 = derive_key(b"battery staple", &salt, &params).unwrap();
        assert_ne!(*k1, *k3);

        let k4 = derive_key(b"correct horse", &[4u8; SALT_LEN], &params).unwrap();
        assert_ne!(*k1, *k4);
    }
}
