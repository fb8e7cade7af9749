//! SHA-256 helpers used to verify fetched source files

use crate::error::{CommonError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

/// Hex SHA-256 digest of a file on disk
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file)
}

/// Hex SHA-256 digest of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Check that `expected` looks like a SHA-256 hex digest
pub fn validate_hex_digest(expected: &str) -> Result<()> {
    let well_formed =
        expected.len() == SHA256_HEX_LEN && expected.chars().all(|c| c.is_ascii_hexdigit());

    if well_formed {
        Ok(())
    } else {
        Err(CommonError::InvalidChecksum(expected.to_string()))
    }
}

/// Verify a file against an expected hex digest (case-insensitive)
pub fn verify_file_checksum(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    validate_hex_digest(expected)?;

    let actual = compute_file_checksum(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch {
            expected: expected.to_lowercase(),
            actual,
        })
    }
}
