//! Version sharding: the first 5 decimal digits of a version, right-padded
//! with `'0'`, used as a top-level directory for locality.

use super::MethodsError;

pub(super) const VERSION_SHARDING_METHOD_ID: &str = "5digits-zero";

const SHARD_DIGITS: usize = 5;

/// Compute the version shard for `version`, a decimal-digit string.
pub fn compute_version_shard(version: &str) -> Result<String, MethodsError> {
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MethodsError::NonDecimalVersion(version.to_string()));
    }
    let prefix_len = SHARD_DIGITS.min(version.len());
    let mut shard = String::with_capacity(version.len());
    shard.push_str(&version[..prefix_len]);
    for _ in prefix_len..version.len() {
        shard.push('0');
    }
    debug_assert_eq!(shard.len(), version.len());
    Ok(shard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_long_version() {
        assert_eq!(
            compute_version_shard("123456789123456789").unwrap(),
            "123450000000000000"
        );
    }

    #[test]
    fn shards_short_version_unchanged() {
        assert_eq!(compute_version_shard("12").unwrap(), "12");
    }

    #[test]
    fn rejects_non_decimal() {
        assert!(compute_version_shard("12a45").is_err());
    }
}
