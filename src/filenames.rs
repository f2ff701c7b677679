//! Filename codec: a bijective mapping between a chunk's logical identity
//! and a filesystem path that sorts correctly and is filterable without
//! opening files.
//!
//! ```text
//! <shard>/<keyhash>/<last>.<span>.<dep_or_0>.<chain>.<keylen>.<enc_key_prefix>.datawatch.json
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::methods::{Codecs, MethodsError};

const FILENAME_SUFFIX: &str = ".datawatch.json";
const MAX_FILENAME_LENGTH: usize = 768;

/// Errors raised while encoding or decoding a chunk filename.
#[derive(Debug, Error)]
pub enum FilenameError {
    /// Wraps a codec-layer error (bad version digits, bad key-prefix blob).
    #[error(transparent)]
    Methods(#[from] MethodsError),
    /// `last_version < first_version`.
    #[error("last version {last} cannot be smaller than first version {first}")]
    LastBeforeFirst {
        /// The `first_version` operand.
        first: String,
        /// The `last_version` operand.
        last: String,
    },
    /// `depends_on_version >= first_version`.
    #[error("dependent version {dep} must be smaller than first version {first}")]
    DependencyNotBeforeFirst {
        /// The dependency version.
        dep: String,
        /// The `first_version` operand.
        first: String,
    },
    /// Chain length/dependency combination is inconsistent.
    #[error("invalid dependency chain length {chain_length} for {kind}", kind = if *has_dependency { "dependent file" } else { "independent file" })]
    InvalidChainLength {
        /// The chain length found.
        chain_length: i64,
        /// Whether a `depends_on_version` was present.
        has_dependency: bool,
    },
    /// No key was supplied when one was required.
    #[error("no key provided")]
    MissingKey,
    /// The encoded filename exceeded the maximum allowed length.
    #[error("encoded filename length {0} exceeds maximum of {MAX_FILENAME_LENGTH}")]
    TooLong(usize),
    /// A filename did not have exactly two `/`-separated components before
    /// the final path segment.
    #[error("invalid number of slashes in filename: {0:?}")]
    BadSlashCount(String),
    /// A filename did not end with `.datawatch.json`.
    #[error("filename does not end with {FILENAME_SUFFIX}: {0:?}")]
    BadSuffix(String),
    /// The final path segment did not have exactly five `.`-separated
    /// metadata fields.
    #[error("invalid number of dots in filename: {0:?}")]
    BadDotCount(String),
    /// A numeric field in the filename could not be parsed.
    #[error("invalid numeric field {field:?} in filename: {value:?}")]
    BadNumericField {
        /// The name of the field that failed to parse.
        field: &'static str,
        /// The raw string that failed to parse.
        value: String,
    },
}

/// The logical identity of a chunk, prior to filename encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// The full, untruncated key.
    pub key: String,
    /// First version contained in the chunk.
    pub first_version: String,
    /// Last version contained in the chunk.
    pub last_version: String,
    /// The external baseline version this chunk's first record depends on,
    /// if any.
    pub depends_on_version: Option<String>,
    /// How many prior flushes this chunk transitively depends on.
    pub dependency_chain_length: i64,
}

/// Everything recoverable from a chunk's filename alone, without opening
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilenameEncodedInfo {
    /// The full key, if the encoded prefix covered the whole key.
    pub maybe_key: Option<String>,
    /// Last version contained in the chunk.
    pub last_version: String,
    /// First version contained in the chunk.
    pub first_version: String,
    /// The external baseline version, if any.
    pub depends_on_version: Option<String>,
    /// How many prior flushes this chunk transitively depends on.
    pub dependency_chain_length: i64,
    /// Hash of the full key.
    pub keyhash: String,
    /// The encoded (compressed + base64) key-prefix blob.
    pub encoded_key_prefix: String,
    /// The decoded key-prefix string.
    pub key_prefix: String,
    /// Length, in characters, of the full key.
    pub key_length: usize,
    /// `last_version - first_version`, as it appears in the filename.
    pub version_span: String,
    /// The version shard directory component.
    pub version_shard: String,
}

fn parse_version(field: &'static str, value: &str) -> Result<i64, FilenameError> {
    value
        .parse::<i64>()
        .map_err(|_| FilenameError::BadNumericField {
            field,
            value: value.to_string(),
        })
}

/// Compute the full [`FilenameEncodedInfo`] for a [`FileInfo`], validating
/// all invariants along the way.
pub fn compute_nameinfo(info: &FileInfo, codecs: &Codecs) -> Result<FilenameEncodedInfo, FilenameError> {
    if info.key.is_empty() {
        return Err(FilenameError::MissingKey);
    }
    let first = parse_version("first_version", &info.first_version)?;
    let last = parse_version("last_version", &info.last_version)?;
    if last < first {
        return Err(FilenameError::LastBeforeFirst {
            first: info.first_version.clone(),
            last: info.last_version.clone(),
        });
    }
    if let Some(dep) = &info.depends_on_version {
        let dep_num = parse_version("depends_on_version", dep)?;
        if dep_num >= first {
            return Err(FilenameError::DependencyNotBeforeFirst {
                dep: dep.clone(),
                first: info.first_version.clone(),
            });
        }
        if info.dependency_chain_length <= 0 {
            return Err(FilenameError::InvalidChainLength {
                chain_length: info.dependency_chain_length,
                has_dependency: true,
            });
        }
    } else if info.dependency_chain_length != 0 {
        return Err(FilenameError::InvalidChainLength {
            chain_length: info.dependency_chain_length,
            has_dependency: false,
        });
    }
    let span = last - first;
    let keyhash = codecs.key_hash(&info.key).digest;
    let version_shard = codecs.version_shard(&info.last_version)?;
    let (encoded_key_prefix, prefix_len) = codecs.encode_key_prefix(&info.key);
    let key_length = info.key.chars().count();
    let key_prefix: String = info.key.chars().take(prefix_len).collect();
    let maybe_key = if prefix_len == key_length {
        Some(info.key.clone())
    } else {
        None
    };
    Ok(FilenameEncodedInfo {
        maybe_key,
        keyhash,
        key_length,
        key_prefix,
        encoded_key_prefix,
        version_span: span.to_string(),
        last_version: info.last_version.clone(),
        first_version: info.first_version.clone(),
        depends_on_version: info.depends_on_version.clone(),
        dependency_chain_length: info.dependency_chain_length,
        version_shard,
    })
}

/// Render a previously validated [`FilenameEncodedInfo`] as a path.
pub fn encode_filename_from_nameinfo(info: &FilenameEncodedInfo) -> Result<String, FilenameError> {
    let externaldep_or_zero = info
        .depends_on_version
        .clone()
        .unwrap_or_else(|| "0".to_string());
    let filename = format!(
        "{shard}/{keyhash}/{last}.{span}.{dep}.{chain}.{keylen}.{prefix}{suffix}",
        shard = info.version_shard,
        keyhash = info.keyhash,
        last = info.last_version,
        span = info.version_span,
        dep = externaldep_or_zero,
        chain = info.dependency_chain_length,
        keylen = info.key_length,
        prefix = info.encoded_key_prefix,
        suffix = FILENAME_SUFFIX,
    );
    if filename.len() > MAX_FILENAME_LENGTH {
        return Err(FilenameError::TooLong(filename.len()));
    }
    Ok(filename)
}

/// Encode a [`FileInfo`] directly into a filename.
pub fn encode_filename(info: &FileInfo, codecs: &Codecs) -> Result<String, FilenameError> {
    let nameinfo = compute_nameinfo(info, codecs)?;
    encode_filename_from_nameinfo(&nameinfo)
}

/// Decode a filename (a storage-relative path) into a
/// [`FilenameEncodedInfo`], the exact inverse of encoding.
pub fn decode_filename(filename: &str, codecs: &Codecs) -> Result<FilenameEncodedInfo, FilenameError> {
    let parts: Vec<&str> = filename.split('/').collect();
    if parts.len() != 3 {
        return Err(FilenameError::BadSlashCount(filename.to_string()));
    }
    let (version_shard, keyhash, rest) = (parts[0], parts[1], parts[2]);
    let rest = rest
        .strip_suffix(FILENAME_SUFFIX)
        .ok_or_else(|| FilenameError::BadSuffix(filename.to_string()))?;
    let fields: Vec<&str> = rest.split('.').collect();
    if fields.len() != 6 {
        return Err(FilenameError::BadDotCount(filename.to_string()));
    }
    let [last_version, version_span, externaldep_or_zero, chainlen, key_length, encoded_key_prefix] =
        [fields[0], fields[1], fields[2], fields[3], fields[4], fields[5]];
    let last = parse_version("last_version", last_version)?;
    let span = parse_version("version_span", version_span)?;
    let first_version = (last - span).to_string();
    let dep_num = parse_version("depends_on_version", externaldep_or_zero)?;
    let chain_length = parse_version("dependency_chain_length", chainlen)?;
    let key_length: usize = key_length
        .parse()
        .map_err(|_| FilenameError::BadNumericField {
            field: "key_length",
            value: key_length.to_string(),
        })?;
    let key_prefix = codecs.decode_key_prefix(encoded_key_prefix)?;
    let maybe_key = if key_length == key_prefix.chars().count() {
        Some(key_prefix.clone())
    } else {
        None
    };
    Ok(FilenameEncodedInfo {
        maybe_key,
        keyhash: keyhash.to_string(),
        key_length,
        key_prefix,
        encoded_key_prefix: encoded_key_prefix.to_string(),
        version_span: version_span.to_string(),
        first_version,
        last_version: last_version.to_string(),
        depends_on_version: if dep_num == 0 {
            None
        } else {
            Some(externaldep_or_zero.to_string())
        },
        dependency_chain_length: chain_length,
        version_shard: version_shard.to_string(),
    })
}
