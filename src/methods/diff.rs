//! Binary diff/patch: a bsdiff-style patch computed over raw bytes, then
//! deflate-compressed. Applying reverses this.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use super::MethodsError;

pub(crate) const DIFF_METHOD_ID: &str = "zlib.compress . bsdiff";
/// Method identifier for a plain zlib-compressed full payload (no diff).
pub const FULL_COMPRESSED_METHOD_ID: &str = "zlib.compress";

/// Compute the patch that turns `old` into `new`.
pub fn compute_diff(old: &[u8], new: &[u8]) -> Vec<u8> {
    let mut patch = Vec::new();
    qbsdiff::Bsdiff::new(old, new)
        .compare(&mut patch)
        .expect("in-memory bsdiff diff cannot fail");
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&patch)
        .expect("in-memory zlib compression cannot fail");
    encoder.finish().expect("in-memory zlib compression cannot fail")
}

/// Apply a patch produced by [`compute_diff`] against `old`, reproducing
/// `new`.
pub fn apply_patch(old: &[u8], packed_patch: &[u8]) -> Result<Vec<u8>, MethodsError> {
    let mut decoder = ZlibDecoder::new(packed_patch);
    let mut patch = Vec::new();
    decoder
        .read_to_end(&mut patch)
        .map_err(|e| MethodsError::InvalidKeyPrefix(format!("corrupt diff payload: {e}")))?;
    let patcher = qbsdiff::Bspatch::new(&patch)
        .map_err(|e| MethodsError::InvalidKeyPrefix(format!("corrupt bsdiff patch: {e}")))?;
    let mut out = Vec::with_capacity(old.len());
    patcher
        .apply(old, &mut out)
        .map_err(|e| MethodsError::InvalidKeyPrefix(format!("patch application failed: {e}")))?;
    Ok(out)
}
