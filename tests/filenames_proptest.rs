//! Property-based coverage for the filename codec: any key and version
//! pair that passes validation must survive an encode/decode round trip
//! with every field recoverable from the path alone.

use proptest::prelude::*;

use datawatch::filenames::{compute_nameinfo, decode_filename, encode_filename_from_nameinfo, FileInfo};
use datawatch::methods::Codecs;

fn arb_key() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9:/._-]{1,120}"
}

fn arb_version_pair() -> impl Strategy<Value = (i64, i64)> {
    (0i64..1_000_000_000, 0i64..1_000_000).prop_map(|(first, span)| (first, first + span))
}

proptest! {
    #[test]
    fn independent_chunk_round_trips(key in arb_key(), (first, last) in arb_version_pair()) {
        let codecs = Codecs::new();
        let info = FileInfo {
            key: key.clone(),
            first_version: first.to_string(),
            last_version: last.to_string(),
            depends_on_version: None,
            dependency_chain_length: 0,
        };
        let nameinfo = compute_nameinfo(&info, &codecs).unwrap();
        let filename = encode_filename_from_nameinfo(&nameinfo).unwrap();
        let decoded = decode_filename(&filename, &codecs).unwrap();

        prop_assert_eq!(decoded.first_version, first.to_string());
        prop_assert_eq!(decoded.last_version, last.to_string());
        prop_assert_eq!(decoded.depends_on_version, None);
        prop_assert_eq!(decoded.dependency_chain_length, 0);
        prop_assert_eq!(decoded.keyhash, nameinfo.keyhash);
        if decoded.maybe_key.is_some() {
            prop_assert_eq!(decoded.maybe_key.as_deref(), Some(key.as_str()));
        }
    }

    #[test]
    fn dependent_chunk_round_trips(
        key in arb_key(),
        dep in 0i64..1000,
        gap in 1i64..1000,
        span in 0i64..1000,
        chain in 1i64..64,
    ) {
        let codecs = Codecs::new();
        let first = dep + gap;
        let last = first + span;
        let info = FileInfo {
            key,
            first_version: first.to_string(),
            last_version: last.to_string(),
            depends_on_version: Some(dep.to_string()),
            dependency_chain_length: chain,
        };
        let filename = datawatch::filenames::encode_filename(&info, &codecs).unwrap();
        let decoded = decode_filename(&filename, &codecs).unwrap();

        prop_assert_eq!(decoded.depends_on_version, Some(dep.to_string()));
        prop_assert_eq!(decoded.dependency_chain_length, chain);
    }
}
