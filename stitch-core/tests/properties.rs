//! Property-based tests for stitch core types

use proptest::prelude::*;
use stitch_core::*;

proptest! {
    #[test]
    fn props_upload_id_parse_never_panics(raw in ".{0,40}") {
        match raw.parse::<UploadId>() {
            Ok(id) => {
                // Accepted text may differ in case, the id itself must survive
                let again: UploadId = id.to_string().parse().unwrap();
                prop_assert_eq!(again, id);
            }
            Err(e) => prop_assert_eq!(e.kind(), ErrorKind::InvalidId),
        }
    }

    #[test]
    fn props_upload_id_from_any_ulid_roundtrips(value in any::<u128>()) {
        let id = UploadId::from_ulid(ulid::Ulid::from(value));
        let parsed: UploadId = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
        prop_assert_eq!(parsed.as_ulid().0, value);
    }

    #[test]
    fn props_content_hash_matches_incremental_hash(
        parts in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 0..8)
    ) {
        let whole: Vec<u8> = parts.concat();
        let mut hasher = blake3::Hasher::new();
        for part in &parts {
            hasher.update(part);
        }
        prop_assert_eq!(ContentHash::from(hasher.finalize()), ContentHash::new(&whole));
    }
}
