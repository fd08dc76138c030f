use citrine::core::cluster::{NUM_SLOTS, get_slot};

#[test]
fn test_slot_matches_cluster_convention() {
    // Well-known assignments under the CCITT/XMODEM CRC16 convention.
    assert_eq!(get_slot(b"foo"), 12182);
    assert_eq!(get_slot(b"bar"), 5061);
    assert_eq!(get_slot(b"123456789"), 0x31C3 % NUM_SLOTS as u16);
}

#[test]
fn test_slot_is_deterministic_and_in_range() {
    for key in [&b"a"[..], b"user:1000", b"", b"\x00\xff\x7f"] {
        let first = get_slot(key);
        let second = get_slot(key);
        assert_eq!(first, second);
        assert!((first as usize) < NUM_SLOTS);
    }
}

#[test]
fn test_hash_tag_groups_keys_on_one_slot() {
    assert_eq!(get_slot(b"{user1000}.following"), get_slot(b"{user1000}.followers"));
    assert_eq!(get_slot(b"{user1000}.following"), get_slot(b"user1000"));
}

#[test]
fn test_empty_hash_tag_hashes_whole_key() {
    // "{}" carries no tag content, so the full key is hashed.
    assert_ne!(get_slot(b"foo{}bar"), get_slot(b""));
    assert_eq!(get_slot(b"foo{}bar"), get_slot(b"foo{}bar"));
}

#[test]
fn test_only_first_tag_counts() {
    assert_eq!(get_slot(b"{a}{b}"), get_slot(b"a"));
}
