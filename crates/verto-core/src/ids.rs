//! Unique identifiers for calls and event handlers.

use uuid::Uuid;

/// Generates a random 128-bit identifier formatted as `8-4-4-4-12` lowercase
/// hex groups.
pub fn generate_guid() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn guid_has_expected_shape() {
        let guid = generate_guid();
        let groups: Vec<&str> = guid.split('-').collect();
        let lengths: Vec<usize> = groups.iter().map(|g| g.len()).collect();

        assert_eq!(lengths, vec![8, 4, 4, 4, 12]);
        assert!(
            guid.chars()
                .all(|c| c == '-' || c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn guids_do_not_repeat() {
        let guids: HashSet<String> = (0..1000).map(|_| generate_guid()).collect();
        assert_eq!(guids.len(), 1000);
    }
}
