use std::fmt;

/// Bucket of the final index, chosen by a term's lowercase leading character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShardKey {
    /// `a`..=`z` or `0`..=`9`.
    Char(char),
    /// Every other leading character, and the empty term.
    Other,
}

impl ShardKey {
    pub const COUNT: usize = 37;

    pub fn for_term(term: &str) -> Self {
        match term.chars().next().map(|c| c.to_ascii_lowercase()) {
            Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => ShardKey::Char(c),
            _ => ShardKey::Other,
        }
    }

    /// All buckets in file-name order: letters, digits, then the catch-all.
    pub fn all() -> impl Iterator<Item = ShardKey> {
        ('a'..='z').chain('0'..='9').map(ShardKey::Char).chain(std::iter::once(ShardKey::Other))
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardKey::Char(c) => write!(f, "{c}"),
            ShardKey::Other => f.write_str("other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_term_maps_to_one_bucket() {
        assert_eq!(ShardKey::for_term("cat"), ShardKey::Char('c'));
        assert_eq!(ShardKey::for_term("Cat"), ShardKey::Char('c'));
        assert_eq!(ShardKey::for_term("2024"), ShardKey::Char('2'));
        assert_eq!(ShardKey::for_term("élan"), ShardKey::Other);
        assert_eq!(ShardKey::for_term(""), ShardKey::Other);
    }

    #[test]
    fn there_are_thirty_seven_buckets() {
        let keys: Vec<_> = ShardKey::all().collect();
        assert_eq!(keys.len(), ShardKey::COUNT);
        assert_eq!(keys.first().map(ToString::to_string).as_deref(), Some("a"));
        assert_eq!(keys.last(), Some(&ShardKey::Other));
    }
}
