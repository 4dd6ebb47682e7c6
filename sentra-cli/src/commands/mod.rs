pub mod account;
pub mod local;
pub mod remote;
pub mod settings;

/// First eight characters of a server id, for display.
pub fn short(id: &str) -> &str {
    let id = id.trim();
    id.get(..8).unwrap_or(id)
}

pub fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short() {
        assert_eq!(short("0f6c1a2b-1111-4222-8333-444455556666"), "0f6c1a2b");
        assert_eq!(short("abc"), "abc");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "file"), "1 file");
        assert_eq!(plural(3, "file"), "3 files");
    }
}
