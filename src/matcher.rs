use crate::settings::SettingsError;

/// Case-insensitive containment of `keyword` in `text`.
///
/// An empty (or blank) keyword is an error instead of a match on every page.
/// The answer is a yes/no: a page mentioning the keyword ten times counts once.
pub fn matches(text: &str, keyword: &str) -> Result<bool, SettingsError> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(SettingsError::EmptyKeyword);
    }

    Ok(text.to_lowercase().contains(&keyword.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        assert_eq!(matches("no release yet", "release"), Ok(true));
        assert_eq!(matches("New RELEASE today", "release"), Ok(true));
        assert_eq!(matches("new release today", "Release"), Ok(true));
        assert_eq!(matches("ÉTÉ 2026", "été"), Ok(true));
    }

    #[test]
    fn test_substring_and_absence() {
        assert_eq!(matches("prereleased", "release"), Ok(true));
        assert_eq!(matches("nothing here", "release"), Ok(false));
        assert_eq!(matches("", "release"), Ok(false));
        assert_eq!(matches("sold out", "  sold out "), Ok(true));
    }

    #[test]
    fn test_empty_keyword_fails() {
        assert_eq!(matches("anything", ""), Err(SettingsError::EmptyKeyword));
        assert_eq!(matches("anything", " \t"), Err(SettingsError::EmptyKeyword));
    }
}
