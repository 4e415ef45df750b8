//! Action-type pattern matching shared by behavior sets and delegation
//! scopes: `"*"` matches everything, `"prefix.*"` matches anything under
//! the dotted prefix, anything else is an exact match.

/// Does `pattern` cover `action_type`?
pub fn pattern_matches(pattern: &str, action_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return action_type == prefix || action_type.starts_with(&format!("{prefix}."));
    }
    pattern == action_type
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_everything() {
        assert!(pattern_matches("*", "ads.campaign.pause"));
        assert!(pattern_matches("*", ""));
    }

    #[test]
    fn prefix_glob_matches_subtree() {
        assert!(pattern_matches("ads.*", "ads.campaign.pause"));
        assert!(pattern_matches("ads.campaign.*", "ads.campaign.pause"));
        assert!(pattern_matches("ads.*", "ads"));
        assert!(!pattern_matches("ads.*", "adsx.campaign.pause"));
        assert!(!pattern_matches("pay.*", "ads.campaign.pause"));
    }

    #[test]
    fn exact_match_is_exact() {
        assert!(pattern_matches("ads.campaign.pause", "ads.campaign.pause"));
        assert!(!pattern_matches("ads.campaign.pause", "ads.campaign.resume"));
        assert!(!pattern_matches("ads.campaign", "ads.campaign.pause"));
    }
}
