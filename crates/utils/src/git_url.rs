use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Last two path segments of an HTTPS or SCP-style remote, trailing .git optional.
    static ref REMOTE_URL_RE: Regex =
        Regex::new(r"[:/]([^/:@]+)/([^/:@]+?)(?:\.git)?/?$").unwrap();
}

/// Extract the (organization, repository) pair from a git remote URL.
///
/// Supports `https://host/org/repo(.git)`, `git@host:org/repo(.git)` and
/// plain `host/org/repo` forms.
pub fn parse_org_and_name(remote_url: &str) -> Option<(String, String)> {
    let captures = REMOTE_URL_RE.captures(remote_url.trim())?;
    let org = captures.get(1)?.as_str().to_string();
    let name = captures.get(2)?.as_str().to_string();
    if org.is_empty() || name.is_empty() {
        return None;
    }
    Some((org, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_remotes() {
        assert_eq!(
            parse_org_and_name("https://github.com/acme/widgets.git"),
            Some(("acme".into(), "widgets".into()))
        );
        assert_eq!(
            parse_org_and_name("https://gitlab.example.com/acme/widgets"),
            Some(("acme".into(), "widgets".into()))
        );
    }

    #[test]
    fn parses_scp_style_remotes() {
        assert_eq!(
            parse_org_and_name("git@github.com:acme/widgets.git"),
            Some(("acme".into(), "widgets".into()))
        );
    }

    #[test]
    fn tolerates_trailing_slash() {
        assert_eq!(
            parse_org_and_name("https://github.com/acme/widgets/"),
            Some(("acme".into(), "widgets".into()))
        );
    }

    #[test]
    fn rejects_urls_without_two_segments() {
        assert_eq!(parse_org_and_name("https://github.com/"), None);
        assert_eq!(parse_org_and_name(""), None);
    }
}
