//! Lexical path helpers over `/`-separated identities and server paths.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() && !path.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

/// Everything up to the last `/`, or `.` when there is none.
pub fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => path[..i].to_string(),
        None => ".".to_string(),
    }
}

/// Join `reference` onto `base` and normalize. An absolute reference wins.
pub fn join(base: &str, reference: &str) -> String {
    normalize(&Utf8Path::new(base).join(reference)).into_string()
}

/// Resolve a link relative to the directory of `server_path`, keeping a
/// trailing slash of the link.
pub fn resolve_link(server_path: &str, relative: &str) -> String {
    let mut resolved = join(&dirname(server_path), relative);
    if relative.ends_with('/') && !resolved.ends_with('/') {
        resolved.push('/');
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_lexically() {
        assert_eq!(join("/site/docs", "../img/a.png"), "/site/img/a.png");
        assert_eq!(join("pages", "./part.tpl"), "pages/part.tpl");
        assert_eq!(join("pages", "/abs/x.tpl"), "/abs/x.tpl");
        assert_eq!(join("/", "../x"), "/x");
    }

    #[test]
    fn dirname_of_identities() {
        assert_eq!(dirname("/a/b.tpl"), "/a");
        assert_eq!(dirname("/b.tpl"), "/");
        assert_eq!(dirname("b.tpl"), ".");
    }

    #[test]
    fn links_keep_trailing_slash() {
        assert_eq!(resolve_link("/site/docs/page.html", "./"), "/site/docs/");
        assert_eq!(resolve_link("/site/docs/page.html", "../"), "/site/");
    }
}
