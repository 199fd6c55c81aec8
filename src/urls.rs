//! URL helpers for clean functions and `url_modifier` hooks.

use url::{ParseError, Url};

/// Resolves `relative` against `base`, treating `base` as a directory.
pub fn join(base: &str, relative: &str) -> Result<String, ParseError> {
    let mut base = Url::parse(base)?;
    base.set_fragment(None);
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(relative)?.to_string())
}

pub fn host(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_owned)
}

/// Scheme and authority, e.g. `https://www.iana.org`.
pub fn domain(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.has_host().then(|| url.origin().ascii_serialization())
}

/// Last path segment, empty for directory URLs.
pub fn filename(url: &str) -> String {
    if url.ends_with('/') {
        return String::new();
    }
    Url::parse(url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_owned))
        })
        .unwrap_or_default()
}

/// Replaces the file name and/or the query of a URL.
pub fn modify(url: &str, filename: Option<&str>, query: Option<&str>) -> Result<String, ParseError> {
    if filename.is_none() && query.is_none() {
        return Ok(url.to_owned());
    }
    let mut parsed = Url::parse(url)?;
    if let Some(filename) = filename {
        let directory = parsed
            .path()
            .rsplit_once('/')
            .map(|(directory, _)| directory.to_owned())
            .unwrap_or_default();
        parsed.set_path(&format!("{directory}/{filename}"));
    }
    if let Some(query) = query {
        parsed.set_query(Some(query));
    }
    Ok(parsed.to_string())
}

/// Drops query and fragment; unparsable input is returned as is.
pub fn strip_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_treats_base_as_directory() {
        for base in [
            "https://www.iana.org/domains/reserved",
            "https://www.iana.org/domains/reserved/",
            "https://www.iana.org/domains/reserved#foo",
        ] {
            assert_eq!(join(base, "/domains/int").unwrap(), "https://www.iana.org/domains/int");
        }
        assert_eq!(
            join("https://example.com", "image1.html").unwrap(),
            "https://example.com/image1.html"
        );
        assert_eq!(
            join("https://example.com/cat", "https://other.org/x").unwrap(),
            "https://other.org/x"
        );
    }

    #[test]
    fn host_and_domain() {
        let url = "https://www.iana.org/domains/reserved";
        assert_eq!(host(url).as_deref(), Some("www.iana.org"));
        assert_eq!(domain(url).as_deref(), Some("https://www.iana.org"));
        assert_eq!(domain("not a url"), None);
    }

    #[test]
    fn filename_of_files_and_directories() {
        assert_eq!(filename("https://www.iana.org/domains/reserved?foo=bar"), "reserved");
        assert_eq!(
            filename("https://www.iana.org/media/product/760/1/foo-4648829.jpg"),
            "foo-4648829.jpg"
        );
        assert_eq!(filename("https://www.iana.org/"), "");
        assert_eq!(filename("https://www.iana.org/domains/"), "");
    }

    #[test]
    fn modify_filename_and_query() {
        let url = "https://www.iana.org/domains/reserved?foo=bar";
        assert_eq!(modify(url, None, None).unwrap(), url);
        assert_eq!(
            modify(url, None, Some("p=80")).unwrap(),
            "https://www.iana.org/domains/reserved?p=80"
        );
        assert_eq!(
            modify(
                "https://www.iana.org/media/product/760/1/foo-4648829.jpg?foo=bar",
                Some("some.png"),
                None
            )
            .unwrap(),
            "https://www.iana.org/media/product/760/1/some.png?foo=bar"
        );
    }

    #[test]
    fn strip_query_keeps_path() {
        assert_eq!(
            strip_query("https://shop.test/cat/1?sort=asc#top"),
            "https://shop.test/cat/1"
        );
        assert_eq!(strip_query("relative/path?x"), "relative/path?x");
    }
}
