use http::{Uri, uri::PathAndQuery};

/// Resolves the request target `reference` against `base` using
/// relative-reference rules.
///
/// `reference` is a path with an optional `?query`, as found in an
/// origin-form request line. The result always carries the scheme and
/// authority of `base`. An absolute reference path replaces the base path, a
/// relative one is merged with the base path's directory, and an empty one
/// keeps the base path. Path and query bytes are copied verbatim: nothing is
/// decoded and dot segments are left alone.
///
/// # Arguments
///
/// * `base` - An absolute URI providing scheme, authority and base path
/// * `reference` - The request target to resolve
///
/// # Examples
///
/// ```
/// use http::Uri;
/// use idproxy_core::utils::resolve_reference;
///
/// let base = "https://example.com/api/".parse::<Uri>().unwrap();
/// let resolved = resolve_reference(&base, "/users?page=1").unwrap();
/// assert_eq!(resolved.to_string(), "https://example.com/users?page=1");
///
/// let resolved = resolve_reference(&base, "users").unwrap();
/// assert_eq!(resolved.to_string(), "https://example.com/api/users");
/// ```
pub fn resolve_reference(base: &Uri, reference: &str) -> Result<Uri, http::Error> {
    let (ref_path, ref_query) = match reference.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (reference, None),
    };

    let (path, query) = if ref_path.is_empty() {
        (base.path().to_owned(), ref_query.or(base.query()))
    } else if ref_path.starts_with('/') {
        (ref_path.to_owned(), ref_query)
    } else {
        (merge_paths(base, ref_path), ref_query)
    };

    let path_and_query = match query {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    let mut builder = Uri::builder().path_and_query(path_and_query.parse::<PathAndQuery>()?);
    if let Some(scheme) = base.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = base.authority() {
        builder = builder.authority(authority.clone());
    }
    builder.build()
}

fn merge_paths(base: &Uri, relative: &str) -> String {
    let base_path = base.path();
    if base.authority().is_some() && base_path.is_empty() {
        return format!("/{relative}");
    }
    match base_path.rfind('/') {
        Some(idx) => format!("{}{}", &base_path[..=idx], relative),
        None => format!("/{relative}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(base: &str, reference: &str) -> String {
        let base = base.parse::<Uri>().unwrap();
        resolve_reference(&base, reference).unwrap().to_string()
    }

    #[test]
    fn test_absolute_path_replaces_base_path() {
        assert_eq!(
            resolve("https://api.internal.example", "/v1/items?id=5"),
            "https://api.internal.example/v1/items?id=5"
        );
        assert_eq!(
            resolve("https://api.internal.example/prefix/", "/v1/items"),
            "https://api.internal.example/v1/items"
        );
    }

    #[test]
    fn test_relative_path_is_merged() {
        assert_eq!(
            resolve("https://example.com/api/v2/", "users"),
            "https://example.com/api/v2/users"
        );
        assert_eq!(
            resolve("https://example.com/api/v2", "users"),
            "https://example.com/api/users"
        );
        assert_eq!(resolve("https://example.com", "users"), "https://example.com/users");
    }

    #[test]
    fn test_path_and_query_preserved_verbatim() {
        assert_eq!(
            resolve("http://10.0.0.1:8080", "/a%2Fb/../c/./d?x=%20y&x=z&&flag"),
            "http://10.0.0.1:8080/a%2Fb/../c/./d?x=%20y&x=z&&flag"
        );
    }

    #[test]
    fn test_empty_query_is_kept() {
        assert_eq!(resolve("https://example.com", "/items?"), "https://example.com/items?");
    }

    #[test]
    fn test_empty_reference_keeps_base() {
        assert_eq!(
            resolve("https://example.com/base?x=1", ""),
            "https://example.com/base?x=1"
        );
        assert_eq!(
            resolve("https://example.com/base?x=1", "?y=2"),
            "https://example.com/base?y=2"
        );
    }
}
