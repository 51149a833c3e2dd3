//! Resource addresses: an absolute or relative url, its parent and an ordered
//! query string.
//!
//! Addresses are plain values. A request takes a snapshot of the address
//! (`to_url_and_query`) when it is issued, so later edits never leak into
//! requests already in flight.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://|^//").expect("absolute url regex must compile"));

/// Query parameter addressing another web (`@target`); follows the address
/// through `combine` and `parent`.
pub const TARGET_PARAM: &str = "@target";

/// Join url fragments with `/`.
///
/// Empty parts are dropped, one leading and one trailing `/` or `\` is
/// stripped from each part and backslashes are normalized to `/`.
pub fn combine_paths<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| !p.is_empty())
        .map(|p| {
            let p = p.strip_prefix(['/', '\\']).unwrap_or(p);
            p.strip_suffix(['/', '\\']).unwrap_or(p)
        })
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
        .replace('\\', "/")
}

/// True for `http://`, `https://` (any case) and protocol-relative `//` urls.
pub fn is_url_absolute(url: &str) -> bool {
    ABSOLUTE_URL.is_match(url)
}

/// Ordered query parameters with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key`, keeping its original position when it already exists.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `k=v` pairs joined by `&`. Values are emitted as given.
    pub fn to_query_string(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// A url with its parent and query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    parent_url: String,
    url: String,
    query: QueryParams,
}

impl ResourceAddress {
    /// Address `path` beneath `base`; the parent is `base`.
    pub fn new(base: &str, path: &str) -> Self {
        Self {
            parent_url: base.to_string(),
            url: combine_paths(&[base, path]),
            query: QueryParams::new(),
        }
    }

    /// Address a raw url, inferring its parent from the url itself.
    pub fn parse(raw: &str) -> Self {
        Self {
            parent_url: infer_parent(raw).to_string(),
            url: raw.to_string(),
            query: QueryParams::new(),
        }
    }

    /// Child address of this one.
    pub fn combine(&self, path: &str) -> Self {
        let mut child = Self::new(&self.url, path);
        self.propagate_target(&mut child);
        child
    }

    /// Address of this address's parent.
    pub fn parent(&self) -> Self {
        let mut parent = Self::parse(&self.parent_url);
        self.propagate_target(&mut parent);
        parent
    }

    fn propagate_target(&self, other: &mut Self) {
        if let Some(target) = self.query.get(TARGET_PARAM) {
            other.query.set(TARGET_PARAM, target);
        }
    }

    /// Extend the url with another path segment.
    pub fn append(&mut self, path: &str) {
        self.url = combine_paths(&[self.url.as_str(), path]);
    }

    /// Append raw text to the url (no separator added).
    pub fn concat(&mut self, part: &str) {
        self.url.push_str(part);
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn parent_url(&self) -> &str {
        &self.parent_url
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut QueryParams {
        &mut self.query
    }

    pub fn set_query(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.set(key, value);
    }

    pub fn is_absolute(&self) -> bool {
        is_url_absolute(&self.url)
    }

    // OData query helpers

    pub fn select(mut self, fields: &[&str]) -> Self {
        if !fields.is_empty() {
            self.query.set("$select", fields.join(","));
        }
        self
    }

    pub fn expand(mut self, fields: &[&str]) -> Self {
        if !fields.is_empty() {
            self.query.set("$expand", fields.join(","));
        }
        self
    }

    pub fn filter(mut self, filter: &str) -> Self {
        self.query.set("$filter", filter);
        self
    }

    /// Add an ordering clause; repeated calls accumulate.
    pub fn order_by(mut self, field: &str, ascending: bool) -> Self {
        let clause = format!("{} {}", field, if ascending { "asc" } else { "desc" });
        let value = match self.query.get("$orderby") {
            Some(existing) => format!("{},{}", existing, clause),
            None => clause,
        };
        self.query.set("$orderby", value);
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.query.set("$top", top.to_string());
        self
    }

    pub fn skip(mut self, skip: u32) -> Self {
        self.query.set("$skip", skip.to_string());
        self
    }

    pub fn to_query_string(&self) -> String {
        self.query.to_query_string()
    }

    /// The url followed by `?query` when there are query parameters.
    pub fn to_url_and_query(&self) -> String {
        if self.query.is_empty() {
            self.url.clone()
        } else {
            format!("{}?{}", self.url, self.query.to_query_string())
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url_and_query())
    }
}

/// Find the parent of a raw url.
///
/// Separators inside parentheses (and quoted literals inside them) are
/// ignored. A trailing id segment such as `items(19)` is stripped back to
/// `items`; otherwise everything before the last top-level `/` is the parent.
fn infer_parent(raw: &str) -> &str {
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut last_sep: Option<usize> = None;
    let mut last_open: Option<usize> = None;

    for (i, c) in raw.char_indices() {
        match c {
            '\'' if depth > 0 => in_quote = !in_quote,
            '(' if !in_quote => {
                if depth == 0 {
                    last_open = Some(i);
                }
                depth += 1;
            }
            ')' if !in_quote => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                last_sep = Some(i);
                last_open = None;
            }
            _ => {}
        }
    }

    if raw.ends_with(')') {
        if let Some(open) = last_open.filter(|&open| open > 0) {
            let start = last_sep.map(|s| s + 1).unwrap_or(0);
            if open > start {
                return &raw[..open];
            }
        }
    }

    match last_sep {
        Some(i) if !raw[..=i].ends_with("//") => &raw[..i],
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB: &str = "https://contoso.sharepoint.com/sites/dev";

    #[test]
    fn test_combine_paths() {
        assert_eq!(
            combine_paths(&["https://contoso.sharepoint.com/", "/_api/", "web"]),
            "https://contoso.sharepoint.com/_api/web"
        );
        assert_eq!(combine_paths(&["a", "", "b\\c\\"]), "a/b/c");
        assert_eq!(combine_paths::<&str>(&[]), "");
    }

    #[test]
    fn test_is_url_absolute() {
        assert!(is_url_absolute("https://contoso.sharepoint.com"));
        assert!(is_url_absolute("HTTP://contoso"));
        assert!(is_url_absolute("//contoso/sites"));
        assert!(!is_url_absolute("_api/web"));
        assert!(!is_url_absolute("/sites/dev/_api/web"));
    }

    #[test]
    fn test_parent_of_id_segment() {
        let addr = ResourceAddress::parse(&format!("{}/_api/web/lists/items(19)", WEB));
        assert_eq!(addr.parent_url(), format!("{}/_api/web/lists/items", WEB));
    }

    #[test]
    fn test_parent_of_segment_after_id() {
        let addr = ResourceAddress::parse(&format!("{}/_api/web/lists/items(19)/fields", WEB));
        assert_eq!(addr.parent_url(), format!("{}/_api/web/lists/items(19)", WEB));
    }

    #[test]
    fn test_parent_ignores_separators_inside_parentheses() {
        let raw = format!(
            "{}/_api/web/getFolderByServerRelativeUrl('/sites/dev/Shared Documents')/files",
            WEB
        );
        let addr = ResourceAddress::parse(&raw);
        assert_eq!(
            addr.parent_url(),
            format!(
                "{}/_api/web/getFolderByServerRelativeUrl('/sites/dev/Shared Documents')",
                WEB
            )
        );
    }

    #[test]
    fn test_parent_without_separator_is_self() {
        assert_eq!(ResourceAddress::parse("web").parent_url(), "web");
        assert_eq!(
            ResourceAddress::parse("https://contoso.sharepoint.com").parent_url(),
            "https://contoso.sharepoint.com"
        );
    }

    #[test]
    fn test_combine_and_target_propagation() {
        let mut web = ResourceAddress::new(WEB, "_api/web");
        web.set_query("@target", "'https://other'");

        let lists = web.combine("lists");
        assert_eq!(lists.url(), format!("{}/_api/web/lists", WEB));
        assert_eq!(lists.parent_url(), format!("{}/_api/web", WEB));
        assert_eq!(lists.query().get("@target"), Some("'https://other'"));

        let parent = lists.parent();
        assert_eq!(parent.url(), format!("{}/_api/web", WEB));
        assert_eq!(parent.query().get("@target"), Some("'https://other'"));
    }

    #[test]
    fn test_append_and_concat() {
        let mut addr = ResourceAddress::new(WEB, "_api/web/lists");
        addr.append("getByTitle('Docs')");
        addr.concat("/items");
        assert_eq!(
            addr.url(),
            format!("{}/_api/web/lists/getByTitle('Docs')/items", WEB)
        );
    }

    #[test]
    fn test_query_order_and_odata_helpers() {
        let addr = ResourceAddress::new(WEB, "_api/web/lists")
            .select(&["Title", "Id"])
            .filter("Hidden eq false")
            .order_by("Title", true)
            .order_by("Created", false)
            .top(5);

        assert_eq!(
            addr.to_query_string(),
            "$select=Title,Id&$filter=Hidden eq false&$orderby=Title asc,Created desc&$top=5"
        );
        assert_eq!(
            addr.to_url_and_query(),
            format!("{}/_api/web/lists?{}", WEB, addr.to_query_string())
        );
    }

    #[test]
    fn test_query_set_keeps_position() {
        let mut query = QueryParams::new();
        query.set("a", "1");
        query.set("b", "2");
        query.set("a", "3");
        assert_eq!(query.to_query_string(), "a=3&b=2");
        assert_eq!(query.remove("a").as_deref(), Some("3"));
        assert_eq!(query.to_query_string(), "b=2");
    }

    #[test]
    fn test_url_without_query() {
        let addr = ResourceAddress::new(WEB, "_api/web");
        assert_eq!(addr.to_url_and_query(), format!("{}/_api/web", WEB));
        assert_eq!(addr.to_string(), addr.to_url_and_query());
    }
}
