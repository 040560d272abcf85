//! External link templates.
//!
//! A template such as `https://tracker.example.com/browse/:issue` declares
//! its parameters with `:name` placeholders. Expanding it substitutes
//! URL-encoded values for every placeholder.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::BoardError;
use crate::models::ExternalLink;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Parameter names declared by a template, in order of first appearance.
pub fn parameters(template: &str) -> Result<Vec<String>, BoardError> {
    let parsed = url::Url::parse(&PLACEHOLDER.replace_all(template, "x"))
        .map_err(|e| BoardError::validation(format!("Invalid link template '{}': {}", template, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(BoardError::validation(format!(
            "Link template must use http or https, got '{}'",
            parsed.scheme()
        )));
    }

    let mut names: Vec<String> = Vec::new();
    for cap in PLACEHOLDER.captures_iter(&strip_scheme_and_port(template)) {
        let name = cap[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

/// `https://host:8080/x` contains `:8080` and `//host`; only the part after
/// the authority may hold placeholders.
fn strip_scheme_and_port(template: &str) -> String {
    match template.split_once("://") {
        Some((_, rest)) => match rest.find('/') {
            Some(idx) => rest[idx..].to_string(),
            None => String::new(),
        },
        None => template.to_string(),
    }
}

/// Substitute `values` into the link template. Every declared parameter must
/// be present and no undeclared ones may be passed.
pub fn expand(link: &ExternalLink, values: &BTreeMap<String, String>) -> Result<String, BoardError> {
    if let Some(missing) = link.parameters.iter().find(|p| !values.contains_key(*p)) {
        return Err(BoardError::validation(format!(
            "Missing link parameter '{}'",
            missing
        )));
    }
    if let Some(extra) = values.keys().find(|k| !link.parameters.contains(*k)) {
        return Err(BoardError::validation(format!(
            "Unknown link parameter '{}'",
            extra
        )));
    }

    let (head, tail) = match link.link.split_once("://") {
        Some((scheme, rest)) => {
            let idx = rest.find('/').unwrap_or(rest.len());
            (
                format!("{}://{}", scheme, &rest[..idx]),
                rest[idx..].to_string(),
            )
        }
        None => (String::new(), link.link.clone()),
    };
    let expanded = PLACEHOLDER.replace_all(&tail, |cap: &regex::Captures| {
        values
            .get(&cap[1])
            .map(|v| encode(v))
            .unwrap_or_else(|| cap[0].to_string())
    });
    Ok(format!("{}{}", head, expanded))
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(link: &str) -> ExternalLink {
        ExternalLink {
            id: 1,
            project_id: 1,
            title: "T".into(),
            description: String::new(),
            link: link.into(),
            parameters: parameters(link).unwrap(),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_parameters_in_order_without_duplicates() {
        let names = parameters("https://x.example.com/:org/:repo/issues/:id?back=:org").unwrap();
        assert_eq!(names, vec!["org", "repo", "id"]);
    }

    #[test]
    fn test_port_is_not_a_parameter() {
        let names = parameters("http://localhost:8080/browse/:issue").unwrap();
        assert_eq!(names, vec!["issue"]);
    }

    #[test]
    fn test_invalid_template_rejected() {
        assert!(parameters("not a url").is_err());
        assert!(parameters("ftp://files.example.com/:path").is_err());
    }

    #[test]
    fn test_expand_encodes_values() {
        let link = template("https://search.example.com/q/:term");
        let url = expand(
            &link,
            &BTreeMap::from([("term".to_string(), "a b&c".to_string())]),
        )
        .unwrap();
        assert_eq!(url, "https://search.example.com/q/a+b%26c");
    }

    #[test]
    fn test_expand_requires_exact_parameters() {
        let link = template("https://x.example.com/:id");
        assert!(expand(&link, &BTreeMap::new()).is_err());
        let extra = BTreeMap::from([
            ("id".to_string(), "1".to_string()),
            ("other".to_string(), "2".to_string()),
        ]);
        assert!(expand(&link, &extra).is_err());
    }
}
