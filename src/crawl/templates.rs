//! Candidate feed URLs for a website.
//!
//! A template pairs a regex matched against the query (a website origin or
//! the seed URL) with a URL pattern. Placeholders in braces are substituted
//! from the parsed query and from the regex captures:
//!
//! | placeholder      | value                                   |
//! |------------------|-----------------------------------------|
//! | `{original}`     | the query unchanged                     |
//! | `{scheme}`       | `https`                                 |
//! | `{netloc}`       | `host[:port]`                           |
//! | `{path}`         | `/a/b`                                  |
//! | `{query}`        | query string without `?`                |
//! | `{network_path}` | `//netloc/path?query`                   |
//! | `{path_query}`   | `/path?query`                           |
//! | `{1}`, `{name}`  | numbered or named regex capture groups  |
//!
//! Templates sharing a pattern form a group. Only the first group, in
//! declaration order, whose pattern matches the query is used, so
//! site-specific groups declared ahead of the catch-all replace it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::util::normalize_url;

/// One configured template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTemplate {
    /// Regex the query must match for this template to apply.
    pub pattern: String,
    pub template: String,
    /// Lower ranks are tried first.
    pub rank: i64,
}

impl FeedTemplate {
    pub fn new(pattern: &str, template: &str, rank: i64) -> Self {
        Self {
            pattern: pattern.to_string(),
            template: template.to_string(),
            rank,
        }
    }

    /// Plain http, then https, then the query as given.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(".*", "http:{network_path}", 997),
            Self::new(".*", "https:{network_path}", 998),
            Self::new(".*", "{original}", 999),
        ]
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid template pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("template {template:?} uses unknown placeholder {{{name}}}")]
    UnknownPlaceholder { template: String, name: String },
}

const BUILTIN_PLACEHOLDERS: [&str; 7] = [
    "original",
    "scheme",
    "netloc",
    "path",
    "query",
    "network_path",
    "path_query",
];

/// Templates of one pattern, sorted by rank (stable for equal ranks).
#[derive(Debug, Clone)]
struct Group {
    regex: Regex,
    templates: Vec<(String, i64)>,
}

/// Compiled template groups in declaration order.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    groups: Vec<Group>,
    placeholder: Regex,
}

const PLACEHOLDER: &str = r"\{([A-Za-z_][A-Za-z0-9_]*|[0-9]+)\}";

impl TemplateSet {
    /// Compile and check every template.
    ///
    /// Placeholders must be builtins or capture groups of the template's own
    /// pattern.
    pub fn compile(templates: &[FeedTemplate]) -> Result<Self, TemplateError> {
        let placeholder = Regex::new(PLACEHOLDER).map_err(|source| TemplateError::Pattern {
            pattern: PLACEHOLDER.to_string(),
            source,
        })?;
        let mut groups: Vec<Group> = Vec::new();

        for t in templates {
            let index = match groups.iter().position(|g| g.regex.as_str() == t.pattern) {
                Some(i) => i,
                None => {
                    let regex = Regex::new(&t.pattern).map_err(|source| TemplateError::Pattern {
                        pattern: t.pattern.clone(),
                        source,
                    })?;
                    groups.push(Group {
                        regex,
                        templates: Vec::new(),
                    });
                    groups.len() - 1
                }
            };
            let group = &mut groups[index];
            let regex = &group.regex;

            for cap in placeholder.captures_iter(&t.template) {
                let name = &cap[1];
                let known = BUILTIN_PLACEHOLDERS.contains(&name)
                    || regex.capture_names().flatten().any(|n| n == name)
                    || name.parse::<usize>().is_ok_and(|i| i >= 1 && i < regex.captures_len());
                if !known {
                    return Err(TemplateError::UnknownPlaceholder {
                        template: t.template.clone(),
                        name: name.to_string(),
                    });
                }
            }

            group.templates.push((t.template.clone(), t.rank));
        }

        for group in &mut groups {
            group.templates.sort_by_key(|(_, rank)| *rank);
        }
        Ok(Self { groups, placeholder })
    }

    /// Candidate feed URLs for `query`, in the order they should be tried.
    ///
    /// Renders the templates of the first group whose pattern matches,
    /// normalizes the results and drops duplicates and unusable URLs. When no
    /// pattern matches, the query itself is the only candidate.
    pub fn candidates(&self, query: &str) -> Vec<String> {
        let Some((group, caps)) = self
            .groups
            .iter()
            .find_map(|g| g.regex.captures(query).map(|caps| (g, caps)))
        else {
            return normalize_url(query).map(|u| vec![u.to_string()]).unwrap_or_default();
        };

        let parsed = Url::parse(query).ok();
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for (template, _) in &group.templates {
            let rendered = self.placeholder.replace_all(template, |c: &regex::Captures<'_>| {
                let name = &c[1];
                if let Ok(i) = name.parse::<usize>() {
                    return caps.get(i).map_or("", |m| m.as_str()).to_string();
                }
                if let Some(m) = caps.name(name) {
                    return m.as_str().to_string();
                }
                builtin(name, query, parsed.as_ref())
            });

            match normalize_url(&rendered) {
                Ok(url) => {
                    let url = url.to_string();
                    if seen.insert(url.clone()) {
                        out.push(url);
                    }
                }
                Err(e) => {
                    tracing::debug!(query, candidate = %rendered, error = %e, "Skipping unusable candidate");
                }
            }
        }
        out
    }
}

fn builtin(name: &str, query: &str, parsed: Option<&Url>) -> String {
    let Some(url) = parsed else {
        return if name == "original" { query.to_string() } else { String::new() };
    };
    let netloc = match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{h}:{p}"),
        (Some(h), None) => h.to_string(),
        _ => String::new(),
    };
    let path_query = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };
    match name {
        "original" => query.to_string(),
        "scheme" => url.scheme().to_string(),
        "netloc" => netloc,
        "path" => url.path().to_string(),
        "query" => url.query().unwrap_or_default().to_string(),
        "network_path" => format!("//{netloc}{path_query}"),
        "path_query" => path_query,
        _ => String::new(),
    }
}
