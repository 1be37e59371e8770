// ABOUTME: Lookup criteria for resolving a request to its active snapshot.
// ABOUTME: Exactly one key selects the snapshot; the site narrows the search when present.

use std::collections::BTreeMap;

use thiserror::Error;
use ulid::Ulid;

/// Errors that can occur while interpreting lookup criteria.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriteriaError {
    #[error("unsupported criteria: provide one of `pageId`, `url`, `routeName`, `pageAlias` or `name`")]
    Unsupported,

    #[error("invalid id for `{key}`: {value}")]
    InvalidId { key: &'static str, value: String },
}

/// The key an active-snapshot lookup filters on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criteria {
    Page { site_id: Option<Ulid>, page_id: Ulid },
    Url { site_id: Option<Ulid>, url: String },
    RouteName { site_id: Option<Ulid>, route_name: String },
    PageAlias { site_id: Option<Ulid>, page_alias: String },
    Name { site_id: Option<Ulid>, name: String },
}

impl Criteria {
    pub fn site_id(&self) -> Option<Ulid> {
        match self {
            Criteria::Page { site_id, .. }
            | Criteria::Url { site_id, .. }
            | Criteria::RouteName { site_id, .. }
            | Criteria::PageAlias { site_id, .. }
            | Criteria::Name { site_id, .. } => *site_id,
        }
    }

    /// Interpret a loosely-typed key/value map, such as request attributes.
    ///
    /// When several keys are present the first match in the order
    /// `pageId`, `url`, `routeName`, `pageAlias`, `name` wins.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, CriteriaError> {
        let site_id = map
            .get("site")
            .map(|v| parse_id("site", v))
            .transpose()?;

        if let Some(v) = map.get("pageId") {
            return Ok(Criteria::Page {
                site_id,
                page_id: parse_id("pageId", v)?,
            });
        }
        if let Some(url) = map.get("url") {
            return Ok(Criteria::Url {
                site_id,
                url: url.clone(),
            });
        }
        if let Some(route_name) = map.get("routeName") {
            return Ok(Criteria::RouteName {
                site_id,
                route_name: route_name.clone(),
            });
        }
        if let Some(page_alias) = map.get("pageAlias") {
            return Ok(Criteria::PageAlias {
                site_id,
                page_alias: page_alias.clone(),
            });
        }
        if let Some(name) = map.get("name") {
            return Ok(Criteria::Name {
                site_id,
                name: name.clone(),
            });
        }

        Err(CriteriaError::Unsupported)
    }
}

fn parse_id(key: &'static str, value: &str) -> Result<Ulid, CriteriaError> {
    value.parse::<Ulid>().map_err(|_| CriteriaError::InvalidId {
        key,
        value: value.to_string(),
    })
}
