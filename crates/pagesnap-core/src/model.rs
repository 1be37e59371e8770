// ABOUTME: Defines the Site and Page structs that make up the live, editable content tree.
// ABOUTME: Pages carry the routing fields that snapshots denormalize for fast lookups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A site groups pages under a host. Site-wide snapshot runs iterate its pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub site_id: Ulid,
    pub name: String,
    pub host: String,
    pub enabled: bool,
}

impl Site {
    pub fn new(name: String, host: String) -> Self {
        Self {
            site_id: Ulid::new(),
            name,
            host,
            enabled: true,
        }
    }
}

/// A live page. Editors mutate it continuously; the snapshot engine only
/// reads it, except for clearing `edited` once a snapshot is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: Ulid,
    pub site_id: Ulid,
    pub name: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub route_name: String,
    pub page_alias: Option<String>,
    pub parent_id: Option<Ulid>,
    pub target_id: Option<Ulid>,
    pub enabled: bool,
    /// True when the page has changes that are not yet captured by a snapshot.
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    /// Create a new enabled page on the given site. New pages start out
    /// edited since nothing has been published for them yet.
    pub fn new(site_id: Ulid, name: String, route_name: String) -> Self {
        let now = Utc::now();
        Self {
            page_id: Ulid::new(),
            site_id,
            name,
            title: None,
            url: None,
            route_name,
            page_alias: None,
            parent_id: None,
            target_id: None,
            enabled: true,
            edited: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.page_alias = Some(alias.into());
        self
    }

    /// Record an editorial change.
    pub fn touch(&mut self) {
        self.edited = true;
        self.updated_at = Utc::now();
    }
}
