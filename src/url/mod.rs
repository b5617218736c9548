//! URL handling module for Leakwatch
//!
//! This module provides URL normalization, domain extraction and the same-site
//! checks used when harvesting links into a site's frontier.

mod domain;
mod normalize;
mod site;

pub use domain::{bare_host, extract_domain, homepage_url};
pub use normalize::normalize_url;
pub use site::{is_same_site, onto_site_host, resolve_site_link, site_host};
