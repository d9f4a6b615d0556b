//! Metadata resolution
//!
//! Turns identifiers into [`MediaRef`]s and [`CollectionRef`]s by asking the
//! extraction backend. Collections are paged; a failure after the first page
//! keeps what was already listed and flags the result instead of failing.

pub mod formats;

pub use formats::{EncodingPreference, filter_encodings, select_encoding};

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{CollectionPage, ExtractionBackend};
use crate::classifier::{self, RequestMode, UrlKind};
use crate::config::{Config, EncodingFilter, ResolverConfig, RetryConfig};
use crate::error::{BackendError, Error, Result};
use crate::retry::with_retry;
use crate::throttle::RequestThrottle;
use crate::types::{CollectionId, CollectionRef, MediaId, MediaRef};

/// Outcome of paging through a collection
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectionResolution {
    /// Members listed so far, deduplicated, in backend order
    pub collection: CollectionRef,
    /// Set when listing stopped before the backend reported the last page
    pub interrupted: Option<BackendError>,
    /// Pages fetched
    pub pages: usize,
}

impl CollectionResolution {
    /// Whether members may be missing
    pub fn is_partial(&self) -> bool {
        self.interrupted.is_some()
    }
}

/// What a link resolved to
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolved {
    /// One item, with filtered renditions
    Item(MediaRef),
    /// A collection listing; members carry no renditions yet
    Collection(CollectionResolution),
}

impl Resolved {
    /// The items to download, in order
    pub fn into_items(self) -> Vec<MediaRef> {
        match self {
            Resolved::Item(item) => vec![item],
            Resolved::Collection(resolution) => resolution.collection.members,
        }
    }
}

/// Resolves items and collections through an [`ExtractionBackend`]
#[derive(Clone)]
pub struct MetadataResolver {
    backend: Arc<dyn ExtractionBackend>,
    config: ResolverConfig,
    filter: EncodingFilter,
    retry: RetryConfig,
    throttle: RequestThrottle,
    collection_url_base: String,
}

impl MetadataResolver {
    /// Create a resolver sharing `throttle` with the rest of the downloader
    pub fn new(
        backend: Arc<dyn ExtractionBackend>,
        config: &Config,
        throttle: RequestThrottle,
    ) -> Self {
        Self {
            backend,
            config: config.resolver.clone(),
            filter: config.encoding_filter.clone(),
            retry: config.retry.clone(),
            throttle,
            collection_url_base: config.backend.collection_url_base.clone(),
        }
    }

    /// The allow-list applied to every resolved item
    pub fn encoding_filter(&self) -> &EncodingFilter {
        &self.filter
    }

    /// Resolve one item and filter its renditions.
    ///
    /// Returns [`Error::NotFound`] when the backend reports the item missing;
    /// any other backend failure is surfaced as [`Error::Backend`].
    pub async fn resolve_item(&self, id: &MediaId) -> Result<MediaRef> {
        let target = id.as_str();
        let mut item = with_retry(&self.retry, || async move {
            self.throttle.acquire().await;
            self.backend.resolve_item(target).await
        })
        .await
        .map_err(|e| match e {
            BackendError::NotFound(msg) => Error::NotFound(format!("{id}: {msg}")),
            other => Error::Backend(other),
        })?;

        let raw_count = item.encodings.len();
        item.encodings = filter_encodings(&item.encodings, &self.filter);
        debug!(
            media_id = %id,
            raw = raw_count,
            kept = item.encodings.len(),
            "resolved item"
        );
        Ok(item)
    }

    /// Page through a collection.
    ///
    /// A failure on the first page is an error. A failure on a later page,
    /// or hitting `max_pages`, returns what was listed with `interrupted` set.
    /// An empty collection is [`Error::NotFound`].
    pub async fn resolve_collection(&self, id: &CollectionId) -> Result<CollectionResolution> {
        let mut members: Vec<MediaRef> = Vec::new();
        let mut seen: HashSet<MediaId> = HashSet::new();
        let mut title: Option<String> = None;
        let mut token: Option<String> = None;
        let mut interrupted: Option<BackendError> = None;
        let mut pages = 0usize;

        loop {
            if pages >= self.config.max_pages {
                warn!(
                    collection = %id,
                    pages,
                    "page limit reached, collection listing truncated"
                );
                interrupted = Some(BackendError::Other(format!(
                    "stopped after {pages} pages"
                )));
                break;
            }

            let page = match self.fetch_page(id, token.as_deref()).await {
                Ok(page) => page,
                Err(e) if pages == 0 => {
                    return Err(match e {
                        BackendError::NotFound(msg) => Error::NotFound(format!("{id}: {msg}")),
                        other => Error::Backend(other),
                    });
                }
                Err(e) => {
                    warn!(
                        collection = %id,
                        pages,
                        listed = members.len(),
                        error = %e,
                        "collection listing interrupted, keeping members listed so far"
                    );
                    interrupted = Some(e);
                    break;
                }
            };
            pages += 1;

            if title.is_none() {
                title = page.title;
            }
            for entry in page.entries {
                if seen.insert(entry.id.clone()) {
                    members.push(entry);
                } else {
                    debug!(collection = %id, media_id = %entry.id, "duplicate member skipped");
                }
            }

            match page.continuation {
                None => break,
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    warn!(collection = %id, token = %next, "backend repeated a continuation token");
                    interrupted = Some(BackendError::Other(format!(
                        "continuation token {next} repeated"
                    )));
                    break;
                }
                Some(next) => token = Some(next),
            }
        }

        if members.is_empty() && interrupted.is_none() {
            return Err(Error::NotFound(format!("{id}: collection has no items")));
        }

        info!(
            collection = %id,
            members = members.len(),
            pages,
            partial = interrupted.is_some(),
            "resolved collection"
        );

        Ok(CollectionResolution {
            collection: CollectionRef {
                url: format!("{}{}", self.collection_url_base, id),
                title: title.unwrap_or_else(|| id.to_string()),
                id: id.clone(),
                members,
            },
            interrupted,
            pages,
        })
    }

    async fn fetch_page(
        &self,
        id: &CollectionId,
        continuation: Option<&str>,
    ) -> std::result::Result<CollectionPage, BackendError> {
        let target = id.as_str();
        let page_size = self.config.page_size;
        with_retry(&self.retry, || async move {
            self.throttle.acquire().await;
            self.backend
                .resolve_page(target, continuation, page_size)
                .await
        })
        .await
    }

    /// Classify a link and resolve whatever it names.
    ///
    /// In [`RequestMode::Single`] a link carrying both an item and a
    /// collection resolves to the item when it is a member of the collection,
    /// and to the collection's first member otherwise. A partial listing
    /// cannot rule membership out, so there the item is resolved as asked.
    pub async fn resolve_url(&self, url: &str, mode: RequestMode) -> Result<Resolved> {
        let parsed = classifier::parse(url)?;
        match classifier::kind_for(&parsed, mode) {
            UrlKind::Invalid(reason) => Err(Error::InvalidInput(reason.to_string())),
            UrlKind::Collection(id) => Ok(Resolved::Collection(self.resolve_collection(&id).await?)),
            UrlKind::Single(item) => {
                let resolved = match &parsed.collection {
                    Some(list) => self.resolve_item_in_collection(&item, list).await?,
                    None => self.resolve_item(&item).await?,
                };
                Ok(Resolved::Item(resolved))
            }
        }
    }

    async fn resolve_item_in_collection(
        &self,
        item: &MediaId,
        list: &CollectionId,
    ) -> Result<MediaRef> {
        let listing = match self.resolve_collection(list).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(
                    media_id = %item,
                    collection = %list,
                    error = %e,
                    "could not list collection, resolving the item alone"
                );
                return self.resolve_item(item).await;
            }
        };

        if listing.collection.member(item).is_some() {
            return self.resolve_item(item).await;
        }
        if let Some(e) = &listing.interrupted {
            // The item may sit on a page that was never fetched
            info!(
                media_id = %item,
                collection = %list,
                listed = listing.collection.members.len(),
                error = %e,
                "collection only partially listed, resolving the item alone"
            );
            return self.resolve_item(item).await;
        }
        match listing.collection.members.first() {
            Some(first) => {
                info!(
                    media_id = %item,
                    collection = %list,
                    substitute = %first.id,
                    "item is not in the collection, using its first member"
                );
                self.resolve_item(&first.id).await
            }
            None => self.resolve_item(item).await,
        }
    }
}
