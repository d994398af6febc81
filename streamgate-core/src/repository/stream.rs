//! Stream catalog collaborator
//!
//! The edge only reads the catalog. Persistence and CRUD validation live
//! elsewhere; the in-memory implementation is seeded from configuration.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::models::Stream;
use crate::Result;

/// Read-only lookup of stream records
#[async_trait]
pub trait StreamCatalog: Send + Sync {
    /// Find a stream by id, falling back to slug.
    async fn get_stream(&self, id_or_slug: &str) -> Result<Option<Stream>>;

    async fn list_streams(&self) -> Result<Vec<Stream>>;
}

/// Catalog held in process memory, indexed by id and by slug
#[derive(Clone, Default)]
pub struct InMemoryStreamCatalog {
    by_id: Arc<DashMap<String, Stream>>,
    slug_index: Arc<DashMap<String, String>>,
}

impl InMemoryStreamCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_streams(streams: impl IntoIterator<Item = Stream>) -> Self {
        let catalog = Self::new();
        for stream in streams {
            catalog.upsert(stream);
        }
        catalog
    }

    /// Insert or replace a stream, keeping the slug index consistent.
    pub fn upsert(&self, stream: Stream) {
        if let Some(previous) = self.by_id.get(&stream.id) {
            if !previous.slug.is_empty() && previous.slug != stream.slug {
                self.slug_index.remove(&previous.slug);
            }
        }
        if !stream.slug.is_empty() {
            self.slug_index.insert(stream.slug.clone(), stream.id.clone());
        }
        self.by_id.insert(stream.id.clone(), stream);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
impl StreamCatalog for InMemoryStreamCatalog {
    async fn get_stream(&self, id_or_slug: &str) -> Result<Option<Stream>> {
        if let Some(stream) = self.by_id.get(id_or_slug) {
            return Ok(Some(stream.value().clone()));
        }
        let Some(id) = self.slug_index.get(id_or_slug).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|stream| stream.value().clone()))
    }

    async fn list_streams(&self) -> Result<Vec<Stream>> {
        let mut streams: Vec<Stream> = self.by_id.iter().map(|entry| entry.value().clone()).collect();
        streams.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn stream(id: &str, slug: &str, title: &str) -> Stream {
        Stream {
            id: id.to_string(),
            slug: slug.to_string(),
            title: title.to_string(),
            synopsis: String::new(),
            poster_url: None,
            availability_start: None,
            availability_end: None,
            is_visible: true,
            origin_url: Url::parse("https://cdn.test/master.m3u8").unwrap(),
            allowed_hosts: Vec::new(),
            captions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_slug() {
        let catalog = InMemoryStreamCatalog::with_streams([stream("s-1", "first", "First")]);

        let by_id = catalog.get_stream("s-1").await.unwrap().unwrap();
        let by_slug = catalog.get_stream("first").await.unwrap().unwrap();
        assert_eq!(by_id.id, by_slug.id);
        assert!(catalog.get_stream("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_moves_slug_index() {
        let catalog = InMemoryStreamCatalog::with_streams([stream("s-1", "old", "First")]);
        catalog.upsert(stream("s-1", "new", "First"));

        assert!(catalog.get_stream("old").await.unwrap().is_none());
        assert_eq!(catalog.get_stream("new").await.unwrap().unwrap().id, "s-1");
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_title() {
        let catalog = InMemoryStreamCatalog::with_streams([
            stream("s-2", "b", "Beta"),
            stream("s-1", "a", "Alpha"),
        ]);
        let titles: Vec<String> = catalog
            .list_streams()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Alpha", "Beta"]);
    }
}
