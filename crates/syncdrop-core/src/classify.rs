//! Classifier collaborator
//!
//! Turns raw content into a type, tags and a suggested collection. The real
//! work happens in an external service behind [`ClassifierBackend`]; this
//! module only decides when to call it and what to answer when it can't.
//! [`Classifier::classify`] never fails.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SyncResult;
use crate::types::{CollectionId, Drop, DropMetadata, DropType};

static BARE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^\s$.?#].[^\s]*$").expect("static regex")
});

/// Site name attached to links classified without the backend
pub const FALLBACK_SITE_NAME: &str = "Web Link";

/// Result of classifying one piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    #[serde(rename = "type")]
    pub drop_type: DropType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "suggestedCollectionId", default)]
    pub suggested_collection: CollectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DropMetadata>,
}

impl Classification {
    /// Deterministic answer used when the backend is missing or failing
    pub fn fallback(content: &str) -> Self {
        if looks_like_url(content) {
            Self {
                drop_type: DropType::Url,
                tags: Vec::new(),
                suggested_collection: CollectionId::Links,
                metadata: Some(DropMetadata {
                    title: Some(content.trim().to_string()),
                    site_name: Some(FALLBACK_SITE_NAME.to_string()),
                    ..Default::default()
                }),
            }
        } else {
            Self {
                drop_type: DropType::Text,
                tags: Vec::new(),
                suggested_collection: CollectionId::Inbox,
                metadata: None,
            }
        }
    }

    /// Static answer for an uploaded file of a known type
    pub fn for_file(drop_type: DropType) -> Option<Self> {
        drop_type.file_collection().map(|collection| Self {
            drop_type,
            tags: Vec::new(),
            suggested_collection: collection,
            metadata: None,
        })
    }

    /// Build a new active drop for `content` from this classification.
    pub fn into_drop(self, content: impl Into<String>) -> Drop {
        let mut drop = Drop::new(content, self.drop_type, self.suggested_collection)
            .with_tags(self.tags);
        drop.metadata = self.metadata;
        drop
    }
}

/// Whether `content` is a single bare http(s) URL
pub fn looks_like_url(content: &str) -> bool {
    BARE_URL.is_match(content.trim())
}

/// External classification service
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    async fn classify(&self, content: &str) -> SyncResult<Classification>;
}

/// Front for an optional [`ClassifierBackend`] with a deterministic fallback
#[derive(Clone, Default)]
pub struct Classifier {
    backend: Option<Arc<dyn ClassifierBackend>>,
}

impl Classifier {
    /// Classifier that always uses the fallback rules
    pub fn offline() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(backend: Arc<dyn ClassifierBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Classify `content`.
    ///
    /// A `forced_type` naming a file type short-circuits to the static
    /// file mapping without touching the backend.
    pub async fn classify(&self, content: &str, forced_type: Option<DropType>) -> Classification {
        if let Some(classification) = forced_type.and_then(Classification::for_file) {
            return classification;
        }

        let Some(backend) = &self.backend else {
            return Classification::fallback(content);
        };

        match backend.classify(content).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!(error = %e, "Classifier failed, using fallback");
                Classification::fallback(content)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ClassifierBackend for CountingBackend {
        async fn classify(&self, _content: &str) -> SyncResult<Classification> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SyncError::Classifier("quota exceeded".into()));
            }
            Ok(Classification {
                drop_type: DropType::Snippet,
                tags: vec!["rust".into()],
                suggested_collection: CollectionId::Code,
                metadata: None,
            })
        }
    }

    fn backend(fail: bool) -> Arc<CountingBackend> {
        Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[test]
    fn test_url_detection() {
        assert!(looks_like_url("https://example.com/path?q=1"));
        assert!(looks_like_url("  http://a.io  "));
        assert!(!looks_like_url("see https://example.com"));
        assert!(!looks_like_url("ftp://example.com"));
        assert!(!looks_like_url("https://"));
    }

    #[tokio::test]
    async fn test_offline_fallback() {
        let classifier = Classifier::offline();

        let link = classifier.classify("https://example.com", None).await;
        assert_eq!(link.drop_type, DropType::Url);
        assert_eq!(link.suggested_collection, CollectionId::Links);
        let meta = link.metadata.unwrap();
        assert_eq!(meta.title.as_deref(), Some("https://example.com"));
        assert_eq!(meta.site_name.as_deref(), Some(FALLBACK_SITE_NAME));

        let note = classifier.classify("buy milk", None).await;
        assert_eq!(note.drop_type, DropType::Text);
        assert_eq!(note.suggested_collection, CollectionId::Inbox);
    }

    #[tokio::test]
    async fn test_forced_file_type_skips_backend() {
        let backend = backend(false);
        let classifier = Classifier::with_backend(backend.clone());

        let image = classifier.classify("data:image/png;base64,AAAA", Some(DropType::Image)).await;
        assert_eq!(image.suggested_collection, CollectionId::Images);
        let video = classifier.classify("blob:1", Some(DropType::Video)).await;
        assert_eq!(video.suggested_collection, CollectionId::Videos);
        let doc = classifier.classify("blob:2", Some(DropType::Document)).await;
        assert_eq!(doc.suggested_collection, CollectionId::Documents);

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_result_is_used() {
        let backend = backend(false);
        let classifier = Classifier::with_backend(backend.clone());

        let result = classifier.classify("fn main() {}", None).await;
        assert_eq!(result.drop_type, DropType::Snippet);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back() {
        let classifier = Classifier::with_backend(backend(true));
        let result = classifier.classify("https://example.com", None).await;
        assert_eq!(result, Classification::fallback("https://example.com"));
    }

    #[test]
    fn test_into_drop() {
        let drop = Classification::fallback("https://example.com").into_drop("https://example.com");
        assert_eq!(drop.collection_id, CollectionId::Links);
        assert!(drop.is_active());
        assert!(drop.metadata.is_some());
    }

    #[test]
    fn test_backend_json_shape() {
        let parsed: Classification = serde_json::from_value(serde_json::json!({
            "type": "url",
            "tags": ["news"],
            "suggestedCollectionId": "links",
            "metadata": { "title": "Hello", "siteName": "Example" }
        }))
        .unwrap();
        assert_eq!(parsed.drop_type, DropType::Url);
        assert_eq!(parsed.metadata.unwrap().site_name.as_deref(), Some("Example"));
    }
}
