//! Field extraction from one rendered item tile
//!
//! Each field walks its selector list in priority order and takes the first
//! non-empty value. Missing fields trigger a retry of the whole item (lazy
//! content often fills in a moment later); fields already found are kept.
//! A field that never resolves stays `None`.

use scraper::Selector;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

use crate::domain::{ProductField, ProductRecord, SiteConfig};
use crate::infrastructure::rendering::{ItemHandle, RenderResult};
use crate::infrastructure::retry_policy::RetryPolicy;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("site '{site}': {field} has no selectors")]
    NoSelectors { site: String, field: ProductField },

    #[error("site '{site}': invalid selector '{selector}': {reason}")]
    InvalidSelector {
        site: String,
        selector: String,
        reason: String,
    },
}

/// Reject selectors a CSS parser cannot read
pub fn check_selector(site: &str, selector: &str) -> Result<(), ExtractionError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ExtractionError::InvalidSelector {
            site: site.to_string(),
            selector: selector.to_string(),
            reason: e.to_string(),
        })
}

/// Absolute image URL; values that cannot be resolved are kept as found
pub fn resolve_image_url(page_url: Option<&str>, src: &str) -> String {
    if Url::parse(src).is_ok() {
        return src.to_string();
    }
    page_url
        .and_then(|base| Url::parse(base).ok())
        .and_then(|base| base.join(src).ok())
        .map_or_else(|| src.to_string(), String::from)
}

#[derive(Debug, Clone)]
pub struct FieldExtractor {
    site: SiteConfig,
    policy: RetryPolicy,
}

impl FieldExtractor {
    pub fn for_site(site: &SiteConfig) -> Result<Self, ExtractionError> {
        for field in ProductField::ALL {
            let selectors = site.field_selectors.for_field(field);
            if selectors.is_empty() {
                return Err(ExtractionError::NoSelectors {
                    site: site.name.clone(),
                    field,
                });
            }
            for selector in selectors {
                check_selector(&site.name, selector)?;
            }
        }

        Ok(Self {
            site: site.clone(),
            policy: RetryPolicy::for_extraction(&site.tuning),
        })
    }

    /// Extract one item. Only fatal renderer errors are returned; everything
    /// else degrades to an absent field.
    pub async fn extract<I: ItemHandle>(&self, item: &I, page_url: Option<&str>) -> RenderResult<ProductRecord> {
        let mut record = ProductRecord::new(&self.site.source_label);
        let mut attempt = 1;

        loop {
            for field in ProductField::ALL {
                if record.field(field).is_some() {
                    continue;
                }
                let value = self.resolve(item, field).await?;
                record.set_field(field, value);
            }

            if record.is_complete() || !self.policy.has_attempts_left(attempt) {
                break;
            }
            debug!(
                site = %self.site.name,
                attempt,
                "Item incomplete ({}/3 fields), retrying",
                record.resolved_count()
            );
            sleep(self.policy.delay).await;
            attempt += 1;
        }

        if let Some(src) = record.image.take() {
            record.image = Some(resolve_image_url(page_url, &src));
        }
        Ok(record)
    }

    async fn resolve<I: ItemHandle>(&self, item: &I, field: ProductField) -> RenderResult<Option<String>> {
        for selector in self.site.field_selectors.for_field(field) {
            let found = match field {
                ProductField::Image => item.find_attribute(selector, &self.site.image_attribute).await,
                ProductField::Name | ProductField::Price => item.find_text(selector).await,
            };
            match found {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => continue,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(site = %self.site.name, %field, selector = %selector, "Lookup failed: {}", e);
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AcceptancePolicy, FieldSelectors, PaginationStyle, ReadinessStrategy, SiteTuning};
    use crate::infrastructure::rendering::{RenderError, SnapshotItem};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn site() -> SiteConfig {
        SiteConfig {
            name: "shop".to_string(),
            enabled: true,
            source_label: "SiteA".to_string(),
            base_url_template: "https://shop.test/?page={page}".to_string(),
            pagination_style: PaginationStyle::Path,
            page_size: 10,
            start_page: 0,
            max_pages: 1,
            item_selector: "div.item".to_string(),
            field_selectors: FieldSelectors {
                image: vec!["img.main".to_string(), "img".to_string()],
                name: vec!["h3.title > a".to_string(), "h2".to_string()],
                price: vec!["span.price".to_string()],
            },
            image_attribute: "src".to_string(),
            readiness_strategy: ReadinessStrategy::ElementPresent {
                selector: "div.grid".to_string(),
            },
            record_acceptance_policy: AcceptancePolicy::AnyField,
            scroll_items_into_view: false,
            tuning: SiteTuning::immediate(),
        }
    }

    #[tokio::test]
    async fn test_fallback_selector_wins_when_primary_missing() {
        let extractor = FieldExtractor::for_site(&site()).unwrap();
        let item = SnapshotItem::new(
            r#"<div class="item"><img src="/p/milk.png"><h2>Milk 1L</h2><span class="price">R 24.99</span></div>"#,
        );

        let record = extractor.extract(&item, Some("https://shop.test/?page=0")).await.unwrap();

        assert_eq!(record.name.as_deref(), Some("Milk 1L"));
        assert_eq!(record.price.as_deref(), Some("R 24.99"));
        assert_eq!(record.image.as_deref(), Some("https://shop.test/p/milk.png"));
        assert_eq!(record.source, "SiteA");
    }

    #[tokio::test]
    async fn test_missing_field_is_absent_not_error() {
        let extractor = FieldExtractor::for_site(&site()).unwrap();
        let item = SnapshotItem::new(r#"<div class="item"><h2>Milk 1L</h2><img src="http://x/img.png"></div>"#);

        let record = extractor.extract(&item, None).await.unwrap();

        assert_eq!(record.price, None);
        assert_eq!(record.image.as_deref(), Some("http://x/img.png"));
        assert!(AcceptancePolicy::AnyField.accepts(&record));
        assert!(!AcceptancePolicy::AllFields.accepts(&record));
    }

    /// Price appears only after `price_from` looks, like lazily rendered content
    struct LazyItem {
        looks: AtomicU32,
        price_from: u32,
    }

    #[async_trait]
    impl ItemHandle for LazyItem {
        async fn find_text(&self, selector: &str) -> RenderResult<Option<String>> {
            match selector {
                "h2" => Ok(Some("Rice 2kg".to_string())),
                "span.price" => {
                    let look = self.looks.fetch_add(1, Ordering::SeqCst);
                    Ok((look >= self.price_from).then(|| "R39.99".to_string()))
                }
                _ => Ok(None),
            }
        }

        async fn find_attribute(&self, _selector: &str, _attribute: &str) -> RenderResult<Option<String>> {
            Ok(Some("http://x/rice.png".to_string()))
        }
    }

    #[tokio::test]
    async fn test_retry_picks_up_late_fields() {
        let extractor = FieldExtractor::for_site(&site()).unwrap();
        let item = LazyItem { looks: AtomicU32::new(0), price_from: 1 };

        let record = extractor.extract(&item, None).await.unwrap();

        assert!(record.is_complete());
        assert_eq!(record.price.as_deref(), Some("R39.99"));
        assert_eq!(item.looks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_configured_attempts() {
        let extractor = FieldExtractor::for_site(&site()).unwrap();
        let item = LazyItem { looks: AtomicU32::new(0), price_from: u32::MAX };

        let record = extractor.extract(&item, None).await.unwrap();

        assert_eq!(record.price, None);
        assert_eq!(record.name.as_deref(), Some("Rice 2kg"));
        assert_eq!(item.looks.load(Ordering::SeqCst), site().tuning.extraction_attempts);
        assert_eq!(item.looks.load(Ordering::SeqCst), 3);
    }

    struct DeadItem;

    #[async_trait]
    impl ItemHandle for DeadItem {
        async fn find_text(&self, _selector: &str) -> RenderResult<Option<String>> {
            Err(RenderError::SessionLost("invalid session id".to_string()))
        }

        async fn find_attribute(&self, _selector: &str, _attribute: &str) -> RenderResult<Option<String>> {
            Err(RenderError::SessionLost("invalid session id".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fatal_errors_propagate() {
        let extractor = FieldExtractor::for_site(&site()).unwrap();
        let err = extractor.extract(&DeadItem, None).await.unwrap_err();
        assert!(matches!(err, RenderError::SessionLost(_)));
    }

    #[test]
    fn test_invalid_selector_rejected_up_front() {
        let mut site = site();
        site.field_selectors.price = vec!["span..price".to_string()];
        assert!(matches!(
            FieldExtractor::for_site(&site),
            Err(ExtractionError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_resolve_image_url() {
        assert_eq!(resolve_image_url(None, "http://cdn/x.png"), "http://cdn/x.png");
        assert_eq!(
            resolve_image_url(Some("https://shop.test/cat/food?page=1"), "//cdn.shop.test/x.png"),
            "https://cdn.shop.test/x.png"
        );
        assert_eq!(resolve_image_url(None, "/x.png"), "/x.png");
    }
}
