//! Declarative description of one retailer listing
//!
//! Every per-site difference (URL scheme, selectors, readiness signal,
//! acceptance policy, timing) lives in a [`SiteConfig`] so that a single
//! extraction engine can walk all retailers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

use super::product::{ProductField, ProductRecord};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([a-z_]*)\}").expect("placeholder pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SiteConfigError {
    #[error("site '{site}': {field} must not be empty")]
    Empty { site: String, field: String },

    #[error("site '{site}': template '{template}' is missing the {{{placeholder}}} placeholder")]
    MissingPlaceholder {
        site: String,
        template: String,
        placeholder: String,
    },

    #[error("site '{site}': template uses placeholder {{{placeholder}}} that its pagination style does not fill")]
    UnknownPlaceholder { site: String, placeholder: String },

    #[error("site '{site}': {field} must be greater than zero")]
    Zero { site: String, field: String },
}

/// How successive listing pages are addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStyle {
    /// `{page}` is replaced by the page index
    Path,
    /// `{offset}` is replaced by `page * page_size`, `{page_size}` by the page size
    Offset,
}

/// Signal that a listing page has finished loading its dynamic content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessStrategy {
    /// A container element is present
    ElementPresent { selector: String },
    /// Scroll to the bottom until the document height stops growing
    InfiniteScroll {
        #[serde(default)]
        container: Option<String>,
        #[serde(default = "defaults::scroll_settle_ms")]
        settle_ms: u64,
        #[serde(default = "defaults::max_scrolls")]
        max_scrolls: u32,
    },
}

/// Which partial records survive extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptancePolicy {
    /// Keep a record when at least one field resolved
    AnyField,
    /// Keep a record only when image, name and price all resolved
    AllFields,
}

impl AcceptancePolicy {
    pub fn accepts(&self, record: &ProductRecord) -> bool {
        match self {
            AcceptancePolicy::AnyField => !record.is_empty(),
            AcceptancePolicy::AllFields => record.is_complete(),
        }
    }
}

/// Ordered selector strategies per field; the first non-empty hit wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelectors {
    pub image: Vec<String>,
    pub name: Vec<String>,
    pub price: Vec<String>,
}

impl FieldSelectors {
    pub fn for_field(&self, field: ProductField) -> &[String] {
        match field {
            ProductField::Image => &self.image,
            ProductField::Name => &self.name,
            ProductField::Price => &self.price,
        }
    }
}

/// Timing and retry knobs, all per site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteTuning {
    /// Timeout for navigation and for each readiness wait
    pub wait_timeout_ms: u64,
    /// Navigation/wait attempts per page before the page is skipped
    pub page_attempts: u32,
    /// Fixed backoff between page attempts
    pub page_backoff_ms: u64,
    /// Delay before each page after the first
    pub page_delay_ms: u64,
    /// Uniform random extra delay added to `page_delay_ms`
    pub page_delay_jitter_ms: u64,
    /// Whole-item extraction attempts while fields are missing
    pub extraction_attempts: u32,
    pub extraction_retry_delay_ms: u64,
    /// Pause after scrolling an item into view
    pub item_settle_ms: u64,
    /// Stop the walk after this many skipped pages in a row
    pub max_consecutive_failures: u32,
}

impl Default for SiteTuning {
    fn default() -> Self {
        Self {
            wait_timeout_ms: defaults::WAIT_TIMEOUT_MS,
            page_attempts: defaults::PAGE_ATTEMPTS,
            page_backoff_ms: defaults::PAGE_BACKOFF_MS,
            page_delay_ms: defaults::PAGE_DELAY_MS,
            page_delay_jitter_ms: 0,
            extraction_attempts: defaults::EXTRACTION_ATTEMPTS,
            extraction_retry_delay_ms: defaults::EXTRACTION_RETRY_DELAY_MS,
            item_settle_ms: 0,
            max_consecutive_failures: defaults::MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl SiteTuning {
    /// Zero delays and one backoff-free retry cycle, for offline replays and tests
    pub fn immediate() -> Self {
        Self {
            wait_timeout_ms: 1_000,
            page_backoff_ms: 0,
            page_delay_ms: 0,
            page_delay_jitter_ms: 0,
            extraction_retry_delay_ms: 0,
            item_settle_ms: 0,
            ..Self::default()
        }
    }
}

pub mod defaults {
    pub const WAIT_TIMEOUT_MS: u64 = 30_000;
    pub const PAGE_ATTEMPTS: u32 = 3;
    pub const PAGE_BACKOFF_MS: u64 = 5_000;
    pub const PAGE_DELAY_MS: u64 = 1_000;
    pub const EXTRACTION_ATTEMPTS: u32 = 3;
    pub const EXTRACTION_RETRY_DELAY_MS: u64 = 500;
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;
    pub const IMAGE_ATTRIBUTE: &str = "src";

    pub fn scroll_settle_ms() -> u64 {
        2_000
    }

    pub fn max_scrolls() -> u32 {
        30
    }

    pub fn image_attribute() -> String {
        IMAGE_ATTRIBUTE.to_string()
    }

    pub fn enabled() -> bool {
        true
    }
}

/// One retailer listing to walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Short unique name used in logs and on the command line
    pub name: String,
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    /// Retailer label stored with every product
    pub source_label: String,
    pub base_url_template: String,
    pub pagination_style: PaginationStyle,
    pub page_size: u32,
    #[serde(default)]
    pub start_page: u32,
    pub max_pages: u32,
    pub item_selector: String,
    pub field_selectors: FieldSelectors,
    #[serde(default = "defaults::image_attribute")]
    pub image_attribute: String,
    pub readiness_strategy: ReadinessStrategy,
    pub record_acceptance_policy: AcceptancePolicy,
    #[serde(default)]
    pub scroll_items_into_view: bool,
    #[serde(default)]
    pub tuning: SiteTuning,
}

impl SiteConfig {
    /// Page indices visited by a walk, in order
    pub fn page_indices(&self) -> Range<u32> {
        self.start_page..self.start_page.saturating_add(self.max_pages)
    }

    /// Listing URL for a page index
    pub fn page_url(&self, page: u32) -> String {
        match self.pagination_style {
            PaginationStyle::Path => self.base_url_template.replace("{page}", &page.to_string()),
            PaginationStyle::Offset => {
                let offset = u64::from(page) * u64::from(self.page_size);
                self.base_url_template
                    .replace("{offset}", &offset.to_string())
                    .replace("{page_size}", &self.page_size.to_string())
            }
        }
    }

    pub fn validate(&self) -> Result<(), SiteConfigError> {
        let empty = |field: &str| SiteConfigError::Empty {
            site: self.name.clone(),
            field: field.to_string(),
        };
        let zero = |field: &str| SiteConfigError::Zero {
            site: self.name.clone(),
            field: field.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(empty("name"));
        }
        if self.source_label.trim().is_empty() {
            return Err(empty("source_label"));
        }
        if self.item_selector.trim().is_empty() {
            return Err(empty("item_selector"));
        }
        for field in ProductField::ALL {
            let selectors = self.field_selectors.for_field(field);
            if selectors.is_empty() || selectors.iter().any(|s| s.trim().is_empty()) {
                return Err(empty(&format!("field_selectors.{field}")));
            }
        }
        if self.max_pages == 0 {
            return Err(zero("max_pages"));
        }
        if self.tuning.page_attempts == 0 {
            return Err(zero("tuning.page_attempts"));
        }
        if self.tuning.extraction_attempts == 0 {
            return Err(zero("tuning.extraction_attempts"));
        }

        // Only placeholders `page_url` substitutes for the style are allowed
        let (required, allowed): (&[&str], &[&str]) = match self.pagination_style {
            PaginationStyle::Path => (&["page"], &["page"]),
            PaginationStyle::Offset => {
                if self.page_size == 0 {
                    return Err(zero("page_size"));
                }
                (&["offset"], &["offset", "page_size"])
            }
        };
        for placeholder in required {
            if !self.base_url_template.contains(&format!("{{{placeholder}}}")) {
                return Err(SiteConfigError::MissingPlaceholder {
                    site: self.name.clone(),
                    template: self.base_url_template.clone(),
                    placeholder: (*placeholder).to_string(),
                });
            }
        }
        for capture in PLACEHOLDER.captures_iter(&self.base_url_template) {
            let placeholder = &capture[1];
            if !allowed.contains(&placeholder) {
                return Err(SiteConfigError::UnknownPlaceholder {
                    site: self.name.clone(),
                    placeholder: placeholder.to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn site(style: PaginationStyle, template: &str) -> SiteConfig {
        SiteConfig {
            name: "test".to_string(),
            enabled: true,
            source_label: "SiteA".to_string(),
            base_url_template: template.to_string(),
            pagination_style: style,
            page_size: 24,
            start_page: 0,
            max_pages: 3,
            item_selector: "div.item".to_string(),
            field_selectors: FieldSelectors {
                image: vec!["img".to_string()],
                name: vec!["h3".to_string()],
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

    #[test]
    fn path_pagination_substitutes_page_number() {
        let site = site(PaginationStyle::Path, "https://shop.test/food?page={page}");
        assert_eq!(site.page_url(2), "https://shop.test/food?page=2");
    }

    #[test]
    fn offset_pagination_multiplies_by_page_size() {
        let site = site(
            PaginationStyle::Offset,
            "https://shop.test/cat?No={offset}&Nrpp={page_size}",
        );
        assert_eq!(site.page_url(0), "https://shop.test/cat?No=0&Nrpp=24");
        assert_eq!(site.page_url(3), "https://shop.test/cat?No=72&Nrpp=24");
    }

    #[test]
    fn page_indices_start_at_start_page() {
        let mut site = site(PaginationStyle::Path, "https://shop.test/?p={page}");
        site.start_page = 1;
        assert_eq!(site.page_indices().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[rstest]
    #[case(PaginationStyle::Path, "https://shop.test/food", "page")]
    #[case(PaginationStyle::Offset, "https://shop.test/cat?Nrpp={page_size}", "offset")]
    fn missing_placeholder_is_rejected(
        #[case] style: PaginationStyle,
        #[case] template: &str,
        #[case] placeholder: &str,
    ) {
        let err = site(style, template).validate().unwrap_err();
        assert!(matches!(
            err,
            SiteConfigError::MissingPlaceholder { placeholder: ref p, .. } if p == placeholder
        ));
    }

    #[rstest]
    #[case(PaginationStyle::Path, "https://shop.test/{category}?page={page}", "category")]
    #[case(PaginationStyle::Path, "https://shop.test/food?page={page}&size={page_size}", "page_size")]
    #[case(PaginationStyle::Path, "https://shop.test/food?page={page}&from={offset}", "offset")]
    #[case(PaginationStyle::Offset, "https://shop.test/cat?No={offset}&p={page}", "page")]
    fn placeholder_not_filled_by_style_is_rejected(
        #[case] style: PaginationStyle,
        #[case] template: &str,
        #[case] placeholder: &str,
    ) {
        let err = site(style, template).validate().unwrap_err();
        assert!(matches!(
            err,
            SiteConfigError::UnknownPlaceholder { placeholder: ref p, .. } if p == placeholder
        ));
    }

    #[rstest]
    #[case(PaginationStyle::Path, "https://shop.test/food?page={page}")]
    #[case(PaginationStyle::Offset, "https://shop.test/cat?No={offset}&Nrpp={page_size}")]
    #[case(PaginationStyle::Offset, "https://shop.test/cat?No={offset}")]
    fn valid_templates_leave_no_placeholder_behind(
        #[case] style: PaginationStyle,
        #[case] template: &str,
    ) {
        let site = site(style, template);
        assert_eq!(site.validate(), Ok(()));
        for page in 0..3 {
            assert!(!PLACEHOLDER.is_match(&site.page_url(page)));
        }
    }

    #[test]
    fn empty_selector_list_is_rejected() {
        let mut site = site(PaginationStyle::Path, "https://shop.test/?page={page}");
        site.field_selectors.price.clear();
        assert_eq!(
            site.validate(),
            Err(SiteConfigError::Empty {
                site: "test".to_string(),
                field: "field_selectors.price".to_string(),
            })
        );
    }

    #[rstest]
    #[case(AcceptancePolicy::AnyField, true)]
    #[case(AcceptancePolicy::AllFields, false)]
    fn partial_records_follow_acceptance_policy(
        #[case] policy: AcceptancePolicy,
        #[case] kept: bool,
    ) {
        let record = ProductRecord::new("SiteA")
            .with_name("Milk 1L")
            .with_image("http://x/img.png");
        assert_eq!(policy.accepts(&record), kept);
    }

    #[test]
    fn empty_records_are_never_accepted() {
        let record = ProductRecord::new("SiteA");
        assert!(!AcceptancePolicy::AnyField.accepts(&record));
        assert!(!AcceptancePolicy::AllFields.accepts(&record));
    }

    #[test]
    fn readiness_strategy_reads_tagged_json() {
        let strategy: ReadinessStrategy = serde_json::from_str(
            r#"{"kind": "infinite_scroll", "container": "div.banner-wrapper"}"#,
        )
        .unwrap();
        assert_eq!(
            strategy,
            ReadinessStrategy::InfiniteScroll {
                container: Some("div.banner-wrapper".to_string()),
                settle_ms: 2_000,
                max_scrolls: 30,
            }
        );
    }

    proptest! {
        #[test]
        fn offset_urls_are_distinct_per_page(page in 0u32..10_000, size in 1u32..500) {
            let mut site = site(PaginationStyle::Offset, "https://shop.test/?No={offset}");
            site.page_size = size;
            let expected = format!("https://shop.test/?No={}", u64::from(page) * u64::from(size));
            prop_assert_eq!(site.page_url(page), expected);
            prop_assert_ne!(site.page_url(page), site.page_url(page + 1));
        }
    }
}
