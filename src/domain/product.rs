use serde::{Deserialize, Serialize};
use std::fmt;

/// The three fields a listing tile can provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductField {
    Image,
    Name,
    Price,
}

impl ProductField {
    /// Extraction order
    pub const ALL: [ProductField; 3] = [ProductField::Image, ProductField::Name, ProductField::Price];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductField::Image => "image",
            ProductField::Name => "name",
            ProductField::Price => "price",
        }
    }
}

impl fmt::Display for ProductField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A product as extracted from one listing tile, not yet persisted.
///
/// Every field may be absent: the site's acceptance policy decides whether a
/// partial record is kept, and the store decides whether it can be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub image: Option<String>,
    pub name: Option<String>,
    /// Free-form price text exactly as rendered ("R 24.99", "R10/kg", ...)
    pub price: Option<String>,
    /// Retailer label, part of the product identity
    pub source: String,
}

impl ProductRecord {
    /// Empty record for a retailer
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            image: None,
            name: None,
            price: None,
            source: source.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price = Some(price.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn field(&self, field: ProductField) -> Option<&str> {
        match field {
            ProductField::Image => self.image.as_deref(),
            ProductField::Name => self.name.as_deref(),
            ProductField::Price => self.price.as_deref(),
        }
    }

    pub fn set_field(&mut self, field: ProductField, value: Option<String>) {
        match field {
            ProductField::Image => self.image = value,
            ProductField::Name => self.name = value,
            ProductField::Price => self.price = value,
        }
    }

    /// Number of fields that resolved
    pub fn resolved_count(&self) -> usize {
        ProductField::ALL
            .iter()
            .filter(|field| self.field(**field).is_some())
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.resolved_count() == ProductField::ALL.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved_count() == 0
    }

    /// The name if it can be used as an identity key (present and non-blank)
    pub fn storable_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.trim().is_empty())
    }
}

/// Persisted catalog row. `id` is assigned on first insert and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProduct {
    pub id: i64,
    pub image: Option<String>,
    pub name: String,
    pub price: Option<String>,
    pub source: String,
}

impl StoredProduct {
    /// True when price and image are byte-identical to the incoming record
    pub fn matches(&self, record: &ProductRecord) -> bool {
        self.price == record.price && self.image == record.image
    }
}

/// Result of reconciling one record against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Unchanged => "unchanged",
        };
        f.write_str(label)
    }
}
