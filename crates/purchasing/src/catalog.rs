//! Configured product identifiers and the last fetched catalog snapshot.

use std::collections::HashSet;

use iapkit_core::{Product, ProductId, StoreError, StoreResult};

use crate::client::StoreClient;

/// Working identifier set plus the most recently fetched products.
///
/// Pure state; the engine owns one instance behind its state lock and performs
/// the store round-trip through [`fetch`] without holding that lock.
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    identifiers: Vec<ProductId>,
    products: Vec<Product>,
}

impl ProductCatalog {
    pub fn new(identifiers: impl IntoIterator<Item = ProductId>) -> Self {
        let mut catalog = Self::default();
        catalog.configure(identifiers);
        catalog
    }

    /// Replace the working identifier set (order kept, duplicates dropped).
    ///
    /// Does not fetch; the products snapshot is untouched until the next fetch.
    pub fn configure(&mut self, identifiers: impl IntoIterator<Item = ProductId>) {
        self.identifiers.clear();
        for id in identifiers {
            self.add_identifier(id);
        }
    }

    /// Append an identifier. Returns `false` if it was already configured.
    pub fn add_identifier(&mut self, id: ProductId) -> bool {
        if self.identifiers.contains(&id) {
            return false;
        }
        self.identifiers.push(id);
        true
    }

    pub fn identifiers(&self) -> &[ProductId] {
        &self.identifiers
    }

    /// Replace the fetched snapshot wholesale.
    ///
    /// An empty fetch is rejected with [`StoreError::EmptyCatalog`] and leaves the
    /// previous snapshot in place. Duplicate identifiers keep their first entry.
    pub fn install(&mut self, fetched: Vec<Product>) -> StoreResult<&[Product]> {
        if fetched.is_empty() {
            return Err(StoreError::EmptyCatalog);
        }

        let mut seen = HashSet::with_capacity(fetched.len());
        let products: Vec<Product> = fetched
            .into_iter()
            .filter(|p| seen.insert(p.id().clone()))
            .collect();

        self.products = products;
        Ok(&self.products)
    }

    pub fn lookup(&self, id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|p| p.id() == id)
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// Ask the store for `identifiers` and reject an empty answer.
pub async fn fetch<S>(store: &S, identifiers: &[ProductId]) -> StoreResult<Vec<Product>>
where
    S: StoreClient + ?Sized,
{
    let products = store.fetch_catalog(identifiers).await?;
    if products.is_empty() {
        tracing::warn!(
            identifiers = identifiers.len(),
            "store returned no products for configured identifiers"
        );
        return Err(StoreError::EmptyCatalog);
    }
    Ok(products)
}
