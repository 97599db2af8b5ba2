//! Search criteria, lookup parameters, and canonical cache keys.

use crate::types::{RegistryError, RegistryResult};

const BUSINESS_ID_DIGITS: usize = 8;
const VAT_ID_DIGITS: usize = 11;

/// What a single registry search is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// 8-digit business id (MBO).
    BusinessId(String),
    /// 11-digit owner VAT id (OIB).
    OwnerVatId(String),
    /// Free-text trade name.
    BusinessName(String),
    /// Registry id already resolved by an earlier search. Skips the listing.
    RegistryId(String),
}

impl SearchCriteria {
    pub fn business_id(value: &str) -> RegistryResult<Self> {
        check_digits("id", value, BUSINESS_ID_DIGITS)?;
        Ok(Self::BusinessId(value.to_string()))
    }

    pub fn owner_vat_id(value: &str) -> RegistryResult<Self> {
        check_digits("vatId", value, VAT_ID_DIGITS)?;
        Ok(Self::OwnerVatId(value.to_string()))
    }

    pub fn business_name(value: &str) -> RegistryResult<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(RegistryError::validation("name", "Must not be empty"));
        }
        Ok(Self::BusinessName(value.to_string()))
    }

    pub fn registry_id(value: &str) -> RegistryResult<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(RegistryError::validation("portorId", "Must not be empty"));
        }
        Ok(Self::RegistryId(value.to_string()))
    }

    /// Classify a free-text search query by its shape.
    ///
    /// Exactly 8 digits is a business id, exactly 11 digits an owner VAT id,
    /// anything else is searched as a trade name.
    pub fn from_query(query: &str) -> RegistryResult<Self> {
        let query = query.trim();
        if is_digits(query, BUSINESS_ID_DIGITS) {
            Ok(Self::BusinessId(query.to_string()))
        } else if is_digits(query, VAT_ID_DIGITS) {
            Ok(Self::OwnerVatId(query.to_string()))
        } else {
            Self::business_name(query)
        }
    }
}

/// Parameters of a single-record detail lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupParams {
    pub registry_id: Option<String>,
    pub business_id: Option<String>,
    pub vat_id: Option<String>,
}

impl LookupParams {
    /// Validate and resolve to the authoritative criteria.
    ///
    /// Precedence is registry id, then business id, then VAT id. Every
    /// supplied value is format-checked even when it is not the one used.
    pub fn criteria(&self) -> RegistryResult<SearchCriteria> {
        let registry_id = non_empty(&self.registry_id);
        let business_id = non_empty(&self.business_id);
        let vat_id = non_empty(&self.vat_id);

        if let Some(vat_id) = vat_id {
            check_digits("vatId", vat_id, VAT_ID_DIGITS)?;
        }
        if let Some(business_id) = business_id {
            check_digits("id", business_id, BUSINESS_ID_DIGITS)?;
        }

        match (registry_id, business_id, vat_id) {
            (Some(registry_id), _, _) => SearchCriteria::registry_id(registry_id),
            (None, Some(business_id), _) => Ok(SearchCriteria::BusinessId(business_id.to_string())),
            (None, None, Some(vat_id)) => Ok(SearchCriteria::OwnerVatId(vat_id.to_string())),
            (None, None, None) => Err(RegistryError::validation(
                "id",
                "One of portorId, id or vatId must be present",
            )),
        }
    }

    /// Canonical detail cache key, independent of how the caller ordered
    /// its parameters.
    pub fn cache_key(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("portorId", non_empty(&self.registry_id).unwrap_or(""))
            .append_pair("id", non_empty(&self.business_id).unwrap_or(""))
            .append_pair("vatId", non_empty(&self.vat_id).unwrap_or(""))
            .finish()
    }
}

/// Canonical search cache key.
pub fn search_cache_key(query: &str, page: u32) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("query", query.trim())
        .append_pair("page", &page.to_string())
        .finish()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn is_digits(value: &str, count: usize) -> bool {
    value.len() == count && value.bytes().all(|b| b.is_ascii_digit())
}

fn check_digits(parameter: &str, value: &str, count: usize) -> RegistryResult<()> {
    if is_digits(value, count) {
        Ok(())
    } else {
        Err(RegistryError::validation(
            parameter,
            format!("Must be {count} digits"),
        ))
    }
}
