//! Business, staff and service records the engine reads but never writes.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::StoreError;
use crate::limits::MAX_ADVANCE_NOTICE_DAYS;
use crate::model::*;
use crate::time::MINUTES_PER_DAY;
use crate::weekday;

/// Lookups for the records owned by collaborators.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn business(&self, id: Ulid) -> Result<Option<Business>, StoreError>;
    async fn staff(&self, id: Ulid) -> Result<Option<Staff>, StoreError>;
    async fn service(&self, id: Ulid) -> Result<Option<Service>, StoreError>;
}

/// On-disk shape of a catalog file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub businesses: Vec<Business>,
    #[serde(default)]
    pub staff: Vec<Staff>,
    #[serde(default)]
    pub services: Vec<Service>,
}

#[derive(Default)]
pub struct InMemoryDirectory {
    businesses: DashMap<Ulid, Business>,
    staff: DashMap<Ulid, Staff>,
    services: DashMap<Ulid, Service>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: Catalog) -> Result<Self, StoreError> {
        let dir = Self::new();
        for b in catalog.businesses {
            dir.insert_business(b)?;
        }
        for s in catalog.staff {
            dir.insert_staff(s)?;
        }
        for s in catalog.services {
            dir.insert_service(s)?;
        }
        Ok(dir)
    }

    /// Read a JSON catalog file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let catalog: Catalog = serde_json::from_str(&raw)
            .map_err(|e| StoreError::InvalidRecord(format!("{}: {e}", path.display())))?;
        Self::from_catalog(catalog)
    }

    pub fn insert_business(&self, business: Business) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for h in &business.business_hours {
            if !seen.insert(h.day) {
                return Err(invalid(format!(
                    "business {} lists {} twice",
                    business.id,
                    weekday::capitalized(h.day)
                )));
            }
            if h.is_open && h.open_time >= h.close_time {
                return Err(invalid(format!(
                    "business {} opens after it closes on {}",
                    business.id,
                    weekday::capitalized(h.day)
                )));
            }
        }
        self.businesses.insert(business.id, business);
        Ok(())
    }

    pub fn insert_staff(&self, staff: Staff) -> Result<(), StoreError> {
        for (day, entry) in &staff.availability {
            if entry.is_available && entry.start >= entry.end {
                return Err(invalid(format!(
                    "staff {} availability on {} ends before it starts",
                    staff.id,
                    weekday::lowercase(*day)
                )));
            }
        }
        self.staff.insert(staff.id, staff);
        Ok(())
    }

    pub fn insert_service(&self, service: Service) -> Result<(), StoreError> {
        if service.duration == 0 || service.duration >= MINUTES_PER_DAY {
            return Err(invalid(format!(
                "service {} has unusable duration {}",
                service.id, service.duration
            )));
        }
        if service.price.is_sign_negative() {
            return Err(invalid(format!("service {} has a negative price", service.id)));
        }
        if let Some(notice) = service.min_advance_booking
            && notice.as_duration() > Duration::days(MAX_ADVANCE_NOTICE_DAYS)
        {
            return Err(invalid(format!(
                "service {} demands more than {MAX_ADVANCE_NOTICE_DAYS} days of notice",
                service.id
            )));
        }
        self.services.insert(service.id, service);
        Ok(())
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.businesses.len(), self.staff.len(), self.services.len())
    }
}

fn invalid(msg: String) -> StoreError {
    StoreError::InvalidRecord(msg)
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn business(&self, id: Ulid) -> Result<Option<Business>, StoreError> {
        Ok(self.businesses.get(&id).map(|e| e.value().clone()))
    }

    async fn staff(&self, id: Ulid) -> Result<Option<Staff>, StoreError> {
        Ok(self.staff.get(&id).map(|e| e.value().clone()))
    }

    async fn service(&self, id: Ulid) -> Result<Option<Service>, StoreError> {
        Ok(self.services.get(&id).map(|e| e.value().clone()))
    }
}
