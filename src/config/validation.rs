//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check TLS declarations are complete
//! - Check sub-path stores are well formed and do not overlap
//! - Validate value ranges (rates > 0, GC settings consistent)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RegistryConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - A missing default root is NOT a validation error here; storage
//!   resolution reports it as `NoStorageConfigured`

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use crate::config::schema::{RegistryConfig, StoreConfig};
use crate::storage::topology::normalize_route;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RegistryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(tls) = &config.http.tls {
        match (&tls.cert, &tls.key) {
            (Some(_), None) => errors.push(ValidationError::new("http.tls.key", "cert given without key")),
            (None, Some(_)) => errors.push(ValidationError::new("http.tls.cert", "key given without cert")),
            (None, None) if tls.ca_cert.is_some() => {
                errors.push(ValidationError::new("http.tls.ca_cert", "client CA requires cert and key"))
            }
            _ => {}
        }
    }

    if let Some(limits) = &config.http.rate_limit {
        if limits.rate == Some(0) {
            errors.push(ValidationError::new("http.rate_limit.rate", "must be greater than zero"));
        }
        for (i, method) in limits.methods.iter().enumerate() {
            let field = format!("http.rate_limit.methods[{i}]");
            if method.rate == 0 {
                errors.push(ValidationError::new(&field, "rate must be greater than zero"));
            }
            if method.method.parse::<axum::http::Method>().is_err() || method.method.is_empty() {
                errors.push(ValidationError::new(&field, format!("unknown method {:?}", method.method)));
            }
        }
    }

    validate_store("storage", &config.storage.store, &mut errors);

    let mut roots: HashSet<PathBuf> = HashSet::new();
    if let Some(root) = &config.storage.store.root_directory {
        roots.insert(root.clone());
    }

    let mut routes: HashSet<&str> = HashSet::new();
    for (route, store) in &config.storage.sub_paths {
        let field = format!("storage.sub_paths.{route}");
        let normalized = normalize_route(route);
        if normalized.is_empty() {
            errors.push(ValidationError::new(&field, "route name must not be empty"));
        } else if !routes.insert(normalized) {
            errors.push(ValidationError::new(
                &field,
                format!("route {normalized} is declared more than once"),
            ));
        }
        match &store.root_directory {
            None => errors.push(ValidationError::new(&field, "root_directory is required")),
            Some(root) => {
                if !roots.insert(root.clone()) {
                    errors.push(ValidationError::new(
                        &field,
                        format!("root_directory {} is already used by another store", root.display()),
                    ));
                }
            }
        }
        validate_store(&field, store, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_store(field: &str, store: &StoreConfig, errors: &mut Vec<ValidationError>) {
    if store.gc_interval_secs > 0 && !store.gc {
        errors.push(ValidationError::new(
            format!("{field}.gc_interval_secs"),
            "periodic GC requires gc = true",
        ));
    }

    if let Some(params) = &store.storage_driver {
        if !params.contains_key("name") {
            errors.push(ValidationError::new(
                format!("{field}.storage_driver"),
                "driver table must carry a name",
            ));
        }
    }
}
