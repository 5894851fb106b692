use std::collections::BTreeMap;

use crate::errors::AppError;

/// Static permission name -> numeric code registry.
///
/// Loaded once at startup from the `PERMISSIONS` environment variable
/// (`name:code,name:code,...`) and shared read-only through `AppState`.
/// A malformed entry aborts startup instead of producing a bogus code.
#[derive(Debug, Clone)]
pub struct PermissionRegistry {
    codes: BTreeMap<String, i64>,
}

impl PermissionRegistry {
    pub fn from_env() -> Result<Self, AppError> {
        let raw = std::env::var("PERMISSIONS")
            .map_err(|_| AppError::configuration("PERMISSIONS not set"))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let mut codes = BTreeMap::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, code) = entry.split_once(':').ok_or_else(|| {
                AppError::configuration(format!("permission entry '{entry}' missing ':'"))
            })?;

            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::configuration(format!(
                    "permission entry '{entry}' has an empty name"
                )));
            }

            let code = code.trim().parse::<i64>().map_err(|_| {
                AppError::configuration(format!(
                    "permission '{name}' has a non-numeric code '{}'",
                    code.trim()
                ))
            })?;

            if codes.insert(name.to_string(), code).is_some() {
                return Err(AppError::configuration(format!(
                    "permission '{name}' declared more than once"
                )));
            }
        }

        if codes.is_empty() {
            return Err(AppError::configuration("PERMISSIONS defines no entries"));
        }

        Ok(Self { codes })
    }

    pub fn code_for(&self, name: &str) -> Option<i64> {
        self.codes.get(name).copied()
    }

    /// True iff every code in the set is a registered permission code.
    pub fn is_valid_set(&self, codes: &[i64]) -> bool {
        codes.iter().all(|c| self.codes.values().any(|v| v == c))
    }

    pub fn as_map(&self) -> &BTreeMap<String, i64> {
        &self.codes
    }
}
