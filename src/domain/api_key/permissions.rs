//! Capability map and whitelists attached to a credential

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Spending limits carried alongside the capability map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLimits {
    pub max_amount_per_transaction: u64,
    pub max_amount_per_day: u64,
    #[serde(default)]
    pub allowed_currencies: BTreeSet<String>,
}

impl Default for PermissionLimits {
    fn default() -> Self {
        Self {
            max_amount_per_transaction: 100_000,
            max_amount_per_day: 1_000_000,
            allowed_currencies: ["XAF", "EUR", "USD"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl PermissionLimits {
    /// Check whether a currency code is allowed (case-insensitive)
    pub fn allows_currency(&self, currency: &str) -> bool {
        self.allowed_currencies
            .contains(&currency.to_ascii_uppercase())
    }
}

/// Nested `{resource: {operation: allowed}}` capability map
///
/// Both levels are ordered maps, so two permission sets compare equal
/// regardless of the order in which entries were added.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    resources: BTreeMap<String, BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limits: Option<PermissionLimits>,
}

impl Permissions {
    /// Create an empty permission set (nothing allowed)
    pub fn new() -> Self {
        Self::default()
    }

    /// Permissions granted to a pair when the request does not specify any
    pub fn defaults() -> Self {
        Self::new()
            .with_operation("payments", "create", true)
            .with_operation("payments", "read", true)
            .with_operation("payments", "update", false)
            .with_operation("payments", "cancel", true)
            .with_operation("refunds", "create", true)
            .with_operation("refunds", "read", true)
            .with_operation("webhooks", "manage", false)
            .with_operation("reports", "access", true)
            .with_operation("reports", "export", false)
            .with_limits(PermissionLimits::default())
    }

    /// Set a single operation flag
    pub fn with_operation(
        mut self,
        resource: impl Into<String>,
        operation: impl Into<String>,
        allowed: bool,
    ) -> Self {
        self.set_operation(resource, operation, allowed);
        self
    }

    /// Set the spending limits
    pub fn with_limits(mut self, limits: PermissionLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn set_operation(
        &mut self,
        resource: impl Into<String>,
        operation: impl Into<String>,
        allowed: bool,
    ) {
        self.resources
            .entry(resource.into())
            .or_default()
            .insert(operation.into(), allowed);
    }

    pub fn resources(&self) -> &BTreeMap<String, BTreeMap<String, bool>> {
        &self.resources
    }

    pub fn limits(&self) -> Option<&PermissionLimits> {
        self.limits.as_ref()
    }

    /// Check an action of the form `<resource>.<operation>`
    ///
    /// Malformed actions and missing entries are denied.
    pub fn allows(&self, action: &str) -> bool {
        let Some((resource, operation)) = split_action(action) else {
            return false;
        };

        self.resources
            .get(resource)
            .and_then(|operations| operations.get(operation))
            .copied()
            .unwrap_or(false)
    }
}

fn split_action(action: &str) -> Option<(&str, &str)> {
    let mut parts = action.split('.');
    let resource = parts.next().filter(|p| !p.is_empty())?;
    let operation = parts.next().filter(|p| !p.is_empty())?;

    if parts.next().is_some() {
        return None;
    }

    Some((resource, operation))
}

/// Growable set of IP addresses or domains
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Whitelist(BTreeSet<String>);

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, returning true if it was not already present
    pub fn insert(&mut self, entry: &str) -> bool {
        let entry = entry.trim();

        if entry.is_empty() || self.0.contains(entry) {
            return false;
        }

        self.0.insert(entry.to_string())
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.contains(entry.trim())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for Whitelist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = Self::new();

        for entry in iter {
            list.insert(entry.as_ref());
        }

        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_permissions() {
        let permissions = Permissions::defaults();

        assert!(permissions.allows("payments.create"));
        assert!(permissions.allows("refunds.read"));
        assert!(!permissions.allows("payments.update"));
        assert!(!permissions.allows("webhooks.manage"));
        assert!(!permissions.allows("reports.export"));

        let limits = permissions.limits().unwrap();
        assert_eq!(limits.max_amount_per_transaction, 100_000);
        assert!(limits.allows_currency("xaf"));
        assert!(!limits.allows_currency("GBP"));
    }

    #[test]
    fn test_allows_rejects_malformed_actions() {
        let permissions = Permissions::defaults();

        assert!(!permissions.allows("payments"));
        assert!(!permissions.allows("payments.create.extra"));
        assert!(!permissions.allows(".create"));
        assert!(!permissions.allows("payments."));
        assert!(!permissions.allows("unknown.create"));
    }

    #[test]
    fn test_equality_is_order_independent() {
        let a = Permissions::new()
            .with_operation("refunds", "read", true)
            .with_operation("payments", "create", true);
        let b = Permissions::new()
            .with_operation("payments", "create", true)
            .with_operation("refunds", "read", true);

        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_operation("payments", "create", false));
    }

    #[test]
    fn test_whitelist_dedup_and_equality() {
        let mut list: Whitelist = ["10.0.0.2", "10.0.0.1"].into_iter().collect();

        assert!(!list.insert("10.0.0.1"));
        assert!(!list.insert("  "));
        assert!(list.insert("10.0.0.3"));
        assert_eq!(list.len(), 3);

        let reordered: Whitelist = ["10.0.0.3", "10.0.0.1", "10.0.0.2"].into_iter().collect();
        assert_eq!(list, reordered);
        assert_eq!(Whitelist::new(), Whitelist::default());
    }

    #[test]
    fn test_permissions_serde_shape() {
        let permissions = Permissions::new().with_operation("payments", "read", true);
        let json = serde_json::to_value(&permissions).unwrap();

        assert_eq!(json["resources"]["payments"]["read"], true);
        assert!(json.get("limits").is_none());

        let back: Permissions = serde_json::from_value(json).unwrap();
        assert_eq!(back, permissions);
    }
}
