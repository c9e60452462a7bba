//! View-based Access Control Model (RFC 3415).
//!
//! VACM controls access through three tables:
//! 1. Security-to-Group: maps (securityModel, securityName) → groupName
//! 2. Access: maps (groupName, contextPrefix, securityModel, securityLevel)
//!    → read/write/notify views
//! 3. View Tree Family: defines views as OID subtree collections

use std::collections::HashMap;

use bytes::Bytes;

use crate::message::SecurityLevel;
use crate::oid::Oid;

/// Security model identifiers (RFC 3411).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SecurityModel {
    /// Wildcard for VACM matching (matches any model).
    Any = 0,
    /// SNMPv1.
    V1 = 1,
    /// SNMPv2c.
    V2c = 2,
    /// SNMPv3 User-based Security Model.
    Usm = 3,
}

impl std::str::FromStr for SecurityModel {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "v1" => Ok(Self::V1),
            "v2c" => Ok(Self::V2c),
            "usm" | "v3" => Ok(Self::Usm),
            _ => Err(crate::error::Error::Config(format!(
                "unknown security model '{}'; expected any, v1, v2c, or usm",
                s
            ))),
        }
    }
}

/// Operation class for access decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Notify,
}

/// Context matching mode for access entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextMatch {
    /// Exact context name match.
    #[default]
    Exact,
    /// Context name prefix match.
    Prefix,
}

/// A view is an ordered collection of OID subtrees.
#[derive(Debug, Clone, Default)]
pub struct View {
    subtrees: Vec<ViewSubtree>,
}

impl View {
    /// Create a new empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an included subtree.
    pub fn include(mut self, oid: Oid) -> Self {
        self.subtrees.push(ViewSubtree {
            oid,
            mask: Vec::new(),
            included: true,
        });
        self
    }

    /// Add an included subtree with a mask.
    pub fn include_masked(mut self, oid: Oid, mask: Vec<u8>) -> Self {
        self.subtrees.push(ViewSubtree {
            oid,
            mask,
            included: true,
        });
        self
    }

    /// Add an excluded subtree.
    pub fn exclude(mut self, oid: Oid) -> Self {
        self.subtrees.push(ViewSubtree {
            oid,
            mask: Vec::new(),
            included: false,
        });
        self
    }

    /// Add an excluded subtree with a mask.
    pub fn exclude_masked(mut self, oid: Oid, mask: Vec<u8>) -> Self {
        self.subtrees.push(ViewSubtree {
            oid,
            mask,
            included: false,
        });
        self
    }

    /// Add a subtree entry directly.
    pub fn push(&mut self, subtree: ViewSubtree) {
        self.subtrees.push(subtree);
    }

    /// Check if an OID is in this view.
    ///
    /// Per RFC 3415 Section 5, an OID is in the view when at least one
    /// included subtree matches and no excluded subtree matches.
    pub fn contains(&self, oid: &Oid) -> bool {
        let mut included = false;
        let mut excluded = false;

        for subtree in &self.subtrees {
            if subtree.matches(oid) {
                if subtree.included {
                    included = true;
                } else {
                    excluded = true;
                }
            }
        }

        included && !excluded
    }
}

/// A subtree in a view with optional mask.
#[derive(Debug, Clone)]
pub struct ViewSubtree {
    /// Base OID of the subtree.
    pub oid: Oid,
    /// Bit mask for wildcard matching (empty = all arcs significant).
    ///
    /// Bit `i` (MSB-first across the mask bytes) covers arc `i` of the
    /// subtree OID: 1 means the arc must match exactly, 0 means any value
    /// is accepted. Arcs past the end of the mask are significant.
    pub mask: Vec<u8>,
    /// Include (true) or exclude (false) this subtree.
    pub included: bool,
}

impl ViewSubtree {
    /// Check if an OID matches this subtree under the mask.
    pub fn matches(&self, oid: &Oid) -> bool {
        let subtree_arcs = self.oid.arcs();
        let oid_arcs = oid.arcs();

        // OID must be at least as long as the subtree
        if oid_arcs.len() < subtree_arcs.len() {
            return false;
        }

        for (i, &subtree_arc) in subtree_arcs.iter().enumerate() {
            let mask_bit = if i / 8 < self.mask.len() {
                (self.mask[i / 8] >> (7 - (i % 8))) & 1
            } else {
                1 // Default: exact match required
            };

            if mask_bit == 1 && oid_arcs[i] != subtree_arc {
                return false;
            }
        }

        true
    }
}

/// Access table entry.
#[derive(Debug, Clone)]
pub struct VacmAccessEntry {
    /// Group name this entry applies to.
    pub group_name: Bytes,
    /// Context prefix for matching.
    pub context_prefix: Bytes,
    /// Security model (or Any for wildcard).
    pub security_model: SecurityModel,
    /// Minimum security level required.
    pub security_level: SecurityLevel,
    /// Context matching mode.
    pub context_match: ContextMatch,
    /// View name for read access (empty = none).
    pub read_view: Bytes,
    /// View name for write access (empty = none).
    pub write_view: Bytes,
    /// View name for notify access (empty = none).
    pub notify_view: Bytes,
}

impl VacmAccessEntry {
    /// The view name governing an operation class.
    pub fn view_for(&self, op: Operation) -> &Bytes {
        match op {
            Operation::Read => &self.read_view,
            Operation::Write => &self.write_view,
            Operation::Notify => &self.notify_view,
        }
    }
}

/// Builder for access entries.
pub struct AccessEntryBuilder {
    entry: VacmAccessEntry,
}

impl AccessEntryBuilder {
    /// Create a new access entry builder for a group.
    pub fn new(group_name: impl Into<Bytes>) -> Self {
        Self {
            entry: VacmAccessEntry {
                group_name: group_name.into(),
                context_prefix: Bytes::new(),
                security_model: SecurityModel::Any,
                security_level: SecurityLevel::NoAuthNoPriv,
                context_match: ContextMatch::Exact,
                read_view: Bytes::new(),
                write_view: Bytes::new(),
                notify_view: Bytes::new(),
            },
        }
    }

    /// Set the context prefix for matching.
    pub fn context_prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.entry.context_prefix = prefix.into();
        self
    }

    /// Set the security model.
    pub fn security_model(mut self, model: SecurityModel) -> Self {
        self.entry.security_model = model;
        self
    }

    /// Set the minimum security level required.
    pub fn security_level(mut self, level: SecurityLevel) -> Self {
        self.entry.security_level = level;
        self
    }

    /// Use prefix matching for the context name instead of exact.
    pub fn context_match_prefix(mut self) -> Self {
        self.entry.context_match = ContextMatch::Prefix;
        self
    }

    /// Set the read view name.
    pub fn read_view(mut self, view: impl Into<Bytes>) -> Self {
        self.entry.read_view = view.into();
        self
    }

    /// Set the write view name.
    pub fn write_view(mut self, view: impl Into<Bytes>) -> Self {
        self.entry.write_view = view.into();
        self
    }

    /// Set the notify view name.
    pub fn notify_view(mut self, view: impl Into<Bytes>) -> Self {
        self.entry.notify_view = view.into();
        self
    }

    /// Build the access entry.
    pub fn build(self) -> VacmAccessEntry {
        self.entry
    }
}

/// VACM configuration: the three tables.
#[derive(Debug, Clone, Default)]
pub struct VacmConfig {
    /// (securityModel, securityName) → groupName
    security_to_group: HashMap<(SecurityModel, Bytes), Bytes>,
    /// Access table entries.
    access_entries: Vec<VacmAccessEntry>,
    /// viewName → View
    views: HashMap<Bytes, View>,
}

impl VacmConfig {
    /// Create a new empty VACM configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a security name to a group for a security model.
    pub fn add_group(
        &mut self,
        security_name: impl Into<Bytes>,
        security_model: SecurityModel,
        group_name: impl Into<Bytes>,
    ) {
        self.security_to_group
            .insert((security_model, security_name.into()), group_name.into());
    }

    /// Add an access entry.
    pub fn add_access(&mut self, entry: VacmAccessEntry) {
        self.access_entries.push(entry);
    }

    /// Add a view.
    pub fn add_view(&mut self, name: impl Into<Bytes>, view: View) {
        self.views.insert(name.into(), view);
    }

    /// Resolve the group for a request (step 1 of the decision procedure).
    pub fn get_group(&self, model: SecurityModel, name: &[u8]) -> Option<&Bytes> {
        let name_bytes = Bytes::copy_from_slice(name);
        self.security_to_group
            .get(&(model, name_bytes.clone()))
            .or_else(|| self.security_to_group.get(&(SecurityModel::Any, name_bytes)))
    }

    /// Find the best access entry (step 2 of the decision procedure).
    ///
    /// Among entries whose group, context and minimum level match, prefer a
    /// specific security model over Any, then the longest context prefix.
    pub fn get_access(
        &self,
        group: &[u8],
        context: &[u8],
        model: SecurityModel,
        level: SecurityLevel,
    ) -> Option<&VacmAccessEntry> {
        self.access_entries
            .iter()
            .filter(|e| {
                e.group_name.as_ref() == group
                    && context_matches(&e.context_prefix, context, e.context_match)
                    && (e.security_model == model || e.security_model == SecurityModel::Any)
                    && level >= e.security_level
            })
            .max_by_key(|e| {
                let model_score = if e.security_model == model { 2 } else { 1 };
                (model_score, e.context_prefix.len())
            })
    }

    /// Check an OID against a named view (steps 3-4 of the decision
    /// procedure). An absent or empty view name denies.
    pub fn check_access(&self, view_name: Option<&Bytes>, oid: &Oid) -> bool {
        let Some(view_name) = view_name else {
            return false;
        };

        if view_name.is_empty() {
            return false;
        }

        let Some(view) = self.views.get(view_name) else {
            return false;
        };

        view.contains(oid)
    }

    /// The full decision procedure for one OID.
    ///
    /// Convenience wrapper chaining group lookup, access entry selection,
    /// view selection by operation, and view evaluation.
    pub fn is_allowed(
        &self,
        model: SecurityModel,
        security_name: &[u8],
        context: &[u8],
        level: SecurityLevel,
        op: Operation,
        oid: &Oid,
    ) -> bool {
        let Some(group) = self.get_group(model, security_name) else {
            return false;
        };
        let Some(access) = self.get_access(group, context, model, level) else {
            return false;
        };
        self.check_access(Some(access.view_for(op)), oid)
    }
}

fn context_matches(prefix: &[u8], context: &[u8], mode: ContextMatch) -> bool {
    match mode {
        ContextMatch::Exact => prefix == context,
        ContextMatch::Prefix => context.starts_with(prefix),
    }
}

/// Builder for VACM configuration.
pub struct VacmBuilder {
    config: VacmConfig,
}

impl VacmBuilder {
    /// Create a new VACM builder.
    pub fn new() -> Self {
        Self {
            config: VacmConfig::new(),
        }
    }

    /// Map a security name to a group.
    pub fn group(
        mut self,
        security_name: impl Into<Bytes>,
        security_model: SecurityModel,
        group_name: impl Into<Bytes>,
    ) -> Self {
        self.config
            .add_group(security_name, security_model, group_name);
        self
    }

    /// Add an access entry using a builder function.
    pub fn access<F>(mut self, group_name: impl Into<Bytes>, configure: F) -> Self
    where
        F: FnOnce(AccessEntryBuilder) -> AccessEntryBuilder,
    {
        let builder = AccessEntryBuilder::new(group_name);
        self.config.add_access(configure(builder).build());
        self
    }

    /// Add a view using a builder function.
    pub fn view<F>(mut self, name: impl Into<Bytes>, configure: F) -> Self
    where
        F: FnOnce(View) -> View,
    {
        self.config.add_view(name, configure(View::new()));
        self
    }

    /// Build the VACM configuration.
    pub fn build(self) -> VacmConfig {
        self.config
    }
}

impl Default for VacmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    #[test]
    fn test_view_contains_simple() {
        let view = View::new().include(oid!(1, 3, 6, 1, 2, 1));

        assert!(view.contains(&oid!(1, 3, 6, 1, 2, 1, 1, 0)));
        assert!(view.contains(&oid!(1, 3, 6, 1, 2, 1, 2, 1, 1)));
        assert!(view.contains(&oid!(1, 3, 6, 1, 2, 1)));

        assert!(!view.contains(&oid!(1, 3, 6, 1, 4, 1)));
        assert!(!view.contains(&oid!(1, 3, 6, 1, 2)));
    }

    #[test]
    fn test_view_exclude_wins() {
        let view = View::new()
            .include(oid!(1, 3, 6, 1, 2, 1))
            .exclude(oid!(1, 3, 6, 1, 2, 1, 1, 7)); // sysServices

        assert!(view.contains(&oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)));
        assert!(!view.contains(&oid!(1, 3, 6, 1, 2, 1, 1, 7)));
        assert!(!view.contains(&oid!(1, 3, 6, 1, 2, 1, 1, 7, 0)));
    }

    #[test]
    fn test_view_subtree_mask_wildcard() {
        // ifDescr (10 arcs) fully significant: any row index may follow
        let subtree = ViewSubtree {
            oid: oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2),
            mask: vec![0xFF, 0xC0], // arcs 0-9 all significant
            included: true,
        };

        assert!(subtree.matches(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 1)));
        assert!(subtree.matches(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 999)));
        assert!(!subtree.matches(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 3, 1)));

        // Now wildcard arc 9 (the column): 0xFF 0x80 = arcs 0-8 significant
        let subtree = ViewSubtree {
            oid: oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2),
            mask: vec![0xFF, 0x80],
            included: true,
        };
        assert!(subtree.matches(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 3, 1)));
        assert!(!subtree.matches(&oid!(1, 3, 6, 1, 2, 1, 2, 9, 1, 2, 1)));
    }

    #[test]
    fn test_group_lookup() {
        let mut config = VacmConfig::new();
        config.add_group("public", SecurityModel::V2c, "readonly_group");
        config.add_group("admin", SecurityModel::Usm, "admin_group");

        assert_eq!(
            config.get_group(SecurityModel::V2c, b"public"),
            Some(&Bytes::from_static(b"readonly_group"))
        );
        assert_eq!(
            config.get_group(SecurityModel::Usm, b"admin"),
            Some(&Bytes::from_static(b"admin_group"))
        );
        assert_eq!(config.get_group(SecurityModel::V1, b"public"), None);
    }

    #[test]
    fn test_group_any_model_fallback() {
        let mut config = VacmConfig::new();
        config.add_group("universal", SecurityModel::Any, "universal_group");

        assert!(config.get_group(SecurityModel::V1, b"universal").is_some());
        assert!(config.get_group(SecurityModel::Usm, b"universal").is_some());
    }

    #[test]
    fn test_access_minimum_security_level() {
        let mut config = VacmConfig::new();
        config.add_access(
            AccessEntryBuilder::new("admin_group")
                .security_model(SecurityModel::Usm)
                .security_level(SecurityLevel::AuthPriv)
                .read_view("full_view")
                .write_view("full_view")
                .build(),
        );

        assert!(
            config
                .get_access(
                    b"admin_group",
                    b"",
                    SecurityModel::Usm,
                    SecurityLevel::AuthNoPriv
                )
                .is_none()
        );
        assert!(
            config
                .get_access(
                    b"admin_group",
                    b"",
                    SecurityModel::Usm,
                    SecurityLevel::AuthPriv
                )
                .is_some()
        );
    }

    #[test]
    fn test_access_prefers_specific_model_and_longer_context() {
        let mut config = VacmConfig::new();
        config.add_access(
            AccessEntryBuilder::new("g")
                .security_model(SecurityModel::Any)
                .read_view("any_view")
                .context_match_prefix()
                .build(),
        );
        config.add_access(
            AccessEntryBuilder::new("g")
                .security_model(SecurityModel::Usm)
                .read_view("usm_view")
                .context_match_prefix()
                .build(),
        );
        config.add_access(
            AccessEntryBuilder::new("g")
                .security_model(SecurityModel::Usm)
                .context_prefix("ctx")
                .context_match_prefix()
                .read_view("ctx_view")
                .build(),
        );

        let access = config
            .get_access(b"g", b"ctx-a", SecurityModel::Usm, SecurityLevel::AuthPriv)
            .unwrap();
        assert_eq!(access.read_view.as_ref(), b"ctx_view");

        let access = config
            .get_access(b"g", b"", SecurityModel::Usm, SecurityLevel::AuthPriv)
            .unwrap();
        assert_eq!(access.read_view.as_ref(), b"usm_view");

        let access = config
            .get_access(b"g", b"", SecurityModel::V2c, SecurityLevel::NoAuthNoPriv)
            .unwrap();
        assert_eq!(access.read_view.as_ref(), b"any_view");
    }

    #[test]
    fn test_check_access_denials() {
        let mut config = VacmConfig::new();
        config.add_view("full_view", View::new().include(oid!(1, 3, 6, 1)));

        let oid = oid!(1, 3, 6, 1, 2, 1, 1, 1, 0);

        assert!(config.check_access(Some(&Bytes::from_static(b"full_view")), &oid));
        // Empty view name, missing view name, unknown view all deny
        assert!(!config.check_access(Some(&Bytes::new()), &oid));
        assert!(!config.check_access(None, &oid));
        assert!(!config.check_access(Some(&Bytes::from_static(b"nope")), &oid));
    }

    #[test]
    fn test_full_decision_procedure() {
        let config = VacmBuilder::new()
            .group("public", SecurityModel::V2c, "ro_group")
            .group("admin", SecurityModel::Usm, "rw_group")
            .access("ro_group", |a| a.read_view("mib2"))
            .access("rw_group", |a| {
                a.security_model(SecurityModel::Usm)
                    .security_level(SecurityLevel::AuthPriv)
                    .read_view("everything")
                    .write_view("system_only")
            })
            .view("mib2", |v| v.include(oid!(1, 3, 6, 1, 2, 1)))
            .view("everything", |v| v.include(oid!(1, 3)))
            .view("system_only", |v| v.include(oid!(1, 3, 6, 1, 2, 1, 1)))
            .build();

        let sys_descr = oid!(1, 3, 6, 1, 2, 1, 1, 1, 0);
        let enterprise = oid!(1, 3, 6, 1, 4, 1, 9, 1);

        // public can read mib-2, nothing else, and never write
        assert!(config.is_allowed(
            SecurityModel::V2c,
            b"public",
            b"",
            SecurityLevel::NoAuthNoPriv,
            Operation::Read,
            &sys_descr,
        ));
        assert!(!config.is_allowed(
            SecurityModel::V2c,
            b"public",
            b"",
            SecurityLevel::NoAuthNoPriv,
            Operation::Read,
            &enterprise,
        ));
        assert!(!config.is_allowed(
            SecurityModel::V2c,
            b"public",
            b"",
            SecurityLevel::NoAuthNoPriv,
            Operation::Write,
            &sys_descr,
        ));

        // admin at authPriv reads everything, writes only system
        assert!(config.is_allowed(
            SecurityModel::Usm,
            b"admin",
            b"",
            SecurityLevel::AuthPriv,
            Operation::Read,
            &enterprise,
        ));
        assert!(config.is_allowed(
            SecurityModel::Usm,
            b"admin",
            b"",
            SecurityLevel::AuthPriv,
            Operation::Write,
            &sys_descr,
        ));
        assert!(!config.is_allowed(
            SecurityModel::Usm,
            b"admin",
            b"",
            SecurityLevel::AuthPriv,
            Operation::Write,
            &enterprise,
        ));

        // admin below the required level gets nothing
        assert!(!config.is_allowed(
            SecurityModel::Usm,
            b"admin",
            b"",
            SecurityLevel::AuthNoPriv,
            Operation::Read,
            &sys_descr,
        ));

        // unknown user
        assert!(!config.is_allowed(
            SecurityModel::V2c,
            b"stranger",
            b"",
            SecurityLevel::NoAuthNoPriv,
            Operation::Read,
            &sys_descr,
        ));
    }

    #[test]
    fn test_write_subset_of_read_implies_read() {
        // When the write view is a subset of the read view, write access
        // implies read access for the same OID
        let config = VacmBuilder::new()
            .group("admin", SecurityModel::Usm, "g")
            .access("g", |a| a.read_view("wide").write_view("narrow"))
            .view("wide", |v| v.include(oid!(1, 3, 6, 1)))
            .view("narrow", |v| v.include(oid!(1, 3, 6, 1, 2, 1, 1)))
            .build();

        let oids = [
            oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
            oid!(1, 3, 6, 1, 2, 1, 1, 5, 0),
            oid!(1, 3, 6, 1, 2, 1, 2, 1, 0),
            oid!(1, 3, 6, 1, 4, 1, 9),
        ];
        for oid in &oids {
            let writable = config.is_allowed(
                SecurityModel::Usm,
                b"admin",
                b"",
                SecurityLevel::NoAuthNoPriv,
                Operation::Write,
                oid,
            );
            let readable = config.is_allowed(
                SecurityModel::Usm,
                b"admin",
                b"",
                SecurityLevel::NoAuthNoPriv,
                Operation::Read,
                oid,
            );
            if writable {
                assert!(readable, "write allowed but read denied for {}", oid);
            }
        }
    }
}
