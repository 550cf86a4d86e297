use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::aliases::{AliasKind, AliasSet};
use crate::util::{now_ms, uuid_v7_without_dashes};

/// One real-world sender or group.
///
/// The alias columns hold the primary value of each kind; the alias index may
/// hold further values (a ported phone, an older chat key) owned by the same
/// contact.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub contact_id: String,
    pub phone: Option<String>,
    pub lid: Option<String>,
    pub chat_key: Option<String>,
    pub group_jid: Option<String>,
    pub is_group: bool,
    pub name: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Contact {
    pub fn from_aliases(aliases: &AliasSet, name: Option<&str>) -> Self {
        let now = now_ms();
        Self {
            contact_id: uuid_v7_without_dashes(),
            phone: aliases.phone.clone(),
            lid: aliases.lid.clone(),
            chat_key: aliases.chat_key.clone(),
            group_jid: aliases.group_jid.clone(),
            is_group: aliases.is_group(),
            name: clean_name(name),
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn alias(&self, kind: AliasKind) -> Option<&str> {
        match kind {
            AliasKind::Lid => self.lid.as_deref(),
            AliasKind::Phone => self.phone.as_deref(),
            AliasKind::ChatKey => self.chat_key.as_deref(),
            AliasKind::GroupJid => self.group_jid.as_deref(),
        }
    }

    /// Fills the column for `kind` if it is still empty. Returns whether it changed.
    pub fn fill_alias(&mut self, kind: AliasKind, value: &str) -> bool {
        let slot = match kind {
            AliasKind::Lid => &mut self.lid,
            AliasKind::Phone => &mut self.phone,
            AliasKind::ChatKey => &mut self.chat_key,
            AliasKind::GroupJid => &mut self.group_jid,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(value.to_string());
        self.updated_at_ms = now_ms();
        true
    }

    pub fn column_aliases(&self) -> AliasSet {
        AliasSet {
            lid: self.lid.clone(),
            phone: self.phone.clone(),
            chat_key: self.chat_key.clone(),
            group_jid: self.group_jid.clone(),
        }
    }

    /// Learns a display name when the contact still has none.
    pub fn learn_name(&mut self, name: Option<&str>) -> bool {
        if self.name.is_some() {
            return false;
        }
        match clean_name(name) {
            Some(name) => {
                self.name = Some(name);
                self.updated_at_ms = now_ms();
                true
            }
            None => false,
        }
    }

    /// Copies every alias column of `other` that is empty here.
    pub fn absorb_aliases(&mut self, other: &Contact) -> bool {
        let mut changed = false;
        for kind in AliasKind::ALL {
            if let Some(value) = other.alias(kind) {
                changed |= self.fill_alias(kind, value);
            }
        }
        if self.name.is_none() && other.name.is_some() {
            self.name = other.name.clone();
            changed = true;
        }
        changed
    }
}

/// Trims a provider display name; bare numbers are not names.
pub fn clean_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|value| !value.is_empty())
        .filter(|value| !value.chars().all(|ch| ch.is_ascii_digit() || ch == '+'))
        .map(str::to_string)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeReason {
    AliasCollision,
    PhoneEquivalence,
    Manual,
}

impl MergeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AliasCollision => "alias_collision",
            Self::PhoneEquivalence => "phone_equivalence",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for MergeReason {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "alias_collision" => Ok(Self::AliasCollision),
            "phone_equivalence" => Ok(Self::PhoneEquivalence),
            "manual" => Ok(Self::Manual),
            _ => Err("unknown merge reason"),
        }
    }
}

/// Two contacts suspected to denote the same sender, queued for the sweep.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeCandidate {
    pub candidate_id: String,
    pub primary_contact_id: String,
    pub secondary_contact_id: String,
    pub reason: MergeReason,
    pub evidence: Option<String>,
    pub created_at_ms: i64,
}

impl MergeCandidate {
    pub fn new(
        primary_contact_id: impl Into<String>,
        secondary_contact_id: impl Into<String>,
        reason: MergeReason,
        evidence: Option<String>,
    ) -> Self {
        Self {
            candidate_id: uuid_v7_without_dashes(),
            primary_contact_id: primary_contact_id.into(),
            secondary_contact_id: secondary_contact_id.into(),
            reason,
            evidence,
            created_at_ms: now_ms(),
        }
    }

    pub fn involves(&self, contact_id: &str) -> bool {
        self.primary_contact_id == contact_id || self.secondary_contact_id == contact_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_names_are_not_learned() {
        let mut contact = Contact::from_aliases(&AliasSet::default(), Some("558197438430"));
        assert_eq!(contact.name, None);
        assert!(contact.learn_name(Some("  Maria ")));
        assert_eq!(contact.name.as_deref(), Some("Maria"));
        assert!(!contact.learn_name(Some("Other")));
    }

    #[test]
    fn fill_alias_never_overwrites() {
        let mut contact = Contact::from_aliases(
            &AliasSet {
                lid: Some("1447".into()),
                ..AliasSet::default()
            },
            None,
        );
        assert!(contact.fill_alias(AliasKind::Phone, "558197438430"));
        assert!(!contact.fill_alias(AliasKind::Phone, "558100000000"));
        assert_eq!(contact.phone.as_deref(), Some("558197438430"));
    }
}
