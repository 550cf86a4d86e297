use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const LID_SUFFIX: &str = "@lid";
const GROUP_SUFFIX: &str = "@g.us";
const ZAPI_GROUP_SUFFIX: &str = "-group";
const STRIPPED_SUFFIXES: [&str; 2] = ["@c.us", "@s.whatsapp.net"];
const PHONE_MIN_DIGITS: usize = 10;
const PHONE_MAX_DIGITS: usize = 15;
const BR_COUNTRY_CODE: &str = "55";

/// Kinds of external identifiers the alias index understands, in resolution
/// precedence order for one-to-one senders.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    Lid,
    Phone,
    ChatKey,
    GroupJid,
}

impl AliasKind {
    pub const ALL: [AliasKind; 4] = [
        AliasKind::Lid,
        AliasKind::Phone,
        AliasKind::ChatKey,
        AliasKind::GroupJid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lid => "lid",
            Self::Phone => "phone",
            Self::ChatKey => "chat_key",
            Self::GroupJid => "group_jid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for AliasKind {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "lid" => Ok(Self::Lid),
            "phone" => Ok(Self::Phone),
            "chat_key" => Ok(Self::ChatKey),
            "group_jid" => Ok(Self::GroupJid),
            _ => Err("unknown alias kind"),
        }
    }
}

impl fmt::Display for AliasKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Alias {
    pub kind: AliasKind,
    pub value: String,
}

impl Alias {
    pub fn new(kind: AliasKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Row of the alias index: one alias value owned by exactly one contact.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AliasRecord {
    pub kind: AliasKind,
    pub value: String,
    pub contact_id: String,
    pub created_at_ms: i64,
}

/// Normalized aliases carried by one inbound event or resolver call.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AliasSet {
    pub lid: Option<String>,
    pub phone: Option<String>,
    pub chat_key: Option<String>,
    pub group_jid: Option<String>,
}

impl AliasSet {
    /// Builds the alias set from raw provider fields.
    ///
    /// A `phone` carrying an `@lid` suffix is a LID, not a phone. Group chats
    /// resolve only through their group JID; the sender fields of a group event
    /// describe a participant, not the group.
    pub fn from_raw(
        lid: Option<&str>,
        phone: Option<&str>,
        chat_lid: Option<&str>,
        chat_id: Option<&str>,
        is_group: bool,
    ) -> Self {
        let chat_id = chat_id.and_then(normalize_wa_id);
        let group_chat = is_group || chat_id.as_deref().is_some_and(is_group_chat_id);
        if group_chat {
            return Self {
                group_jid: chat_id.or_else(|| phone.and_then(normalize_wa_id)),
                ..Self::default()
            };
        }

        let phone_is_lid = phone.is_some_and(|value| value.trim().ends_with(LID_SUFFIX));
        let lid = lid
            .and_then(lid_numeric)
            .or_else(|| chat_lid.and_then(lid_numeric))
            .or_else(|| phone.filter(|_| phone_is_lid).and_then(lid_numeric))
            .or_else(|| {
                chat_id
                    .as_deref()
                    .filter(|value| value.ends_with(LID_SUFFIX))
                    .and_then(lid_numeric)
            });
        let phone = phone
            .filter(|_| !phone_is_lid)
            .and_then(normalize_phone)
            .or_else(|| {
                chat_id
                    .as_deref()
                    .filter(|value| !value.ends_with(LID_SUFFIX))
                    .and_then(normalize_phone)
            });

        Self {
            lid,
            phone,
            chat_key: chat_id,
            group_jid: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lid.is_none()
            && self.phone.is_none()
            && self.chat_key.is_none()
            && self.group_jid.is_none()
    }

    pub fn is_group(&self) -> bool {
        self.group_jid.is_some()
    }

    pub fn get(&self, kind: AliasKind) -> Option<&str> {
        match kind {
            AliasKind::Lid => self.lid.as_deref(),
            AliasKind::Phone => self.phone.as_deref(),
            AliasKind::ChatKey => self.chat_key.as_deref(),
            AliasKind::GroupJid => self.group_jid.as_deref(),
        }
    }

    /// Present aliases in resolution precedence order.
    pub fn aliases(&self) -> Vec<Alias> {
        AliasKind::ALL
            .iter()
            .filter_map(|kind| self.get(*kind).map(|value| Alias::new(*kind, value)))
            .collect()
    }
}

/// Normalizes a raw WhatsApp id: keeps `@lid` and `@g.us`, strips the
/// `@c.us` and `@s.whatsapp.net` user suffixes.
pub fn normalize_wa_id(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if value.ends_with(LID_SUFFIX) || value.ends_with(GROUP_SUFFIX) {
        return Some(value.to_string());
    }
    let stripped = STRIPPED_SUFFIXES
        .iter()
        .find_map(|suffix| value.strip_suffix(suffix))
        .unwrap_or(value)
        .trim();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

pub fn normalize_phone(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.ends_with(LID_SUFFIX) || value.ends_with(GROUP_SUFFIX) {
        return None;
    }
    let base = normalize_wa_id(value)?;
    let digits: String = base.chars().filter(char::is_ascii_digit).collect();
    let has_foreign = base
        .chars()
        .any(|ch| !(ch.is_ascii_digit() || matches!(ch, '+' | ' ' | '-' | '(' | ')')));
    if has_foreign || !(PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits.len()) {
        return None;
    }
    Some(digits)
}

/// Numeric portion of a LID such as `144723385778292@lid`.
pub fn lid_numeric(raw: &str) -> Option<String> {
    let value = raw.trim();
    let value = value.strip_suffix(LID_SUFFIX).unwrap_or(value).trim();
    if value.is_empty() || !value.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    Some(value.to_string())
}

pub fn is_group_chat_id(chat_id: &str) -> bool {
    chat_id.ends_with(GROUP_SUFFIX) || chat_id.ends_with(ZAPI_GROUP_SUFFIX)
}

/// Comparison key under which Brazilian mobile numbers written with and
/// without the ninth digit are equal (`55 DD 9XXXXXXXX` vs `55 DD XXXXXXXX`).
///
/// Only the consolidation sweep uses this; the resolver matches exact values.
pub fn phone_equivalence_key(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 13 && digits.starts_with(BR_COUNTRY_CODE) && &digits[4..5] == "9" {
        return format!("{}{}", &digits[..4], &digits[5..]);
    }
    digits
}

/// Provider recipient for a conversation, LID first.
pub fn provider_recipient(
    chat_id: Option<&str>,
    lid: Option<&str>,
    phone: Option<&str>,
) -> Option<String> {
    if let Some(chat_id) = chat_id.and_then(normalize_wa_id) {
        if chat_id.ends_with(LID_SUFFIX) || is_group_chat_id(&chat_id) {
            return Some(chat_id);
        }
    }
    if let Some(lid) = lid.and_then(lid_numeric) {
        return Some(format!("{lid}{LID_SUFFIX}"));
    }
    phone
        .and_then(normalize_phone)
        .or_else(|| chat_id.and_then(normalize_phone))
        .map(|digits| format!("{digits}@s.whatsapp.net"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_wa_id_keeps_lid_and_group_suffixes() {
        assert_eq!(
            normalize_wa_id(" 144723385778292@lid ").as_deref(),
            Some("144723385778292@lid")
        );
        assert_eq!(
            normalize_wa_id("120363025@g.us").as_deref(),
            Some("120363025@g.us")
        );
        assert_eq!(
            normalize_wa_id("558197438430@s.whatsapp.net").as_deref(),
            Some("558197438430")
        );
        assert_eq!(
            normalize_wa_id("558197438430@c.us").as_deref(),
            Some("558197438430")
        );
        assert_eq!(normalize_wa_id("   "), None);
    }

    #[test]
    fn phone_requires_plausible_digit_count() {
        assert_eq!(
            normalize_phone("+55 (81) 9743-8430").as_deref(),
            Some("558197438430")
        );
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("144723385778292@lid"), None);
    }

    #[test]
    fn raw_fields_split_into_aliases() {
        let set = AliasSet::from_raw(
            None,
            Some("558197438430"),
            Some("144723385778292@lid"),
            Some("558197438430@s.whatsapp.net"),
            false,
        );
        assert_eq!(set.lid.as_deref(), Some("144723385778292"));
        assert_eq!(set.phone.as_deref(), Some("558197438430"));
        assert_eq!(set.chat_key.as_deref(), Some("558197438430"));
        assert_eq!(set.group_jid, None);

        let kinds: Vec<AliasKind> = set.aliases().into_iter().map(|alias| alias.kind).collect();
        assert_eq!(
            kinds,
            vec![AliasKind::Lid, AliasKind::Phone, AliasKind::ChatKey]
        );
    }

    #[test]
    fn phone_field_with_lid_suffix_is_a_lid() {
        let set = AliasSet::from_raw(None, Some("144723385778292@lid"), None, None, false);
        assert_eq!(set.lid.as_deref(), Some("144723385778292"));
        assert_eq!(set.phone, None);
    }

    #[test]
    fn group_events_resolve_through_group_jid_only() {
        let set = AliasSet::from_raw(
            None,
            Some("558197438430"),
            None,
            Some("120363025-group"),
            true,
        );
        assert!(set.is_group());
        assert_eq!(set.group_jid.as_deref(), Some("120363025-group"));
        assert_eq!(set.phone, None);
    }

    #[test]
    fn br_ninth_digit_variants_share_equivalence_key() {
        assert_eq!(
            phone_equivalence_key("5581997438430"),
            phone_equivalence_key("558197438430")
        );
        assert_ne!(
            phone_equivalence_key("5581997438430"),
            phone_equivalence_key("558197438431")
        );
        assert_eq!(phone_equivalence_key("14155550100"), "14155550100");
    }

    #[test]
    fn recipient_prefers_lid() {
        assert_eq!(
            provider_recipient(Some("558197438430"), Some("1447"), Some("558197438430")).as_deref(),
            Some("1447@lid")
        );
        assert_eq!(
            provider_recipient(None, None, Some("558197438430")).as_deref(),
            Some("558197438430@s.whatsapp.net")
        );
        assert_eq!(
            provider_recipient(Some("120363025@g.us"), None, None).as_deref(),
            Some("120363025@g.us")
        );
    }
}
