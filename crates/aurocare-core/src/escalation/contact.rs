//! Emergency contacts and tier planning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A person or service that can be notified about an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    /// Relationship or role, e.g. "Primary Care Physician".
    #[serde(default)]
    pub role: String,
    pub phone: String,
    /// Lower values are notified first.
    pub priority: u32,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub estimated_response_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Contact {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        phone: impl Into<String>,
        priority: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: String::new(),
            phone: phone.into(),
            priority,
            available: true,
            estimated_response_secs: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_response_secs(mut self, secs: u64) -> Self {
        self.estimated_response_secs = Some(secs);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Phone number reduced to digits and a leading `+`, used for dedup.
    pub fn normalized_phone(&self) -> String {
        normalize_phone(&self.phone)
    }
}

/// A priority bucket of contacts notified together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub priority: u32,
    pub contacts: Vec<Contact>,
}

/// Turn a registered contact list into dispatch tiers.
///
/// Unavailable contacts are skipped. Contacts sharing a phone number collapse
/// into one, keeping the lowest priority value (the first registered wins on
/// equal priority). Tiers come out in ascending priority; contacts inside a
/// tier keep registration order.
pub fn plan_tiers(contacts: &[Contact]) -> Vec<Tier> {
    let mut kept: Vec<(usize, &Contact)> = Vec::new();
    let mut by_phone: HashMap<String, usize> = HashMap::new();

    for (order, contact) in contacts.iter().enumerate().filter(|(_, c)| c.available) {
        let phone = contact.normalized_phone();
        match by_phone.get(&phone) {
            Some(&slot) => {
                if contact.priority < kept[slot].1.priority {
                    kept[slot] = (order, contact);
                }
            }
            None => {
                by_phone.insert(phone, kept.len());
                kept.push((order, contact));
            }
        }
    }

    kept.sort_by_key(|(order, contact)| (contact.priority, *order));

    let mut tiers: Vec<Tier> = Vec::new();
    for (_, contact) in kept {
        match tiers.last_mut() {
            Some(tier) if tier.priority == contact.priority => tier.contacts.push(contact.clone()),
            _ => tiers.push(Tier {
                priority: contact.priority,
                contacts: vec![contact.clone()],
            }),
        }
    }
    tiers
}

fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    if out.is_empty() || out == "+" {
        trimmed.to_lowercase()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(tiers: &[Tier]) -> Vec<Vec<&str>> {
        tiers
            .iter()
            .map(|t| t.contacts.iter().map(|c| c.id.as_str()).collect())
            .collect()
    }

    #[test]
    fn groups_by_priority_in_registration_order() {
        let contacts = vec![
            Contact::new("p3", "Care Center", "+1 (555) 456-7890", 2),
            Contact::new("p1", "Dr. Wilson", "+1 (555) 123-4567", 1),
            Contact::new("p2", "Michael", "+1 (555) 234-5678", 1),
        ];
        let tiers = plan_tiers(&contacts);
        assert_eq!(ids(&tiers), vec![vec!["p1", "p2"], vec!["p3"]]);
        assert_eq!(tiers[0].priority, 1);
        assert_eq!(tiers[1].priority, 2);
    }

    #[test]
    fn duplicate_phone_keeps_lowest_priority() {
        let contacts = vec![
            Contact::new("son-home", "Michael", "+1 (555) 234-5678", 3),
            Contact::new("doctor", "Dr. Wilson", "+1-555-123-4567", 2),
            Contact::new("son-cell", "Michael", "+1 555 234 5678", 1),
        ];
        let tiers = plan_tiers(&contacts);
        assert_eq!(ids(&tiers), vec![vec!["son-cell"], vec!["doctor"]]);
    }

    #[test]
    fn duplicate_phone_on_equal_priority_keeps_first() {
        let contacts = vec![
            Contact::new("a", "A", "911", 1),
            Contact::new("b", "B", "911", 1),
        ];
        assert_eq!(ids(&plan_tiers(&contacts)), vec![vec!["a"]]);
    }

    #[test]
    fn unavailable_contacts_are_skipped() {
        let contacts = vec![
            Contact::new("daughter", "Sarah", "+1 (555) 345-6789", 1).unavailable(),
            Contact::new("ems", "Emergency Services", "911", 2),
        ];
        assert_eq!(ids(&plan_tiers(&contacts)), vec![vec!["ems"]]);
    }

    #[test]
    fn empty_list_has_no_tiers() {
        assert!(plan_tiers(&[]).is_empty());
    }

    #[test]
    fn normalizes_phone_formats() {
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "+15551234567");
        assert_eq!(normalize_phone("555.123.4567"), "5551234567");
        assert_eq!(normalize_phone("+1-555-AURO"), "+1555");
        assert_eq!(normalize_phone("Front Desk"), "front desk");
    }

    proptest! {
        #[test]
        fn tiers_are_strictly_ascending(
            entries in prop::collection::vec((0u32..6, 0u8..12, any::<bool>()), 0..40)
        ) {
            let contacts: Vec<Contact> = entries
                .iter()
                .enumerate()
                .map(|(i, (priority, phone, available))| {
                    let c = Contact::new(format!("c{i}"), "x", format!("555-{phone}"), *priority);
                    if *available { c } else { c.unavailable() }
                })
                .collect();

            let tiers = plan_tiers(&contacts);
            for pair in tiers.windows(2) {
                prop_assert!(pair[0].priority < pair[1].priority);
            }
            for tier in &tiers {
                prop_assert!(!tier.contacts.is_empty());
                prop_assert!(tier.contacts.iter().all(|c| c.priority == tier.priority && c.available));
            }

            let mut phones: Vec<String> = tiers
                .iter()
                .flat_map(|t| t.contacts.iter().map(Contact::normalized_phone))
                .collect();
            let total = phones.len();
            phones.sort();
            phones.dedup();
            prop_assert_eq!(phones.len(), total);
        }
    }
}
