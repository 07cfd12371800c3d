//! Identifier forms for records horde keeps in the store.

/// Prefix of every encampment-level record.
pub const ENCAMPMENT_PREFIX: &str = "hq";

/// Warband agent: `<prefix>-<warband>-<role>[-<name>]`.
pub fn warband_agent_id(prefix: &str, warband: &str, role: &str, name: Option<&str>) -> String {
    match name {
        Some(name) if !name.is_empty() => format!("{prefix}-{warband}-{role}-{name}"),
        _ => format!("{prefix}-{warband}-{role}"),
    }
}

/// Encampment agent: `hq-<role>[-<name>]`.
pub fn encampment_agent_id(role: &str, name: Option<&str>) -> String {
    match name {
        Some(name) if !name.is_empty() => format!("{ENCAMPMENT_PREFIX}-{role}-{name}"),
        _ => format!("{ENCAMPMENT_PREFIX}-{role}"),
    }
}

/// Role definition: `hq-<role>-role`.
pub fn role_bead_id(role: &str) -> String {
    format!("{ENCAMPMENT_PREFIX}-{role}-role")
}

/// Warband queue: `<prefix>-q-<name>`.
pub fn queue_id(prefix: &str, name: &str) -> String {
    format!("{prefix}-q-{name}")
}

/// Encampment queue: `hq-q-<name>`.
pub fn encampment_queue_id(name: &str) -> String {
    queue_id(ENCAMPMENT_PREFIX, name)
}

/// Warband identity: `<prefix>-warband-<name>`.
pub fn warband_identity_id(prefix: &str, name: &str) -> String {
    format!("{prefix}-warband-{name}")
}

pub fn raider_agent_id(prefix: &str, warband: &str, name: &str) -> String {
    warband_agent_id(prefix, warband, "raider", Some(name))
}

pub fn clan_agent_id(prefix: &str, warband: &str, name: &str) -> String {
    warband_agent_id(prefix, warband, "clan", Some(name))
}

/// Components of a parsed agent id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentIdParts {
    pub warband: String,
    pub role: String,
    pub name: String,
}

/// Encampment roles that carry a name segment (`hq-dog-alpha`).
const NAMED_ENCAMPMENT_ROLES: &[&str] = &["dog"];

/// Split an agent id into (warband, role, name).
///
/// Returns `None` unless the id has a 2-3 letter prefix followed by `-` and at
/// least one more character.
pub fn parse_agent_bead_id(id: &str) -> Option<AgentIdParts> {
    let (prefix, rest) = id.split_once('-')?;
    if !(2..=3).contains(&prefix.len())
        || !prefix.bytes().all(|b| b.is_ascii_alphabetic())
        || rest.is_empty()
    {
        return None;
    }

    let parts: Vec<&str> = rest.split('-').collect();
    let parsed = match parts.as_slice() {
        [role] => AgentIdParts {
            role: (*role).to_string(),
            ..Default::default()
        },
        [first, second] if NAMED_ENCAMPMENT_ROLES.contains(first) => AgentIdParts {
            role: (*first).to_string(),
            name: (*second).to_string(),
            ..Default::default()
        },
        [warband, role] => AgentIdParts {
            warband: (*warband).to_string(),
            role: (*role).to_string(),
            name: String::new(),
        },
        [warband, role, name @ ..] => AgentIdParts {
            warband: (*warband).to_string(),
            role: (*role).to_string(),
            name: name.join("-"),
        },
        [] => return None,
    };
    Some(parsed)
}

/// The prefix of any issue id (`hd-abc` → `hd`).
pub fn id_prefix(id: &str) -> Option<&str> {
    id.split_once('-').map(|(p, _)| p).filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors() {
        assert_eq!(warband_agent_id("hd", "horde", "witness", None), "hd-horde-witness");
        assert_eq!(raider_agent_id("hd", "horde", "toast"), "hd-horde-raider-toast");
        assert_eq!(clan_agent_id("hd", "horde", "max"), "hd-horde-clan-max");
        assert_eq!(encampment_agent_id("warchief", None), "hq-warchief");
        assert_eq!(encampment_agent_id("dog", Some("alpha")), "hq-dog-alpha");
        assert_eq!(role_bead_id("raider"), "hq-raider-role");
        assert_eq!(queue_id("hd", "merge"), "hd-q-merge");
        assert_eq!(encampment_queue_id("dispatch"), "hq-q-dispatch");
        assert_eq!(warband_identity_id("hd", "horde"), "hd-warband-horde");
    }

    #[test]
    fn parse_warband_named() {
        let parts = parse_agent_bead_id("hd-horde-raider-raider-01").unwrap();
        assert_eq!(parts.warband, "horde");
        assert_eq!(parts.role, "raider");
        assert_eq!(parts.name, "raider-01");
    }

    #[test]
    fn parse_singletons_and_encampment() {
        let witness = parse_agent_bead_id("gt-horde-witness").unwrap();
        assert_eq!((witness.warband.as_str(), witness.role.as_str()), ("horde", "witness"));
        assert!(witness.name.is_empty());

        let warchief = parse_agent_bead_id("hq-warchief").unwrap();
        assert!(warchief.warband.is_empty());
        assert_eq!(warchief.role, "warchief");

        let dog = parse_agent_bead_id("hq-dog-alpha").unwrap();
        assert_eq!((dog.role.as_str(), dog.name.as_str()), ("dog", "alpha"));
    }

    #[test]
    fn parse_ok_iff_letter_prefix_form() {
        for ok in ["gt-x", "bd-horde-forge", "hq-warchief", "abc-1"] {
            assert!(parse_agent_bead_id(ok).is_some(), "{ok} should parse");
        }
        for bad in ["", "-", "g-x", "abcd-x", "12-x", "gt-", "gt", "g1-x"] {
            assert!(parse_agent_bead_id(bad).is_none(), "{bad} should not parse");
        }
    }

    #[test]
    fn prefix_of_id() {
        assert_eq!(id_prefix("hd-abc"), Some("hd"));
        assert_eq!(id_prefix("nohyphen"), None);
        assert_eq!(id_prefix("-x"), None);
    }
}
