//! Drums addresses.
//!
//! ```text
//! warchief/  shaman/            encampment agents (trailing slash)
//! <warband>/witness             warband singletons
//! <warband>/raiders/<name>      raiders
//! <warband>/clan/<name>         clan workers
//! ```

use crate::session::SESSION_PREFIX;

/// Roles that live at the encampment level.
pub const ENCAMPMENT_ROLES: &[&str] = &["warchief", "shaman"];
/// One-per-warband roles.
pub const SINGLETON_ROLES: &[&str] = &["witness", "forge", "warchief"];

/// A parsed, canonical address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Encampment { role: String },
    Singleton { warband: String, role: String },
    Raider { warband: String, name: String },
    Clan { warband: String, name: String },
}

impl Address {
    pub fn parse(addr: &str) -> Option<Self> {
        let canonical = normalize(addr);
        let parts: Vec<&str> = canonical.split('/').collect();
        match parts.as_slice() {
            [role, ""] => Some(Address::Encampment {
                role: (*role).to_string(),
            }),
            [warband, role] if !warband.is_empty() && SINGLETON_ROLES.contains(role) => {
                Some(Address::Singleton {
                    warband: (*warband).to_string(),
                    role: (*role).to_string(),
                })
            }
            [warband, "raiders", name] if !warband.is_empty() && !name.is_empty() => Some(Address::Raider {
                warband: (*warband).to_string(),
                name: (*name).to_string(),
            }),
            [warband, "clan", name] if !warband.is_empty() && !name.is_empty() => Some(Address::Clan {
                warband: (*warband).to_string(),
                name: (*name).to_string(),
            }),
            _ => None,
        }
    }

    pub fn warband(&self) -> Option<&str> {
        match self {
            Address::Encampment { .. } => None,
            Address::Singleton { warband, .. }
            | Address::Raider { warband, .. }
            | Address::Clan { warband, .. } => Some(warband),
        }
    }

    /// Session hosting this agent.
    pub fn session(&self) -> String {
        match self {
            Address::Encampment { role } => crate::session::encampment_session(role),
            Address::Singleton { warband, role } => crate::session::singleton_session(warband, role),
            Address::Raider { warband, name } => crate::session::raider_session(warband, name),
            Address::Clan { warband, name } => crate::session::clan_session(warband, name),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Encampment { role } => write!(f, "{role}/"),
            Address::Singleton { warband, role } => write!(f, "{warband}/{role}"),
            Address::Raider { warband, name } => write!(f, "{warband}/raiders/{name}"),
            Address::Clan { warband, name } => write!(f, "{warband}/clan/{name}"),
        }
    }
}

/// Canonical form of an address.
///
/// Bare encampment roles gain their trailing slash, `<warband>/raider/<name>`
/// and the legacy `<warband>/<name>` become `<warband>/raiders/<name>`, and a
/// trailing slash on a warband address is dropped. Patterns pass through.
pub fn normalize(addr: &str) -> String {
    let addr = addr.trim();
    if ENCAMPMENT_ROLES.contains(&addr) {
        return format!("{addr}/");
    }
    if let Some(role) = addr.strip_suffix('/')
        && ENCAMPMENT_ROLES.contains(&role)
    {
        return addr.to_string();
    }
    let trimmed = addr.trim_end_matches('/');
    let parts: Vec<&str> = trimmed.split('/').collect();
    match parts.as_slice() {
        [warband, "raider", name] => format!("{warband}/raiders/{name}"),
        [warband, name]
            if !name.contains('*')
                && !SINGLETON_ROLES.contains(name)
                && !warband.is_empty()
                && !name.is_empty() =>
        {
            format!("{warband}/raiders/{name}")
        }
        _ => trimmed.to_string(),
    }
}

/// Every spelling under which older records may have been addressed to
/// `addr`: canonical, with and without trailing slash, and the two-segment
/// raider form.
pub fn variants(addr: &str) -> Vec<String> {
    let canonical = normalize(addr);
    let mut out = vec![canonical.clone()];
    let mut push = |v: String| {
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    };
    match canonical.strip_suffix('/') {
        Some(bare) => push(bare.to_string()),
        None => push(format!("{canonical}/")),
    }
    if let Some(Address::Raider { warband, name }) = Address::parse(&canonical) {
        push(format!("{warband}/{name}"));
        push(format!("{warband}/raider/{name}"));
    }
    out
}

/// Map a session name back to its address.
///
/// `gt-warchief` → `warchief/`, `gt-horde-witness` → `horde/witness`,
/// `gt-horde-clan-max` → `horde/clan/max`, `gt-horde-toast` → `horde/raiders/toast`.
pub fn session_to_address(session: &str) -> Option<String> {
    let rest = session.strip_prefix(SESSION_PREFIX)?.strip_prefix('-')?;
    if rest.is_empty() {
        return None;
    }
    let Some((warband, tail)) = rest.split_once('-') else {
        return Some(format!("{rest}/"));
    };
    if tail.is_empty() {
        return None;
    }
    if SINGLETON_ROLES.contains(&tail) {
        return Some(format!("{warband}/{tail}"));
    }
    if let Some(name) = tail.strip_prefix("clan-")
        && !name.is_empty()
    {
        return Some(format!("{warband}/clan/{name}"));
    }
    Some(format!("{warband}/raiders/{tail}"))
}

pub fn address_to_session(addr: &str) -> Option<String> {
    Address::parse(addr).map(|a| a.session())
}

fn wildcard(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| wildcard(rest, &text[i..])),
        Some((c, rest)) => text.first() == Some(c) && wildcard(rest, &text[1..]),
    }
}

/// Glob within one segment. Segments are never empty.
fn glob_segment(pattern: &str, segment: &str) -> bool {
    !segment.is_empty() && wildcard(pattern.as_bytes(), segment.as_bytes())
}

/// Match an address against a routing pattern. `*` stands for exactly one
/// path segment and never crosses `/`; a bare `*` matches any address.
pub fn match_pattern(pattern: &str, addr: &str) -> bool {
    if addr.is_empty() {
        return false;
    }
    if pattern == "*" {
        return true;
    }
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let addr_parts: Vec<&str> = addr.split('/').collect();
    pattern_parts.len() == addr_parts.len()
        && pattern_parts
            .iter()
            .zip(&addr_parts)
            .all(|(p, a)| if p.is_empty() { a.is_empty() } else { glob_segment(p, a) })
}

pub fn is_pattern(addr: &str) -> bool {
    addr.contains('*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalize("warchief"), "warchief/");
        assert_eq!(normalize("warchief/"), "warchief/");
        assert_eq!(normalize("horde/witness/"), "horde/witness");
        assert_eq!(normalize("horde/toast"), "horde/raiders/toast");
        assert_eq!(normalize("horde/raider/toast"), "horde/raiders/toast");
        assert_eq!(normalize("horde/raiders/toast"), "horde/raiders/toast");
        assert_eq!(normalize("horde/clan/max"), "horde/clan/max");
        assert_eq!(normalize("horde/*"), "horde/*");
    }

    #[test]
    fn parsing() {
        assert_eq!(
            Address::parse("horde/toast"),
            Some(Address::Raider {
                warband: "horde".into(),
                name: "toast".into()
            })
        );
        assert_eq!(
            Address::parse("shaman").map(|a| a.to_string()).as_deref(),
            Some("shaman/")
        );
        assert!(Address::parse("a/b/c/d").is_none());
        assert_eq!(Address::parse("horde/clan/max").unwrap().warband(), Some("horde"));
    }

    #[test]
    fn variant_spellings() {
        assert_eq!(variants("warchief"), vec!["warchief/", "warchief"]);
        let raider = variants("horde/raiders/toast");
        assert_eq!(raider[0], "horde/raiders/toast");
        assert!(raider.contains(&"horde/toast".to_string()));
        assert!(raider.contains(&"horde/raiders/toast/".to_string()));
    }

    #[test]
    fn sessions_and_addresses() {
        assert_eq!(session_to_address("gt-warchief").as_deref(), Some("warchief/"));
        assert_eq!(session_to_address("gt-horde-witness").as_deref(), Some("horde/witness"));
        assert_eq!(session_to_address("gt-horde-clan-max").as_deref(), Some("horde/clan/max"));
        assert_eq!(session_to_address("gt-horde-raider-01").as_deref(), Some("horde/raiders/raider-01"));
        assert_eq!(session_to_address("tmux-other"), None);

        for addr in ["warchief/", "horde/forge", "horde/clan/max", "horde/raiders/raider-01"] {
            let session = address_to_session(addr).unwrap();
            assert_eq!(session_to_address(&session).as_deref(), Some(addr));
        }
    }

    #[test]
    fn pattern_matching() {
        for x in ["a", "horde/witness", "horde/raiders/toast", "warchief/"] {
            assert!(match_pattern("*", x));
        }
        assert!(!match_pattern("*", ""));
        assert!(match_pattern("a/*/c", "a/b/c"));
        assert!(!match_pattern("a/*", "a/b/c"));
        assert!(match_pattern("horde/*", "horde/witness"));
        assert!(!match_pattern("horde/*", "horde/raiders/toast"));
        assert!(match_pattern("horde/*/*", "horde/raiders/toast"));
        assert!(match_pattern("horde/raiders/raider-*", "horde/raiders/raider-07"));
        assert!(!match_pattern("horde/raiders/raider-*", "horde/raiders/toast"));
        assert!(match_pattern("*/witness", "other/witness"));
    }
}
