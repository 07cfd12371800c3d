//! Address resolution and delivery.

use std::path::PathBuf;

use super::address::{self, Address, ENCAMPMENT_ROLES};
use super::mailbox::{INBOX_FILE, Mailbox};
use super::message::Message;
use crate::clan::{DRUMS_DIR, STATE_FILE};
use crate::encampment::Encampment;
use crate::error::HordeError;
use crate::raider::pool::existing_raiders;
use crate::session::SessionHost;
use crate::store::StoreProvider;
use crate::warband::Warband;

/// Routes drums to the right mailbox and optionally nudges live recipients.
pub struct Router<'a> {
    encampment: &'a Encampment,
    stores: &'a dyn StoreProvider,
    notifier: Option<&'a dyn SessionHost>,
}

impl<'a> Router<'a> {
    pub fn new(encampment: &'a Encampment, stores: &'a dyn StoreProvider) -> Self {
        Self {
            encampment,
            stores,
            notifier: None,
        }
    }

    pub fn encampment(&self) -> &'a Encampment {
        self.encampment
    }

    /// Nudge recipients with a running session after delivery.
    pub fn with_notifier(mut self, host: &'a dyn SessionHost) -> Self {
        self.notifier = Some(host);
        self
    }

    /// The mailbox for `identity`.
    ///
    /// Encampment agents read the encampment store, warband agents their
    /// warband's store. A clan worker with an existing `drums/inbox.jsonl`
    /// keeps its legacy JSONL inbox.
    pub fn mailbox_for(&self, identity: &str) -> anyhow::Result<Mailbox<'a>> {
        let addr = Address::parse(identity)
            .ok_or_else(|| HordeError::Validation(format!("invalid address {identity:?}")))?;
        let canonical = addr.to_string();
        let Some(warband_name) = addr.warband() else {
            let store_dir = self.encampment.store_dir();
            return Ok(Mailbox::store(&canonical, self.stores.open(&store_dir), &store_dir));
        };
        let warband = Warband::load(self.encampment, warband_name)?;
        if let Address::Clan { ref name, .. } = addr {
            let inbox = clan_inbox(&warband, name);
            if inbox.is_file() {
                return Ok(Mailbox::jsonl(&canonical, &inbox));
            }
        }
        let store_dir = warband.store_dir();
        Ok(Mailbox::store(&canonical, self.stores.open(&store_dir), &store_dir))
    }

    /// Every address that currently has somewhere to receive mail.
    pub fn known_addresses(&self) -> anyhow::Result<Vec<String>> {
        let mut out: Vec<String> = ENCAMPMENT_ROLES.iter().map(|r| format!("{r}/")).collect();
        for name in self.encampment.registry()?.warbands.keys() {
            let warband = match Warband::load(self.encampment, name) {
                Ok(w) => w,
                Err(e) => {
                    tracing::warn!(warband = %name, error = %format!("{e:#}"), "skipping unreadable warband");
                    continue;
                }
            };
            out.push(format!("{name}/witness"));
            out.push(format!("{name}/forge"));
            for raider in existing_raiders(&warband.raiders_dir())? {
                out.push(format!("{name}/raiders/{raider}"));
            }
            out.extend(
                clan_members(&warband)
                    .into_iter()
                    .map(|member| format!("{name}/clan/{member}")),
            );
        }
        Ok(out)
    }

    /// Resolve `to` into concrete recipients, expanding patterns.
    pub fn resolve(&self, to: &str) -> anyhow::Result<Vec<String>> {
        if !address::is_pattern(to) {
            return Ok(vec![address::normalize(to)]);
        }
        let matched: Vec<String> = self
            .known_addresses()?
            .into_iter()
            .filter(|a| address::match_pattern(to, a))
            .collect();
        if matched.is_empty() {
            return Err(HordeError::NotFound(format!("no recipients match {to}")).into());
        }
        Ok(matched)
    }

    /// Deliver `message` to every recipient of its `to` and `cc`. Returns
    /// the ids the copies were stored under.
    ///
    /// A cc recipient sharing a store with a primary recipient sees the
    /// original through its `cc:` label and gets no copy.
    pub fn send(&self, message: &Message) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut primary_locations: Vec<PathBuf> = Vec::new();
        for recipient in self.resolve(&message.to)? {
            let mailbox = self.mailbox_for(&recipient)?;
            let mut copy = message.clone();
            copy.to = mailbox.identity().to_string();
            let id = mailbox.deliver(&copy)?;
            tracing::info!(to = %copy.to, from = %copy.from, id = %id, subject = %copy.subject, "drum delivered");
            if !mailbox.is_jsonl() {
                primary_locations.push(mailbox.location().to_path_buf());
            }
            self.notify(&copy);
            ids.push(id);
        }
        for cc in &message.cc {
            let mailbox = self.mailbox_for(cc)?;
            if !mailbox.is_jsonl() && primary_locations.iter().any(|p| p == mailbox.location()) {
                self.notify(&Message {
                    to: mailbox.identity().to_string(),
                    ..message.clone()
                });
                continue;
            }
            let mut copy = message.clone();
            copy.to = mailbox.identity().to_string();
            copy.cc.clear();
            ids.push(mailbox.deliver(&copy)?);
            self.notify(&copy);
        }
        Ok(ids)
    }

    /// Best-effort keystroke nudge to a running recipient.
    fn notify(&self, message: &Message) {
        let Some(host) = self.notifier else {
            return;
        };
        let Some(session) = address::address_to_session(&message.to) else {
            return;
        };
        match host.has_session(&session) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::warn!(session = %session, error = %format!("{e:#}"), "could not check session");
                return;
            }
        }
        let nudge = format!(
            "You have new drums from {}: {} (run `hd drums inbox`)",
            message.from, message.subject
        );
        if let Err(e) = host.send_keys_debounced(&session, &nudge, std::time::Duration::from_millis(500)) {
            tracing::warn!(session = %session, error = %format!("{e:#}"), "could not nudge recipient");
        }
    }
}

fn clan_inbox(warband: &Warband, name: &str) -> PathBuf {
    warband.clan_dir().join(name).join(DRUMS_DIR).join(INBOX_FILE)
}

fn clan_members(warband: &Warband) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(warband.clan_dir()) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().join(STATE_FILE).is_file())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake::FakeHost;
    use crate::store::memory::MemoryStore;
    use crate::vcs::fake::FakeVcs;
    use crate::warband::{AddOptions, WarbandManager};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: MemoryStore,
        camp: Encampment,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("hd");
        let camp = Encampment::init(dir.path(), "camp", &store).unwrap();
        let vcs = FakeVcs::default();
        WarbandManager::new(&camp, &vcs, &store)
            .add(&AddOptions {
                name: "horde".into(),
                git_url: "git@host:o/horde.git".into(),
                local_repo: None,
                prefix: Some("hd".into()),
            })
            .unwrap();
        let warband = Warband::load(&camp, "horde").unwrap();
        for raider in ["toast", "nux"] {
            std::fs::create_dir_all(warband.raiders_dir().join(raider).join("horde")).unwrap();
        }
        let max = warband.clan_dir().join("max");
        std::fs::create_dir_all(max.join(DRUMS_DIR)).unwrap();
        std::fs::write(max.join(STATE_FILE), "{}").unwrap();
        Fixture {
            _dir: dir,
            store,
            camp,
        }
    }

    #[test]
    fn mailbox_selection() {
        let fx = fixture();
        let router = Router::new(&fx.camp, &fx.store);
        let camp_box = router.mailbox_for("warchief").unwrap();
        assert_eq!(camp_box.identity(), "warchief/");
        assert_eq!(camp_box.location(), fx.camp.store_dir());

        let clan = router.mailbox_for("horde/clan/max").unwrap();
        assert!(!clan.is_jsonl());
        let inbox = clan_inbox(&Warband::load(&fx.camp, "horde").unwrap(), "max");
        std::fs::write(&inbox, "").unwrap();
        assert!(router.mailbox_for("horde/clan/max").unwrap().is_jsonl());

        let err = router.mailbox_for("nowhere/at/all/x").unwrap_err();
        assert_eq!(crate::error::kind_of(&err), Some(crate::error::ErrorKind::Validation));
        assert!(router.mailbox_for("ghost/witness").is_err());
    }

    #[test]
    fn pattern_send_expands_one_segment() {
        let fx = fixture();
        let router = Router::new(&fx.camp, &fx.store);
        let msg = Message::new("warchief/", "horde/raiders/*", "stand down", "");
        assert_eq!(router.send(&msg).unwrap().len(), 2);
        assert_eq!(router.mailbox_for("horde/toast").unwrap().count().unwrap(), (1, 1));

        assert_eq!(router.resolve("horde/*").unwrap(), vec!["horde/witness", "horde/forge"]);
        let none = router.resolve("other/*").unwrap_err();
        assert!(crate::error::is_not_found(&none));
    }

    #[test]
    fn cc_in_same_store_uses_label() {
        let fx = fixture();
        let router = Router::new(&fx.camp, &fx.store);
        let mut msg = Message::new("horde/forge", "horde/witness", "MERGED toast", "");
        msg.cc = vec!["horde/toast".into(), "warchief".into()];
        let ids = router.send(&msg).unwrap();
        // Witness and toast share the memory store location; warchief does not.
        assert_eq!(ids.len(), 2);
        let toast = router.mailbox_for("horde/raiders/toast").unwrap().list().unwrap();
        assert_eq!(toast.len(), 1);
        assert_eq!(toast[0].to, "horde/witness");
    }

    #[test]
    fn nudges_running_recipients() {
        let fx = fixture();
        let host = FakeHost::default();
        host.new_session_with_command("gt-horde-toast", std::path::Path::new("/tmp"), "claude")
            .unwrap();
        let router = Router::new(&fx.camp, &fx.store).with_notifier(&host);
        router
            .send(&Message::new("warchief/", "horde/toast", "check in", ""))
            .unwrap();
        router
            .send(&Message::new("warchief/", "horde/nux", "check in", ""))
            .unwrap();
        assert_eq!(host.sent_keys("gt-horde-toast").len(), 1);
        assert!(host.sent_keys("gt-horde-toast")[0].contains("check in"));
        assert!(host.sent_keys("gt-horde-nux").is_empty());
    }
}
