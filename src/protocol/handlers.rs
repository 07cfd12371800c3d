//! Protocol dispatch and the witness's default handlers.

use std::collections::BTreeMap;

use serde::Serialize;

use super::messages::{
    MergeFailedPayload, MergedPayload, MessageType, ReworkRequestPayload, parse_message_type,
};
use crate::drums::{Mailbox, Message, Priority, Router};
use crate::error::{ErrorKind, HordeError, kind_of};
use crate::raider::{self, RaiderManager, RemoveOptions};
use crate::store::CleanupStatus;

pub type Handler<'h> = Box<dyn Fn(&Message) -> anyhow::Result<()> + 'h>;

/// Maps each protocol message type to at most one handler.
#[derive(Default)]
pub struct HandlerRegistry<'h> {
    handlers: BTreeMap<MessageType, Handler<'h>>,
}

impl<'h> HandlerRegistry<'h> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, kind: MessageType, handler: impl Fn(&Message) -> anyhow::Result<()> + 'h) {
        self.handlers.insert(kind, Box::new(handler));
    }

    pub fn handles(&self, kind: MessageType) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route `message` to its handler.
    ///
    /// Returns `Ok(false)` when no handler is registered for its type and a
    /// `ProtocolParse` error when the subject is not a protocol message.
    /// Handler errors are returned as-is.
    pub fn dispatch(&self, message: &Message) -> anyhow::Result<bool> {
        let Some(kind) = parse_message_type(&message.subject) else {
            return Err(HordeError::ProtocolParse("not a protocol message".into()).into());
        };
        let Some(handler) = self.handlers.get(&kind) else {
            return Ok(false);
        };
        handler(message)?;
        Ok(true)
    }
}

/// Outcome of one pass over an inbox.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatrolReport {
    pub handled: Vec<String>,
    /// Not protocol messages, or no handler registered.
    pub skipped: Vec<String>,
    /// `(message id, error)`; these stay unread for the next pass.
    pub errors: Vec<(String, String)>,
}

/// Dispatch every unread message, oldest first. Handled messages are marked
/// read; a failing handler does not stop the pass.
pub fn process_inbox(mailbox: &Mailbox<'_>, registry: &HandlerRegistry<'_>) -> anyhow::Result<PatrolReport> {
    let mut report = PatrolReport::default();
    let mut unread = mailbox.list_unread()?;
    unread.reverse();
    for message in unread {
        match registry.dispatch(&message) {
            Ok(true) => {
                if let Err(e) = mailbox.mark_read(&message.id) {
                    tracing::warn!(id = %message.id, error = %format!("{e:#}"), "handled message could not be marked read");
                }
                report.handled.push(message.id);
            }
            Ok(false) => report.skipped.push(message.id),
            Err(e) if kind_of(&e) == Some(ErrorKind::ProtocolParse) && parse_message_type(&message.subject).is_none() => {
                report.skipped.push(message.id);
            }
            Err(e) => {
                tracing::warn!(id = %message.id, subject = %message.subject, error = %format!("{e:#}"), "protocol handler failed");
                report.errors.push((message.id, format!("{e:#}")));
            }
        }
    }
    Ok(report)
}

// --- Witness ---

/// Whether a merged raider was cleaned up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NukeDecision {
    pub nuked: bool,
    pub reason: String,
}

/// The witness's reactions to forge verdicts for one warband.
pub struct Witness<'a> {
    router: &'a Router<'a>,
    raiders: &'a RaiderManager<'a>,
    warband: String,
}

impl<'a> Witness<'a> {
    pub fn new(router: &'a Router<'a>, raiders: &'a RaiderManager<'a>, warband: &str) -> Self {
        Self {
            router,
            raiders,
            warband: warband.to_string(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}/witness", self.warband)
    }

    pub fn registry(&self) -> HandlerRegistry<'_> {
        let mut registry = HandlerRegistry::new();
        registry.register(MessageType::Merged, |m| self.on_merged(m).map(|_| ()));
        registry.register(MessageType::MergeFailed, |m| self.on_merge_failed(m));
        registry.register(MessageType::ReworkRequest, |m| self.on_rework_request(m));
        registry
    }

    fn notify(&self, raider: &str, subject: &str, body: &str, priority: Priority) -> anyhow::Result<()> {
        let message = Message::new(&self.address(), &raider::address(&self.warband, raider), subject, body)
            .with_priority(priority);
        self.router.send(&message)?;
        Ok(())
    }

    pub fn on_merged(&self, message: &Message) -> anyhow::Result<NukeDecision> {
        let payload = MergedPayload::parse(&message.body)?;
        let raider = payload.header.raider.as_str();
        tracing::info!(
            warband = %self.warband,
            raider,
            branch = %payload.header.branch,
            commit = payload.merge_commit.as_deref().unwrap_or(""),
            "merged"
        );
        let commit = payload
            .merge_commit
            .as_deref()
            .map(|c| format!(" as {c}"))
            .unwrap_or_default();
        self.notify(
            raider,
            &format!("Merged: {}", payload.header.branch),
            &format!(
                "Your branch {} was merged into {}{commit}.\nIssue: {}\n",
                payload.header.branch, payload.header.target, payload.header.issue
            ),
            Priority::Normal,
        )?;

        let decision = self.auto_nuke(raider)?;
        self.record_event(
            "merge.merged",
            serde_json::json!({
                "raider": raider,
                "branch": payload.header.branch,
                "merge_commit": payload.merge_commit,
                "nuked": decision.nuked,
                "reason": decision.reason,
            }),
        );
        Ok(decision)
    }

    /// Nuke only when the raider itself reports a clean worktree.
    pub fn auto_nuke(&self, raider: &str) -> anyhow::Result<NukeDecision> {
        if !self.raiders.raider_dir(raider).exists() {
            return Ok(NukeDecision {
                nuked: false,
                reason: "raider already gone".to_string(),
            });
        }
        let status = self.raiders.cleanup_status(raider)?;
        if status != CleanupStatus::Clean {
            tracing::info!(warband = %self.warband, raider, %status, "keeping merged raider");
            return Ok(NukeDecision {
                nuked: false,
                reason: format!("cleanup status is {status}"),
            });
        }
        self.raiders.remove(raider, RemoveOptions::default())?;
        Ok(NukeDecision {
            nuked: true,
            reason: "clean".to_string(),
        })
    }

    pub fn on_merge_failed(&self, message: &Message) -> anyhow::Result<()> {
        let payload = MergeFailedPayload::parse(&message.body)?;
        let raider = payload.header.raider.as_str();
        tracing::warn!(
            warband = %self.warband,
            raider,
            branch = %payload.header.branch,
            failure = %payload.failure_type,
            "merge failed"
        );
        let error = payload.error.as_deref().unwrap_or("no details");
        self.notify(
            raider,
            &format!("Merge failed: {}", payload.header.branch),
            &format!(
                "The forge could not merge {} ({} failure): {error}\n\nFix the problem on your branch, push, and report ready again.\n",
                payload.header.branch, payload.failure_type
            ),
            Priority::High,
        )?;
        self.record_event(
            "merge.failed",
            serde_json::json!({"raider": raider, "branch": payload.header.branch, "failure_type": payload.failure_type}),
        );
        Ok(())
    }

    pub fn on_rework_request(&self, message: &Message) -> anyhow::Result<()> {
        let payload = ReworkRequestPayload::parse(&message.body)?;
        let raider = payload.header.raider.as_str();
        let target = payload.header.target.as_str();
        tracing::info!(warband = %self.warband, raider, branch = %payload.header.branch, "rework requested");
        let mut body = format!(
            "Your branch {} needs a rebase before it can merge.\n\n  git fetch origin\n  git rebase origin/{target}\n  git push --force-with-lease\n",
            payload.header.branch
        );
        if !payload.conflict_files.is_empty() {
            body.push_str(&format!("\nConflicting files: {}\n", payload.conflict_files.join(", ")));
        }
        self.notify(
            raider,
            &format!("Rework needed: {}", payload.header.branch),
            &body,
            Priority::High,
        )?;
        self.record_event(
            "merge.rework",
            serde_json::json!({"raider": raider, "branch": payload.header.branch, "conflict_files": payload.conflict_files}),
        );
        Ok(())
    }

    fn record_event(&self, kind: &str, payload: serde_json::Value) {
        self.router.encampment().events().record(kind, &self.address(), payload);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::UserSettings;
    use crate::encampment::Encampment;
    use crate::protocol::messages::{self, FailureType, MergeHeader};
    use crate::raider::AddOptions;
    use crate::session::fake::FakeHost;
    use crate::store::memory::MemoryStore;
    use crate::store::agent;
    use crate::vcs::fake::FakeVcs;
    use crate::warband::{self, Warband, WarbandManager};

    #[test]
    fn dispatch_rules() {
        let calls = Cell::new(0);
        let mut registry = HandlerRegistry::new();
        registry.register(MessageType::Merged, |_| {
            calls.set(calls.get() + 1);
            Ok(())
        });
        registry.register(MessageType::MergeFailed, |_| {
            Err(HordeError::Unavailable("forge offline".into()).into())
        });

        let msg = |subject: &str| Message::new("horde/forge", "horde/witness", subject, "");
        assert!(registry.dispatch(&msg("MERGED toast")).unwrap());
        assert_eq!(calls.get(), 1);
        assert!(!registry.dispatch(&msg("REWORK_REQUEST toast")).unwrap());

        let err = registry.dispatch(&msg("hello there")).unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::ProtocolParse));
        assert!(format!("{err}").contains("not a protocol message"));

        let err = registry.dispatch(&msg("MERGE_FAILED toast")).unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::Unavailable));
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        camp: Encampment,
        warband: Warband,
        vcs: FakeVcs,
        store: MemoryStore,
        host: FakeHost,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = MemoryStore::new("hd");
            let camp = Encampment::init(dir.path(), "camp", &store).unwrap();
            let vcs = FakeVcs::default();
            let warband = WarbandManager::new(&camp, &vcs, &store)
                .add(&warband::AddOptions {
                    name: "horde".into(),
                    git_url: "git@host:o/horde.git".into(),
                    prefix: Some("hd".into()),
                    ..Default::default()
                })
                .unwrap();
            Self {
                _dir: dir,
                camp,
                warband,
                vcs,
                store,
                host: FakeHost::default(),
            }
        }

        fn raiders(&self) -> RaiderManager<'_> {
            RaiderManager::new(
                &self.camp,
                &self.warband,
                &self.vcs,
                &self.store,
                &self.host,
                UserSettings::default(),
            )
        }
    }

    fn header(branch: &str) -> MergeHeader {
        MergeHeader {
            branch: branch.to_string(),
            issue: "hd-t1".into(),
            raider: "toast".into(),
            warband: "horde".into(),
            target: "main".into(),
        }
    }

    fn toast_inbox(router: &Router<'_>) -> Vec<Message> {
        router.mailbox_for("horde/raiders/toast").unwrap().list().unwrap()
    }

    #[test]
    fn merged_and_clean_nukes_raider() {
        let fx = Fixture::new();
        let raiders = fx.raiders();
        let toast = raiders
            .add("toast", &AddOptions { banner_bead: Some("hd-t1".into()) })
            .unwrap();
        agent::update_cleanup_status(&fx.store, &raiders.agent_id("toast"), CleanupStatus::Clean).unwrap();

        let router = Router::new(&fx.camp, &fx.store);
        let witness = Witness::new(&router, &raiders, "horde");
        router
            .send(&messages::merged("horde/forge", "horde/witness", header(&toast.branch), Some("abc")))
            .unwrap();

        let inbox = router.mailbox_for("horde/witness").unwrap();
        let report = process_inbox(&inbox, &witness.registry()).unwrap();
        assert_eq!(report.handled.len(), 1);
        assert!(report.errors.is_empty());
        assert_eq!(inbox.count().unwrap().1, 0);

        assert!(!fx.warband.raiders_dir().join("toast").exists());
        let notes = toast_inbox(&router);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].priority, Priority::Normal);
        assert!(notes[0].body.contains("abc"));
        assert_eq!(raiders.allocate_name().unwrap(), "raider-01");
    }

    #[test]
    fn merged_but_dirty_keeps_raider() {
        let fx = Fixture::new();
        let raiders = fx.raiders();
        let toast = raiders.add("toast", &AddOptions::default()).unwrap();
        agent::update_cleanup_status(&fx.store, &raiders.agent_id("toast"), CleanupStatus::HasUnpushed)
            .unwrap();

        let router = Router::new(&fx.camp, &fx.store);
        let witness = Witness::new(&router, &raiders, "horde");
        let msg = messages::merged("horde/forge", "horde/witness", header(&toast.branch), None);
        let decision = witness.on_merged(&msg).unwrap();
        assert!(!decision.nuked);
        assert_eq!(decision.reason, "cleanup status is has_unpushed");
        assert!(fx.warband.raiders_dir().join("toast").exists());

        // Redelivery after a nuke is harmless.
        raiders.remove("toast", RemoveOptions { force: false, nuclear: true }).unwrap();
        assert_eq!(witness.auto_nuke("toast").unwrap().reason, "raider already gone");
    }

    #[test]
    fn failures_notify_with_high_priority() {
        let fx = Fixture::new();
        let raiders = fx.raiders();
        let router = Router::new(&fx.camp, &fx.store);
        let witness = Witness::new(&router, &raiders, "horde");

        let failed = messages::merge_failed(
            "horde/forge",
            "horde/witness",
            header("raider/toast-k2"),
            FailureType::Build,
            Some("linker error"),
        );
        let rework = messages::rework_request(
            "horde/forge",
            "horde/witness",
            header("raider/toast-k2"),
            vec!["a.go".into(), "b.go".into()],
        );
        let registry = witness.registry();
        assert!(registry.dispatch(&failed).unwrap());
        assert!(registry.dispatch(&rework).unwrap());

        let notes = toast_inbox(&router);
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|m| m.priority == Priority::High));
        let rebase = notes.iter().find(|m| m.subject.starts_with("Rework")).unwrap();
        assert!(rebase.body.contains("git rebase origin/main"));
        assert!(rebase.body.contains("a.go, b.go"));
        let fail = notes.iter().find(|m| m.subject.starts_with("Merge failed")).unwrap();
        assert!(fail.body.contains("linker error"));
    }

    #[test]
    fn patrol_skips_chatter_and_keeps_failures_unread() {
        let fx = Fixture::new();
        let raiders = fx.raiders();
        let router = Router::new(&fx.camp, &fx.store);
        let witness = Witness::new(&router, &raiders, "horde");

        router
            .send(&Message::new("warchief/", "horde/witness", "status?", "how is it going"))
            .unwrap();
        router
            .send(&Message::new("horde/forge", "horde/witness", "MERGED toast", "Issue: hd-1\n"))
            .unwrap();
        router
            .send(&messages::merge_ready("horde/forge", "horde/witness", header("b")))
            .unwrap();

        let inbox = router.mailbox_for("horde/witness").unwrap();
        let report = process_inbox(&inbox, &witness.registry()).unwrap();
        assert!(report.handled.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(inbox.count().unwrap(), (3, 3));
    }
}
