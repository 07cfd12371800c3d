use anyhow::Result;
use clap::{Args, Subcommand};

use super::{OutputFormat, Runtime, identity, print_json, resolve_format};
use crate::drums::{Message, MessageKind, Priority, Router, SearchQuery};

#[derive(Debug, Subcommand)]
pub enum DrumsCommand {
    /// Send a drum to an address or pattern (`horde/raiders/*`)
    Send(SendArgs),
    /// List the mailbox, newest first
    Inbox {
        /// Whose mailbox (default: the caller)
        #[arg(long)]
        identity: Option<String>,
        #[arg(long)]
        unread: bool,
        /// Print only the unread count
        #[arg(long, short)]
        quiet: bool,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Show a drum and mark it read
    Read {
        id: String,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Move a drum to the mailbox archive
    Archive {
        id: String,
        #[arg(long)]
        identity: Option<String>,
    },
    /// Search subjects and bodies for a literal string
    Search {
        query: String,
        #[arg(long)]
        identity: Option<String>,
        /// Only senders starting with this address
        #[arg(long)]
        from: Option<String>,
        #[arg(long, conflicts_with = "body_only")]
        subject_only: bool,
        #[arg(long)]
        body_only: bool,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Reply to a drum in the same thread
    Reply {
        id: String,
        #[arg(long, short = 'm')]
        message: String,
        #[arg(long)]
        identity: Option<String>,
    },
    /// Show a thread, oldest first
    Thread {
        thread_id: String,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Recipient address or pattern
    pub to: String,
    #[arg(long, short)]
    pub subject: String,
    #[arg(long, short = 'm', default_value = "")]
    pub message: String,
    /// Sender address (default: the caller)
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long, default_value = "normal")]
    pub priority: Priority,
    #[arg(long = "type", default_value = "notification")]
    pub kind: MessageKind,
    /// Carbon-copy recipients
    #[arg(long)]
    pub cc: Vec<String>,
}

fn print_list(messages: &[Message], format: Option<OutputFormat>) -> Result<()> {
    match resolve_format(format) {
        OutputFormat::Json => print_json(&messages),
        OutputFormat::Pretty => {
            for m in messages {
                let marker = if m.read { ' ' } else { '*' };
                println!(
                    "{marker} {}  {}  {:<24} {}",
                    m.id,
                    m.timestamp.format("%Y-%m-%d %H:%M"),
                    m.from,
                    m.subject
                );
            }
            Ok(())
        }
        OutputFormat::Text => {
            for m in messages {
                println!("{}\t{}\t{}\t{}", m.id, m.from, if m.read { "read" } else { "unread" }, m.subject);
            }
            Ok(())
        }
    }
}

impl DrumsCommand {
    pub fn execute(&self) -> Result<()> {
        let rt = Runtime::discover()?;
        let router = Router::new(&rt.encampment, &rt.stores).with_notifier(&rt.host);

        match self {
            DrumsCommand::Send(args) => {
                let from = identity(args.from.as_deref(), &rt.encampment);
                let mut message = Message::new(&from, &args.to, &args.subject, &args.message)
                    .with_priority(args.priority)
                    .with_kind(args.kind);
                message.cc = args.cc.iter().map(|c| crate::drums::address::normalize(c)).collect();
                let ids = router.send(&message)?;
                println!("Sent {} drum(s): {}", ids.len(), ids.join(", "));
                Ok(())
            }
            DrumsCommand::Inbox {
                identity: who,
                unread,
                quiet,
                format,
            } => {
                let mailbox = router.mailbox_for(&identity(who.as_deref(), &rt.encampment))?;
                if *quiet {
                    let (_, unread) = mailbox.count()?;
                    println!("{unread}");
                    return Ok(());
                }
                let messages = if *unread {
                    mailbox.list_unread()?
                } else {
                    mailbox.list()?
                };
                print_list(&messages, *format)
            }
            DrumsCommand::Read {
                id,
                identity: who,
                format,
            } => {
                let mailbox = router.mailbox_for(&identity(who.as_deref(), &rt.encampment))?;
                let message = mailbox.get(id)?;
                match resolve_format(*format) {
                    OutputFormat::Json => print_json(&message)?,
                    OutputFormat::Pretty | OutputFormat::Text => {
                        println!("From:     {}", message.from);
                        println!("To:       {}", message.to);
                        if !message.cc.is_empty() {
                            println!("Cc:       {}", message.cc.join(", "));
                        }
                        println!("Date:     {}", message.timestamp.to_rfc3339());
                        println!("Priority: {}", message.priority);
                        println!("Thread:   {}", message.thread_id);
                        println!("Subject:  {}", message.subject);
                        if !message.body.is_empty() {
                            println!();
                            println!("{}", message.body.trim_end());
                        }
                    }
                }
                mailbox.mark_read(id)
            }
            DrumsCommand::Archive { id, identity: who } => {
                let mailbox = router.mailbox_for(&identity(who.as_deref(), &rt.encampment))?;
                mailbox.archive(id)?;
                println!("Archived {id}");
                Ok(())
            }
            DrumsCommand::Search {
                query,
                identity: who,
                from,
                subject_only,
                body_only,
                format,
            } => {
                let mailbox = router.mailbox_for(&identity(who.as_deref(), &rt.encampment))?;
                let found = mailbox.search(&SearchQuery {
                    query: query.clone(),
                    from: from.clone(),
                    subject_only: *subject_only,
                    body_only: *body_only,
                })?;
                print_list(&found, *format)
            }
            DrumsCommand::Reply {
                id,
                message,
                identity: who,
            } => {
                let me = identity(who.as_deref(), &rt.encampment);
                let mailbox = router.mailbox_for(&me)?;
                let original = mailbox.get(id)?;
                let ids = router.send(&Message::reply(&original, &me, message))?;
                println!("Replied to {} in {}: {}", original.from, original.thread_id, ids.join(", "));
                Ok(())
            }
            DrumsCommand::Thread {
                thread_id,
                identity: who,
                format,
            } => {
                let mailbox = router.mailbox_for(&identity(who.as_deref(), &rt.encampment))?;
                print_list(&mailbox.list_by_thread(thread_id)?, *format)
            }
        }
    }
}
