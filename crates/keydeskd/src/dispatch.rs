//! Applying commands to the ledger.
//!
//! Dispatch is split in two so the event loop never waits on the network:
//! [`apply`] runs synchronously on the event task and mutates the ledger in
//! arrival order; outcomes are then queued to a single reply poster, which
//! resolves display names (after the ledger lock is released) and posts the
//! replies in the same order.

use std::collections::HashMap;
use std::sync::Arc;

use keydesk_core::{ChannelId, Command, CommandKind, KeyRecord, Ledger, LedgerError, UserId};
use keydesk_protocol::{resolve_display_name, ChatBus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reply::{self, NamedLoan};

/// Result of applying one command, carrying copies of the records involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Borrowed(KeyRecord),
    Returned(KeyRecord),
    Rejected(LedgerError),
    Status(Vec<KeyRecord>),
}

/// Applies `command` to `ledger`. `None` means no reply is due.
pub fn apply(ledger: &Ledger, command: &Command) -> Option<Outcome> {
    let outcome = match &command.kind {
        CommandKind::Borrow { key } => match ledger.borrow(key, &command.user) {
            Ok(record) => {
                info!(key = %key, user = %command.user, "Key borrowed");
                Outcome::Borrowed(record)
            }
            Err(e) => Outcome::Rejected(e),
        },
        CommandKind::Return { key } => match ledger.return_key(key, &command.user) {
            Ok(record) => {
                info!(key = %key, user = %command.user, "Key returned");
                Outcome::Returned(record)
            }
            Err(e) => Outcome::Rejected(e),
        },
        CommandKind::StatusQuery => Outcome::Status(ledger.snapshot()),
        CommandKind::None => return None,
    };

    if let Outcome::Rejected(e) = &outcome {
        debug!(user = %command.user, reason = %e, "Command rejected");
    }
    Some(outcome)
}

/// Renders the chat reply for `outcome`.
pub async fn render(bus: &dyn ChatBus, outcome: Outcome) -> String {
    match outcome {
        Outcome::Borrowed(record) => reply::borrowed(&record.key_id, &record.borrower),
        Outcome::Returned(record) => reply::returned(&record.key_id, &record.borrower),
        Outcome::Rejected(err) => {
            let holder = holder_of(&err);
            let name = match holder {
                Some(user) => resolve_display_name(bus, user).await,
                None => String::new(),
            };
            reply::rejection(&err, &name)
        }
        Outcome::Status(records) => reply::status_report(&name_loans(bus, records).await),
    }
}

/// Queue of outcomes waiting to be posted.
pub type ReplySender = mpsc::UnboundedSender<Outcome>;

/// Spawns the task that renders and posts replies one at a time, in queue
/// order.
///
/// The task drains the queue and exits once every [`ReplySender`] is dropped.
pub fn spawn_reply_poster(
    bus: Arc<dyn ChatBus>,
    channel: ChannelId,
) -> (ReplySender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outcome>();
    let handle = tokio::spawn(async move {
        while let Some(outcome) = rx.recv().await {
            let reply = render(bus.as_ref(), outcome).await;
            if let Err(e) = bus.post_message(&channel, &reply).await {
                warn!(channel = %channel, error = %e, "Failed to post reply");
            }
        }
        debug!("Reply poster stopped");
    });
    (tx, handle)
}

/// The current borrower named by a rejection, if any.
fn holder_of(err: &LedgerError) -> Option<&UserId> {
    match err {
        LedgerError::AlreadyBorrowed {
            current_borrower, ..
        } => Some(current_borrower),
        LedgerError::WrongBorrower {
            actual_borrower, ..
        } => Some(actual_borrower),
        LedgerError::InvalidKey { .. } | LedgerError::NotBorrowed { .. } => None,
    }
}

/// Pairs each record with its borrower's display name. Each distinct
/// borrower is looked up once.
pub async fn name_loans(bus: &dyn ChatBus, records: Vec<KeyRecord>) -> Vec<NamedLoan> {
    let mut names: HashMap<UserId, String> = HashMap::new();
    let mut loans = Vec::with_capacity(records.len());

    for record in records {
        let borrower_name = match names.get(&record.borrower) {
            Some(name) => name.clone(),
            None => {
                let name = resolve_display_name(bus, &record.borrower).await;
                names.insert(record.borrower.clone(), name.clone());
                name
            }
        };
        loans.push(NamedLoan {
            record,
            borrower_name,
        });
    }

    loans
}

#[cfg(test)]
mod tests {
    use super::*;
    use keydesk_core::KeyId;

    fn command(kind: CommandKind, user: &str) -> Command {
        Command {
            kind,
            user: UserId::new(user),
            channel: ChannelId::new("C1"),
        }
    }

    fn borrow(key: &str, user: &str) -> Command {
        command(CommandKind::Borrow { key: KeyId::new(key) }, user)
    }

    fn ret(key: &str, user: &str) -> Command {
        command(CommandKind::Return { key: KeyId::new(key) }, user)
    }

    #[test]
    fn test_none_needs_no_reply() {
        let ledger = Ledger::with_defaults();
        assert_eq!(apply(&ledger, &command(CommandKind::None, "U1")), None);
    }

    #[test]
    fn test_borrow_and_return_outcomes() {
        let ledger = Ledger::with_defaults();

        assert!(matches!(apply(&ledger, &borrow("13", "U1")), Some(Outcome::Borrowed(_))));
        assert!(matches!(
            apply(&ledger, &borrow("13", "U2")),
            Some(Outcome::Rejected(LedgerError::AlreadyBorrowed { .. }))
        ));
        assert!(matches!(
            apply(&ledger, &ret("13", "U2")),
            Some(Outcome::Rejected(LedgerError::WrongBorrower { .. }))
        ));
        assert!(matches!(apply(&ledger, &ret("13", "U1")), Some(Outcome::Returned(_))));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_invalid_key_outcome() {
        let ledger = Ledger::with_defaults();
        assert_eq!(
            apply(&ledger, &borrow("99", "U1")),
            Some(Outcome::Rejected(LedgerError::InvalidKey {
                key: KeyId::new("99")
            }))
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_status_outcome_snapshots() {
        let ledger = Ledger::with_defaults();
        apply(&ledger, &borrow("14", "U1"));
        match apply(&ledger, &command(CommandKind::StatusQuery, "U2")) {
            Some(Outcome::Status(records)) => assert_eq!(records.len(), 1),
            other => panic!("expected status outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_holder_of() {
        let key = KeyId::new("13");
        assert_eq!(holder_of(&LedgerError::NotBorrowed { key: key.clone() }), None);
        let err = LedgerError::WrongBorrower {
            key,
            actual_borrower: UserId::new("U1"),
        };
        assert_eq!(holder_of(&err), Some(&UserId::new("U1")));
    }
}
