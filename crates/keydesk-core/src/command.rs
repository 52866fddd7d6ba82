//! Chat command parser.
//!
//! Turns free-form channel text into exactly one [`Command`]. Users write
//! things like "13番借ります" or "14 返す"; mentioning the bot without a
//! borrow/return phrase asks for the current status.

use regex::Regex;
use tracing::trace;

use crate::{ChannelId, DomainError, DomainResult, KeyId, UserId};

/// Two ASCII digits, an optional counter word, then a borrow verb.
///
/// Separators are ASCII whitespace only; a full-width space (U+3000) does
/// not count.
const BORROW_PATTERN: &str = r"(?i)([0-9]{2})[\t\n\f\r ]*番?[\t\n\f\r ]*(借ります|借りる|借りたい)";

/// Two ASCII digits, an optional counter word, then a return verb.
const RETURN_PATTERN: &str = r"(?i)([0-9]{2})[\t\n\f\r ]*番?[\t\n\f\r ]*(返します|返す|返却します)";

/// What a message asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Check out a key.
    Borrow { key: KeyId },
    /// Check a key back in.
    Return { key: KeyId },
    /// Report every outstanding loan.
    StatusQuery,
    /// Nothing actionable.
    None,
}

/// A classified message together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub user: UserId,
    pub channel: ChannelId,
}

impl Command {
    /// Returns true if the message needs no reply.
    pub fn is_none(&self) -> bool {
        self.kind == CommandKind::None
    }
}

/// Compiled patterns plus the bot's own mention token.
#[derive(Debug, Clone)]
pub struct CommandParser {
    borrow: Regex,
    return_: Regex,
    bot_mention: String,
}

impl CommandParser {
    /// Builds a parser for a bot whose user id is `bot_user`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidPattern` if a built-in pattern fails to
    /// compile.
    pub fn new(bot_user: &UserId) -> DomainResult<Self> {
        let borrow =
            Regex::new(BORROW_PATTERN).map_err(|e| DomainError::pattern("borrow", &e))?;
        let return_ =
            Regex::new(RETURN_PATTERN).map_err(|e| DomainError::pattern("return", &e))?;
        Ok(Self {
            borrow,
            return_,
            bot_mention: bot_user.mention(),
        })
    }

    /// Classifies `text` posted by `user` in `channel`.
    pub fn parse(&self, text: &str, user: UserId, channel: ChannelId) -> Command {
        Command {
            kind: self.classify(text),
            user,
            channel,
        }
    }

    /// Classifies `text` alone. Borrow wins over return; a bare mention of
    /// the bot is a status query.
    pub fn classify(&self, text: &str) -> CommandKind {
        if let Some(key) = capture_key(&self.borrow, text) {
            trace!(key = %key, "Detected borrow command");
            return CommandKind::Borrow { key };
        }

        if let Some(key) = capture_key(&self.return_, text) {
            trace!(key = %key, "Detected return command");
            return CommandKind::Return { key };
        }

        if text.contains(&self.bot_mention) {
            trace!("Bot mentioned, status requested");
            return CommandKind::StatusQuery;
        }

        CommandKind::None
    }

    /// The mention token this parser treats as a status request.
    pub fn bot_mention(&self) -> &str {
        &self.bot_mention
    }
}

fn capture_key(pattern: &Regex, text: &str) -> Option<KeyId> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| KeyId::new(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CommandParser {
        CommandParser::new(&UserId::new("UBOT")).unwrap()
    }

    fn borrow(key: &str) -> CommandKind {
        CommandKind::Borrow {
            key: KeyId::new(key),
        }
    }

    fn ret(key: &str) -> CommandKind {
        CommandKind::Return {
            key: KeyId::new(key),
        }
    }

    #[test]
    fn test_borrow_variants() {
        let p = parser();
        assert_eq!(p.classify("13番借ります"), borrow("13"));
        assert_eq!(p.classify("13 番 借ります"), borrow("13"));
        assert_eq!(p.classify("14 借りる"), borrow("14"));
        assert_eq!(p.classify("15借りたい"), borrow("15"));
    }

    #[test]
    fn test_return_variants() {
        let p = parser();
        assert_eq!(p.classify("13番返します"), ret("13"));
        assert_eq!(p.classify("14 返す"), ret("14"));
        assert_eq!(p.classify("15 番返却します"), ret("15"));
    }

    #[test]
    fn test_phrase_inside_sentence() {
        let p = parser();
        assert_eq!(p.classify("おはようございます、13番借ります！"), borrow("13"));
    }

    #[test]
    fn test_unknown_key_still_parsed() {
        // The ledger decides validity, not the parser.
        assert_eq!(parser().classify("99 借ります"), borrow("99"));
    }

    #[test]
    fn test_single_digit_is_ignored() {
        assert_eq!(parser().classify("3 借ります"), CommandKind::None);
    }

    #[test]
    fn test_full_width_space_is_not_a_separator() {
        let p = parser();
        assert_eq!(p.classify("13\u{3000}借ります"), CommandKind::None);
        assert_eq!(p.classify("14番\u{3000}返します"), CommandKind::None);
        assert_eq!(p.classify("13\t借ります"), borrow("13"));
    }

    #[test]
    fn test_borrow_checked_before_return() {
        let p = parser();
        assert_eq!(p.classify("14返します、13借ります"), borrow("13"));
    }

    #[test]
    fn test_mention_is_status_query() {
        let p = parser();
        assert_eq!(p.classify("<@UBOT> 今どうなってる？"), CommandKind::StatusQuery);
    }

    #[test]
    fn test_command_beats_mention() {
        let p = parser();
        assert_eq!(p.classify("<@UBOT> 13借ります"), borrow("13"));
    }

    #[test]
    fn test_other_mentions_ignored() {
        let p = parser();
        assert_eq!(p.classify("<@USOMEONE> hello"), CommandKind::None);
        assert_eq!(p.classify("UBOT"), CommandKind::None);
    }

    #[test]
    fn test_plain_chatter_is_none() {
        let p = parser();
        assert_eq!(p.classify("lunch?"), CommandKind::None);
        assert_eq!(p.classify(""), CommandKind::None);
        assert_eq!(p.classify("13番の鍵どこ？"), CommandKind::None);
    }

    #[test]
    fn test_parse_carries_origin() {
        let p = parser();
        let cmd = p.parse("13借ります", UserId::new("U1"), ChannelId::new("C1"));
        assert_eq!(cmd.kind, borrow("13"));
        assert_eq!(cmd.user, UserId::new("U1"));
        assert_eq!(cmd.channel, ChannelId::new("C1"));
        assert!(!cmd.is_none());
    }

    #[test]
    fn test_bot_mention_token() {
        assert_eq!(parser().bot_mention(), "<@UBOT>");
    }
}
