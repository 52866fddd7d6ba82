//! Chat reply texts.
//!
//! Pure rendering: callers resolve display names first and pass them in.
//! Users talk to the bot in Japanese, so replies are Japanese too.

use chrono::{DateTime, Duration, Local, Utc};
use keydesk_core::{KeyId, KeyRecord, LedgerError, UserId};

/// Reply to a status query when every key is in.
pub const NOTHING_BORROWED: &str = "現在、貸し出されているカードはありません。";

/// First line of a status report.
pub const STATUS_HEADER: &str = "現在のカードの貸し出し状況:";

/// A loan paired with the borrower's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedLoan {
    pub record: KeyRecord,
    pub borrower_name: String,
}

/// Borrow timestamps are shown in the host's local time, minute precision.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// "2日" for whole days, "36時間" otherwise.
pub fn format_threshold(threshold: Duration) -> String {
    let hours = threshold.num_hours();
    if hours > 0 && hours % 24 == 0 {
        format!("{}日", hours / 24)
    } else {
        format!("{hours}時間")
    }
}

pub fn borrowed(key: &KeyId, user: &UserId) -> String {
    format!("カード番号{key}を{}さんが借りました。", user.mention())
}

pub fn returned(key: &KeyId, user: &UserId) -> String {
    format!("カード番号{key}が返却されました。({}さん)", user.mention())
}

pub fn invalid_key(key: &KeyId) -> String {
    format!("カード番号が無効です: {key}")
}

pub fn already_borrowed(key: &KeyId, borrower_name: &str) -> String {
    format!("カード番号{key}は既に{borrower_name}さんが借りています。")
}

pub fn not_borrowed(key: &KeyId) -> String {
    format!("カード番号{key}は現在貸し出されていません。")
}

pub fn wrong_borrower(key: &KeyId, borrower_name: &str) -> String {
    format!("カード番号{key}は{borrower_name}さんが借りています。あなたは借りていません。")
}

/// Renders a rejected borrow or return. `borrower_name` is used only by the
/// variants that name the current holder.
pub fn rejection(err: &LedgerError, borrower_name: &str) -> String {
    match err {
        LedgerError::InvalidKey { key } => invalid_key(key),
        LedgerError::AlreadyBorrowed { key, .. } => already_borrowed(key, borrower_name),
        LedgerError::NotBorrowed { key } => not_borrowed(key),
        LedgerError::WrongBorrower { key, .. } => wrong_borrower(key, borrower_name),
    }
}

/// One line per loan.
fn loan_line(loan: &NamedLoan) -> String {
    format!(
        "カード番号{}: {}さんが借りています。借りた日: {}",
        loan.record.key_id,
        loan.borrower_name,
        format_timestamp(loan.record.borrowed_at)
    )
}

/// Status report: a header plus one line per loan, or [`NOTHING_BORROWED`].
pub fn status_report(loans: &[NamedLoan]) -> String {
    if loans.is_empty() {
        return NOTHING_BORROWED.to_string();
    }
    let mut report = String::from(STATUS_HEADER);
    for loan in loans {
        report.push('\n');
        report.push_str(&loan_line(loan));
    }
    report
}

/// Overdue notice listing every overdue loan, or `None` if there are none.
pub fn overdue_notice(loans: &[NamedLoan], threshold: Duration) -> Option<String> {
    if loans.is_empty() {
        return None;
    }
    let mut notice = format!(
        "以下のカードが{}以上経過しても返却されていません:",
        format_threshold(threshold)
    );
    for loan in loans {
        notice.push('\n');
        notice.push_str(&loan_line(loan));
    }
    Some(notice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn loan(key: &str, user: &str, name: &str) -> NamedLoan {
        NamedLoan {
            record: KeyRecord {
                key_id: KeyId::new(key),
                borrower: UserId::new(user),
                borrowed_at: Utc.with_ymd_and_hms(2024, 4, 1, 9, 30, 0).unwrap(),
            },
            borrower_name: name.to_string(),
        }
    }

    #[test]
    fn test_borrowed_mentions_user() {
        let text = borrowed(&KeyId::new("13"), &UserId::new("U1"));
        assert!(text.contains("13"));
        assert!(text.contains("<@U1>"));
    }

    #[test]
    fn test_rejection_texts() {
        let key = KeyId::new("13");
        let holder = UserId::new("U1");

        let text = rejection(&LedgerError::InvalidKey { key: KeyId::new("99") }, "");
        assert!(text.contains("99"));

        let text = rejection(
            &LedgerError::AlreadyBorrowed {
                key: key.clone(),
                current_borrower: holder.clone(),
            },
            "Hanako",
        );
        assert!(text.contains("Hanako"));

        let text = rejection(&LedgerError::NotBorrowed { key: key.clone() }, "");
        assert!(text.contains("貸し出されていません"));

        let text = rejection(
            &LedgerError::WrongBorrower {
                key,
                actual_borrower: holder,
            },
            "Hanako",
        );
        assert!(text.contains("Hanako"));
        assert!(text.contains("あなたは借りていません"));
    }

    #[test]
    fn test_status_report_empty() {
        assert_eq!(status_report(&[]), NOTHING_BORROWED);
    }

    #[test]
    fn test_status_report_one_line_per_loan() {
        let report = status_report(&[loan("13", "U1", "Hanako"), loan("15", "U2", "Taro")]);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], STATUS_HEADER);
        assert!(lines[1].contains("カード番号13") && lines[1].contains("Hanako"));
        assert!(lines[2].contains("カード番号15") && lines[2].contains("Taro"));
    }

    #[test]
    fn test_overdue_notice() {
        assert_eq!(overdue_notice(&[], Duration::hours(48)), None);

        let notice = overdue_notice(&[loan("14", "U1", "Hanako")], Duration::hours(48)).unwrap();
        assert!(notice.starts_with("以下のカードが2日以上"));
        assert!(notice.contains("カード番号14"));
    }

    #[test]
    fn test_format_threshold() {
        assert_eq!(format_threshold(Duration::hours(48)), "2日");
        assert_eq!(format_threshold(Duration::hours(36)), "36時間");
        assert_eq!(format_threshold(Duration::minutes(30)), "0時間");
    }

    #[test]
    fn test_format_timestamp_shape() {
        let formatted = format_timestamp(Utc.with_ymd_and_hms(2024, 4, 1, 9, 30, 0).unwrap());
        // Local offset varies by host; only the shape is fixed.
        assert_eq!(formatted.len(), "2024-04-01 09:30".len());
        assert!(formatted.starts_with("2024-0"));
        assert_eq!(formatted.get(13..14), Some(":"));
    }
}
