//! Style constants for terminal output.
//!
//! The `anstyle` `Style` constants below are interpolated directly into
//! format strings, `{ERROR}` opening the style and `{ERROR:#}` resetting
//! it — both in the manual `Display` impls (see
//! [`UpgradeError`](crate::error::UpgradeError)) and in the CLI's
//! status lines, each paired with its emoji.

use anstyle::{AnsiColor, Color, Style};

/// Error body style (red).
pub const ERROR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));

/// Bold-within-error style for the subject of the message.
pub const ERROR_BOLD: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))).bold();

/// Hint style (dimmed).
pub const HINT: Style = Style::new().dimmed();

/// Success style (green).
pub const SUCCESS: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));

/// Warning style (yellow), for conflict listings.
pub const WARNING: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));

/// Error emoji: `write!(f, "{ERROR_EMOJI} {ERROR}message{ERROR:#}")`
pub const ERROR_EMOJI: &str = "❌";

/// Hint emoji, paired with [`HINT`].
pub const HINT_EMOJI: &str = "💡";

/// Success emoji, paired with [`SUCCESS`].
pub const SUCCESS_EMOJI: &str = "✅";

/// Warning emoji, paired with [`WARNING`].
pub const WARNING_EMOJI: &str = "🟡";
