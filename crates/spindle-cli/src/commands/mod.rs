//! Subcommand implementations.

pub mod images;
pub mod package;
pub mod pull;
pub mod view;

use clap::ValueEnum;

/// How command output is rendered.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with full detail.
    #[value(name = "detailed-text")]
    DetailedText,
    /// Human-readable output with counts instead of full documents.
    Text,
    /// Raw JSON, one document per item.
    #[value(name = "direct-json")]
    DirectJson,
}
