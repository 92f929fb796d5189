//! Load a plain-text file into the canned reply store.
//!
//! Usage: cargo run --bin kcuf-ingest <quotes.txt> [--db <file>] [--separator paragraph|line]
//!
//! By default entries are paragraphs separated by blank lines and the store is
//! written to `<file name>.db` in the current directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};

use kcuf::chatbot::ReplyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Separator {
    /// Blank lines separate entries
    Paragraph,
    /// Every non-empty line is an entry
    Line,
}

/// Parse a file and put entries in a database.
#[derive(Debug, Parser)]
#[command(name = "kcuf-ingest")]
struct Args {
    /// Source file
    filename: PathBuf,

    /// Reply database to write [default: <file name>.db]
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Separator::Paragraph)]
    separator: Separator,
}

/// Split `content` into trimmed, non-empty entries.
fn split_entries(content: &str, separator: Separator) -> Vec<String> {
    match separator {
        Separator::Line => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect(),
        Separator::Paragraph => {
            let mut entries = Vec::new();
            let mut current: Vec<&str> = Vec::new();
            for line in content.lines() {
                if line.trim().is_empty() {
                    if !current.is_empty() {
                        entries.push(current.join("\n"));
                        current.clear();
                    }
                } else {
                    current.push(line.trim_end());
                }
            }
            if !current.is_empty() {
                entries.push(current.join("\n"));
            }
            entries
        }
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if !args.filename.exists() {
        eprintln!("ERROR: File {} was not found!", args.filename.display());
        std::process::exit(1);
    }

    let name = source_name(&args.filename);
    let db_path = args.db.unwrap_or_else(|| PathBuf::from(format!("{name}.db")));

    println!("Reading {:?}...", args.filename);
    let content = std::fs::read_to_string(&args.filename)
        .with_context(|| format!("failed to read {:?}", args.filename))?;
    let entries = split_entries(&content, args.separator);
    println!("Found {} entries", entries.len());

    let store = ReplyStore::open(&db_path)?;
    let added = store.add_replies(Some(&name), &entries)?;

    println!();
    println!("Added {} replies to {:?}", added, db_path);
    println!("Unsent: {} of {}", store.unsent_count()?, store.total_count()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs() {
        let text = "first line\nstill first\n\n\nsecond\n   \nthird  \n";
        assert_eq!(
            split_entries(text, Separator::Paragraph),
            vec!["first line\nstill first", "second", "third"]
        );
    }

    #[test]
    fn test_lines() {
        let text = "one\n\n  two  \nthree";
        assert_eq!(split_entries(text, Separator::Line), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(split_entries("\n\n  \n", Separator::Paragraph).is_empty());
    }

    #[test]
    fn test_source_name() {
        assert_eq!(source_name(Path::new("/data/quotes.txt")), "quotes.txt");
    }

    #[test]
    fn test_ingest_into_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ReplyStore::open(&dir.path().join("quotes.txt.db")).unwrap();
        let entries = split_entries("No.\n\nMaybe.\n", Separator::Paragraph);
        assert_eq!(store.add_replies(Some("quotes.txt"), &entries).unwrap(), 2);
        assert_eq!(store.unsent_count().unwrap(), 2);
    }
}
