//! `image-archive validate` command.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use image_archive_core::{ArchiveConfig, Worklist};

use crate::output;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Worklist file to check
    #[arg(short, long)]
    pub worklist: PathBuf,
}

pub(crate) fn execute(args: ValidateArgs, config: &ArchiveConfig) -> Result<(), Box<dyn std::error::Error>> {
    let worklist = Worklist::load(&args.worklist, &config.repositories)?;

    let mut per_repository: BTreeMap<&str, usize> = BTreeMap::new();
    for id in worklist.iter() {
        *per_repository.entry(id.repository.as_str()).or_default() += 1;
    }

    let mut table = output::new_table(&["REPOSITORY", "ENTRIES"]);
    for (repository, count) in &per_repository {
        table.add_row(vec![repository.to_string(), count.to_string()]);
    }
    println!("{table}");
    println!("\n{}: {} valid entries", args.worklist.display(), worklist.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{test_config, worklist_file};

    #[test]
    fn test_valid_worklist() {
        let file = worklist_file(&[
            "# archive these",
            "images/foo@sha256:aaa",
            "",
            "images/team/bar@sha256:bbb",
        ]);
        let args = ValidateArgs {
            worklist: file.path().to_path_buf(),
        };
        assert!(execute(args, &test_config()).is_ok());
    }

    #[test]
    fn test_unsupported_repository() {
        let file = worklist_file(&["images-archive/foo@sha256:aaa"]);
        let args = ValidateArgs {
            worklist: file.path().to_path_buf(),
        };
        let err = execute(args, &test_config()).unwrap_err();
        assert!(err.to_string().contains("Unsupported repository: images-archive"));
    }

    #[test]
    fn test_missing_file() {
        let args = ValidateArgs {
            worklist: PathBuf::from("/nonexistent/worklist.txt"),
        };
        assert!(execute(args, &test_config()).is_err());
    }
}
