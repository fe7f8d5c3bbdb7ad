//! Project-facing helpers: git discovery, YAML updates, checklist progress

pub mod checklist;
pub mod doc;
pub mod git;

pub use checklist::{format_progress, progress};
pub use doc::{read_yaml_path, update_yaml_file};
pub use git::{changed_files, default_project_dir, find_git_root};
