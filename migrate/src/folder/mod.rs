//! # Folder
//!
//! Module dedicated to folder resolution. The [`FolderResolver`]
//! turns a live source folder listing into the ordered list of
//! [`FolderMapping`]s the migration works on.

pub mod config;
mod error;

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt, fs,
    path::Path,
};

use tracing::{debug, trace};

use self::config::{FolderConfig, DEFAULT_DELIMITER, DEFAULT_ROOT};
#[doc(inline)]
pub use self::error::{Error, Result};

/// A folder as listed by an IMAP server.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Folder {
    /// The decoded folder name.
    pub name: String,

    /// The hierarchy delimiter announced by the server, if any.
    pub delimiter: Option<String>,
}

impl Folder {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            delimiter: None,
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A source folder associated to its destination folder.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FolderMapping {
    pub source: String,
    pub dest: String,
}

impl FolderMapping {
    pub fn new(source: impl ToString, dest: impl ToString) -> Self {
        Self {
            source: source.to_string(),
            dest: dest.to_string(),
        }
    }
}

impl fmt::Display for FolderMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.source, self.dest)
    }
}

/// The folder resolver.
///
/// Folders are resolved in the order of the server listing, which
/// keeps the migration order stable across runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FolderResolver {
    root: String,
    delimiter: String,
    exclusions: BTreeSet<String>,
    renames: BTreeMap<String, String>,
    /// Other roots whose subtree is never migrated, like the archive
    /// of moved source messages.
    protected_roots: BTreeSet<String>,
}

impl Default for FolderResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT, DEFAULT_DELIMITER)
    }
}

impl FolderResolver {
    pub fn new(root: impl ToString, delimiter: impl ToString) -> Self {
        Self {
            root: root.to_string(),
            delimiter: delimiter.to_string(),
            exclusions: Default::default(),
            renames: Default::default(),
            protected_roots: Default::default(),
        }
    }

    /// Build a resolver from the given configuration, loading the
    /// exclusion and rename files it refers to.
    pub fn from_config(config: &FolderConfig) -> Result<Self> {
        let mut resolver = Self::new(&config.root, &config.delimiter)
            .with_exclusions(config.exclude.iter().cloned())
            .with_renames(config.rename.clone());

        if let Some(path) = config.exclude_file.as_ref() {
            resolver.add_exclusions(load_exclusions(path)?);
        }

        if let Some(path) = config.rename_file.as_ref() {
            resolver.add_renames(load_renames(path)?);
        }

        resolver.validate()?;
        Ok(resolver)
    }

    pub fn add_exclusions(&mut self, folders: impl IntoIterator<Item = impl ToString>) {
        self.exclusions
            .extend(folders.into_iter().map(|folder| folder.to_string()));
    }

    pub fn with_exclusions(mut self, folders: impl IntoIterator<Item = impl ToString>) -> Self {
        self.add_exclusions(folders);
        self
    }

    pub fn add_renames(
        &mut self,
        renames: impl IntoIterator<Item = (impl ToString, impl ToString)>,
    ) {
        self.renames.extend(
            renames
                .into_iter()
                .map(|(source, dest)| (source.to_string(), dest.to_string())),
        );
    }

    pub fn with_renames(
        mut self,
        renames: impl IntoIterator<Item = (impl ToString, impl ToString)>,
    ) -> Self {
        self.add_renames(renames);
        self
    }

    pub fn add_protected_root(&mut self, root: impl ToString) {
        self.protected_roots.insert(root.to_string());
    }

    pub fn with_protected_root(mut self, root: impl ToString) -> Self {
        self.add_protected_root(root);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (source, dest) in &self.renames {
            if dest.trim().is_empty() {
                return Err(Error::EmptyRenameError(source.clone()));
            }
        }

        Ok(())
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Return `true` if the given folder is the migration root, a
    /// protected root, or lives below one of them.
    pub fn is_under_root(&self, folder: &str) -> bool {
        self.is_under(folder, &self.root)
            || self
                .protected_roots
                .iter()
                .any(|root| self.is_under(folder, root))
    }

    fn is_under(&self, folder: &str, root: &str) -> bool {
        folder == root
            || folder
                .strip_prefix(root)
                .map(|rest| rest.starts_with(&self.delimiter))
                .unwrap_or_default()
    }

    /// Return `true` if the given source folder must not be
    /// migrated.
    pub fn is_excluded(&self, folder: &str) -> bool {
        self.exclusions.contains(folder) || self.is_under_root(folder)
    }

    /// Compute the destination of the given source folder, or `None`
    /// if the folder is excluded.
    ///
    /// Exclusion wins over rename.
    pub fn map(&self, folder: &str) -> Option<FolderMapping> {
        if self.is_excluded(folder) {
            return None;
        }

        let dest = match self.renames.get(folder) {
            Some(dest) => dest.clone(),
            None => format!("{}{}{folder}", self.root, self.delimiter),
        };

        Some(FolderMapping::new(folder, dest))
    }

    /// Resolve the given source folder listing into folder mappings,
    /// preserving the listing order.
    pub fn resolve<'a>(&self, folders: impl IntoIterator<Item = &'a str>) -> Vec<FolderMapping> {
        let mut seen = HashSet::new();
        let mut mappings = Vec::new();

        for folder in folders {
            if !seen.insert(folder) {
                trace!("skipping duplicate folder {folder}");
                continue;
            }

            match self.map(folder) {
                Some(mapping) => {
                    debug!("resolved folder {mapping}");
                    mappings.push(mapping);
                }
                None => {
                    debug!("excluding folder {folder}");
                }
            }
        }

        mappings
    }
}

/// Read an exclusion file: one folder name per line, blank lines and
/// lines starting with `#` are ignored.
pub fn load_exclusions(path: impl AsRef<Path>) -> Result<BTreeSet<String>> {
    let path = path.as_ref();
    debug!("loading folder exclusions from {path:?}");

    let content = fs::read_to_string(path)
        .map_err(|err| Error::ReadExclusionFileError(err, path.to_owned()))?;

    Ok(parse_exclusions(&content))
}

fn parse_exclusions(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToOwned::to_owned)
        .collect()
}

/// Read a rename file, as a flat map of source folder to destination
/// folder. Files ending with `.json` are parsed as JSON, files ending
/// with `.toml` as TOML. Other extensions are rejected.
pub fn load_renames(path: impl AsRef<Path>) -> Result<BTreeMap<String, String>> {
    let path = path.as_ref();
    debug!("loading folder renames from {path:?}");

    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if ext != "json" && ext != "toml" {
        return Err(Error::UnsupportedRenameFileError(path.to_owned()));
    }

    let content =
        fs::read_to_string(path).map_err(|err| Error::ReadRenameFileError(err, path.to_owned()))?;

    if ext == "json" {
        serde_json::from_str(&content)
            .map_err(|err| Error::ParseJsonRenameFileError(err, path.to_owned()))
    } else {
        toml::from_str(&content)
            .map_err(|err| Error::ParseTomlRenameFileError(err, path.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, fs};

    use tempfile::tempdir;

    use super::{load_exclusions, load_renames, Error, FolderMapping, FolderResolver};

    #[test]
    fn default_mapping() {
        let resolver = FolderResolver::default().with_exclusions(["Spam"]);
        let mappings = resolver.resolve(["Inbox", "Archive", "Spam"]);

        assert_eq!(
            mappings,
            vec![
                FolderMapping::new("Inbox", "Migrated/Inbox"),
                FolderMapping::new("Archive", "Migrated/Archive"),
            ]
        );
    }

    #[test]
    fn exclusion_wins_over_rename() {
        let resolver = FolderResolver::default()
            .with_exclusions(["Spam"])
            .with_renames([("Spam", "Junk"), ("Sent", "Sent Items")]);

        assert_eq!(resolver.map("Spam"), None);
        assert_eq!(
            resolver.map("Sent"),
            Some(FolderMapping::new("Sent", "Sent Items"))
        );
    }

    #[test]
    fn root_is_never_migrated() {
        let resolver = FolderResolver::default();
        let mappings = resolver.resolve(["Migrated", "Migrated/Inbox", "MigratedStuff", "Inbox"]);

        assert_eq!(
            mappings,
            vec![
                FolderMapping::new("MigratedStuff", "Migrated/MigratedStuff"),
                FolderMapping::new("Inbox", "Migrated/Inbox"),
            ]
        );
    }

    #[test]
    fn protected_roots_are_never_migrated() {
        let resolver = FolderResolver::default().with_protected_root("Done");
        let mappings = resolver.resolve(["INBOX", "Done", "Done/INBOX", "Migrated/INBOX"]);

        assert_eq!(mappings, vec![FolderMapping::new("INBOX", "Migrated/INBOX")]);
    }

    #[test]
    fn custom_root_and_delimiter() {
        let resolver = FolderResolver::new("Old", ".");
        let mappings = resolver.resolve(["INBOX", "INBOX.Sent", "Old.INBOX", "INBOX"]);

        assert_eq!(
            mappings,
            vec![
                FolderMapping::new("INBOX", "Old.INBOX"),
                FolderMapping::new("INBOX.Sent", "Old.INBOX.Sent"),
            ]
        );
    }

    #[test]
    fn deterministic() {
        let resolver = FolderResolver::default().with_exclusions(["Trash"]);
        let folders = ["b", "Trash", "a", "c"];
        assert_eq!(resolver.resolve(folders), resolver.resolve(folders));
    }

    #[test]
    fn files() {
        let dir = tempdir().unwrap();

        let exclude_path = dir.path().join("exclude.txt");
        fs::write(&exclude_path, "Spam\n\n  Trash  \n# Drafts\n").unwrap();
        let exclusions = load_exclusions(&exclude_path).unwrap();
        assert_eq!(
            exclusions.into_iter().collect::<Vec<_>>(),
            vec![String::from("Spam"), String::from("Trash")]
        );

        let toml_path = dir.path().join("rename.toml");
        fs::write(&toml_path, "Sent = \"Sent Items\"\n\"Old/Stuff\" = \"Stuff\"\n").unwrap();
        assert_eq!(
            load_renames(&toml_path).unwrap(),
            BTreeMap::from_iter([
                (String::from("Old/Stuff"), String::from("Stuff")),
                (String::from("Sent"), String::from("Sent Items")),
            ])
        );

        let json_path = dir.path().join("rename.json");
        fs::write(&json_path, r#"{"Sent": "Sent Items"}"#).unwrap();
        assert_eq!(
            load_renames(&json_path).unwrap(),
            BTreeMap::from_iter([(String::from("Sent"), String::from("Sent Items"))])
        );

        let yaml_path = dir.path().join("rename.yaml");
        fs::write(&yaml_path, "Sent: Sent Items\n").unwrap();
        match load_renames(&yaml_path).unwrap_err() {
            Error::UnsupportedRenameFileError(path) => assert_eq!(path, yaml_path),
            err => panic!("unexpected error: {err:?}"),
        }
    }
}
