//! Template store: the closed set of game skeletons plus their catalog.
//!
//! Template bodies carry a `[Base Code]` and a `[Constraints]` section that
//! the model reads; nothing here parses them. The bundled set is compiled in
//! with `include_str!`, and `DirTemplates` serves the same ids from disk.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

pub const CATALOG_MD: &str = include_str!("../templates/catalog.md");
pub const S1_RUNNER_MD: &str = include_str!("../templates/s1_runner.md");
pub const S2_PUZZLE_MD: &str = include_str!("../templates/s2_puzzle.md");
pub const S3_SHOOTER_MD: &str = include_str!("../templates/s3_shooter.md");
pub const S4_CLICKER_MD: &str = include_str!("../templates/s4_clicker.md");
pub const S5_PHYSICS_MD: &str = include_str!("../templates/s5_physics.md");
pub const S6_GENERAL_MD: &str = include_str!("../templates/s6_general.md");

const CATALOG_FILE: &str = "catalog.md";

/// Identifier of a bundled game skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TemplateId {
    #[serde(rename = "s1_runner")]
    Runner,
    #[serde(rename = "s2_puzzle")]
    Puzzle,
    #[serde(rename = "s3_shooter")]
    Shooter,
    #[serde(rename = "s4_clicker")]
    Clicker,
    #[serde(rename = "s5_physics")]
    Physics,
    #[serde(rename = "s6_general")]
    General,
}

impl TemplateId {
    /// Every known identifier, in catalog order.
    pub const ALL: [TemplateId; 6] = [
        TemplateId::Runner,
        TemplateId::Puzzle,
        TemplateId::Shooter,
        TemplateId::Clicker,
        TemplateId::Physics,
        TemplateId::General,
    ];

    /// Used whenever the selector cannot route a request.
    pub const FALLBACK: TemplateId = TemplateId::General;

    pub fn as_str(self) -> &'static str {
        match self {
            TemplateId::Runner => "s1_runner",
            TemplateId::Puzzle => "s2_puzzle",
            TemplateId::Shooter => "s3_shooter",
            TemplateId::Clicker => "s4_clicker",
            TemplateId::Physics => "s5_physics",
            TemplateId::General => "s6_general",
        }
    }

    /// Exact-match lookup; callers normalize case and whitespace first.
    pub fn from_token(token: &str) -> Option<TemplateId> {
        TemplateId::ALL
            .into_iter()
            .find(|id| id.as_str() == token)
    }

    fn file_name(self) -> String {
        format!("{}.md", self.as_str())
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateId {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let token = raw.trim().to_ascii_lowercase();
        TemplateId::from_token(&token).ok_or_else(|| {
            let known = TemplateId::ALL
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            anyhow!("unknown template id {raw:?} (expected one of: {known})")
        })
    }
}

/// Read-only source of template bodies and the catalog text.
pub trait TemplateStore: Send + Sync {
    /// Load the body for `id`; fails when the store has no such resource.
    fn load(&self, id: TemplateId) -> Result<String>;

    /// Load the catalog consumed by the selector prompt.
    fn load_catalog(&self) -> Result<String>;
}

/// Templates compiled into the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedTemplates;

impl TemplateStore for EmbeddedTemplates {
    fn load(&self, id: TemplateId) -> Result<String> {
        let body = match id {
            TemplateId::Runner => S1_RUNNER_MD,
            TemplateId::Puzzle => S2_PUZZLE_MD,
            TemplateId::Shooter => S3_SHOOTER_MD,
            TemplateId::Clicker => S4_CLICKER_MD,
            TemplateId::Physics => S5_PHYSICS_MD,
            TemplateId::General => S6_GENERAL_MD,
        };
        Ok(body.to_string())
    }

    fn load_catalog(&self) -> Result<String> {
        Ok(CATALOG_MD.to_string())
    }
}

/// Templates read from `{root}/{id}.md` and `{root}/catalog.md` on each load.
#[derive(Debug, Clone)]
pub struct DirTemplates {
    root: PathBuf,
}

impl DirTemplates {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn read(&self, file_name: &str) -> Result<String> {
        let path = self.root.join(file_name);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

impl TemplateStore for DirTemplates {
    fn load(&self, id: TemplateId) -> Result<String> {
        self.read(&id.file_name())
    }

    fn load_catalog(&self) -> Result<String> {
        self.read(CATALOG_FILE)
    }
}

/// Verify that the catalog and the store agree on the identifier set.
///
/// Returns one problem string per violation; an empty list means every id is
/// both described by the catalog and loadable.
pub fn check_store(store: &dyn TemplateStore) -> Result<Vec<String>> {
    let catalog = store.load_catalog().context("load template catalog")?;
    let mut problems = Vec::new();
    for id in TemplateId::ALL {
        if !catalog.contains(id.as_str()) {
            problems.push(format!("catalog does not mention {id}"));
        }
        match store.load(id) {
            Ok(body) if body.trim().is_empty() => {
                problems.push(format!("template {id} is empty"));
            }
            Ok(_) => {}
            Err(err) => problems.push(format!("template {id} failed to load: {err:#}")),
        }
    }
    Ok(problems)
}
