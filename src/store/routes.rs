//! Encampment routing table: which store a record prefix lives in.
//!
//! `.store/routes.jsonl` holds one `{"prefix","path"}` object per line. Blank
//! lines and `#` comments are skipped. Paths are relative to the encampment
//! root, `.` meaning the encampment store itself.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::{STORE_DIR_NAME, ids, redirect};
use crate::error::HordeError;
use crate::fsutil;

pub const ROUTES_FILE: &str = "routes.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Record id prefix including the trailing `-`.
    pub prefix: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routes {
    pub rows: Vec<Route>,
}

impl Routes {
    pub fn path(encampment_root: &Path) -> PathBuf {
        encampment_root.join(STORE_DIR_NAME).join(ROUTES_FILE)
    }

    /// Load the table; a missing file is an empty table.
    pub fn load(encampment_root: &Path) -> anyhow::Result<Self> {
        let path = Self::path(encampment_root);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        Self::parse(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let mut rows = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let route: Route = serde_json::from_str(line).map_err(|e| {
                HordeError::Validation(format!("route on line {}: {e}", lineno + 1))
            })?;
            rows.push(route);
        }
        Ok(Self { rows })
    }

    pub fn save(&self, encampment_root: &Path) -> anyhow::Result<()> {
        let mut out = String::new();
        for row in &self.rows {
            out.push_str(&serde_json::to_string(row).context("serializing route")?);
            out.push('\n');
        }
        fsutil::atomic_write(&Self::path(encampment_root), out.as_bytes())
    }

    /// Insert or replace the row for `prefix`.
    pub fn add(&mut self, prefix: &str, path: &str) {
        let prefix = normalize_prefix(prefix);
        match self.rows.iter_mut().find(|r| r.prefix == prefix) {
            Some(row) => row.path = path.to_string(),
            None => self.rows.push(Route {
                prefix,
                path: path.to_string(),
            }),
        }
    }

    /// Drop the row for `prefix`; returns whether one existed.
    pub fn remove(&mut self, prefix: &str) -> bool {
        let prefix = normalize_prefix(prefix);
        let before = self.rows.len();
        self.rows.retain(|r| r.prefix != prefix);
        self.rows.len() != before
    }

    /// First row whose prefix matches the id's prefix.
    pub fn resolve(&self, id: &str) -> Option<&Route> {
        let prefix = format!("{}-", ids::id_prefix(id)?);
        self.rows.iter().find(|r| r.prefix == prefix)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    if prefix.ends_with('-') {
        prefix.to_string()
    } else {
        format!("{prefix}-")
    }
}

/// Store directory holding record `id`, following its route and any redirects.
///
/// Ids with no matching route resolve to the encampment store.
pub fn resolve_store_dir(encampment_root: &Path, id: &str) -> anyhow::Result<PathBuf> {
    let routes = Routes::load(encampment_root)?;
    let owner = match routes.resolve(id) {
        Some(route) if route.path != "." => encampment_root.join(&route.path),
        _ => encampment_root.to_path_buf(),
    };
    Ok(redirect::resolve_store_dir(&owner))
}
